//! The [`ExternalTool`] seam and its process-backed implementation.

use std::process::{ExitStatus, Stdio};

use thiserror::Error;

/// Errors from running an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started (not installed, not executable).
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

/// A command-line program the CLI delegates to.
#[async_trait::async_trait]
pub trait ExternalTool: Send + Sync {
    /// Program name, for logs and errors.
    fn name(&self) -> &str;

    /// Run with `args`, stdio attached to the terminal, and wait for exit.
    async fn run(&self, args: &[String]) -> Result<ExitStatus, ToolError>;
}

/// Runs a program from `PATH` with inherited stdio.
#[derive(Debug, Clone)]
pub struct ProcessTool {
    program: String,
    envs: Vec<(String, String)>,
}

impl ProcessTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            envs: Vec::new(),
        }
    }

    /// Set an extra environment variable for the child.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

#[async_trait::async_trait]
impl ExternalTool for ProcessTool {
    fn name(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[String]) -> Result<ExitStatus, ToolError> {
        tokio::process::Command::new(&self.program)
            .args(args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })
    }
}

/// Run `tool` and turn a non-zero exit into [`ToolError::Failed`].
pub async fn run_checked(tool: &dyn ExternalTool, args: &[String]) -> Result<(), ToolError> {
    tracing::info!(tool = tool.name(), args = %args.join(" "), "Running external tool");
    let status = tool.run(args).await?;
    if status.success() {
        tracing::debug!(tool = tool.name(), "External tool finished");
        Ok(())
    } else {
        Err(ToolError::Failed {
            program: tool.name().to_string(),
            status,
        })
    }
}
