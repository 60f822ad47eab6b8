//! Cluster Binary Entry Point
//!
//! Operations CLI for the cluster. Core functionality is provided by the
//! `cluster` library crate.

use std::net::{IpAddr, SocketAddr};

use clap::{Parser, Subcommand};
use cluster::{
    config::{AppConfig, DatabaseDriver},
    service::{CollectorService, DrainOutcome, shutdown_signal},
    storage::StorageBuilder,
    tools::{
        ANSIBLE, ANSIBLE_PLAYBOOK, AnsibleOptions, DEPLOY_STDOUT_CALLBACK, KUBECTL, ProcessTool,
        RELEASE_UPGRADE_PLAYBOOK, STDOUT_CALLBACK_ENV, ToolError, UPDATE_NODE_PLAYBOOK,
        nslookup_args, port_forward_args, run_checked, sql_client_args,
    },
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cluster - operations CLI and fleet heartbeat collector
#[derive(Parser, Debug)]
#[command(name = "cluster", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yml", env = "CLUSTER_CONFIG", global = true)]
    config: String,

    /// Storage backend, overriding database.driver (postgres or sqlite)
    #[arg(long, env = "CLUSTER_DB_DRIVER", global = true)]
    driver: Option<DatabaseDriver>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a job in the cluster
    #[command(subcommand)]
    Run(RunCommand),

    /// Deploy a service to the cluster
    Deploy {
        /// Service directory under the playbook tree
        service: String,
    },

    /// Helpers for working with cluster services
    #[command(subcommand)]
    Tools(ToolsCommand),
}

#[derive(Subcommand, Debug)]
enum RunCommand {
    /// Run the heartbeat collection server
    Collector {
        /// Listen port (default: server.port from config, 8080)
        port: Option<u16>,
    },

    /// Ping every node in the inventory
    Ping,

    /// Update OS packages on each node
    UpdateNode,

    /// Upgrade the OS release on each node
    ReleaseUpgrade,
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// Cluster database helpers
    #[command(subcommand)]
    Db(DbCommand),

    /// Query cluster DNS for a host name
    Nslookup {
        /// Name to resolve
        #[arg(long)]
        host: String,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Forward a local port to the cluster database
    Proxy,

    /// Open an SQL shell on the cluster database
    Connect {
        /// Database to connect to (default: database.database from config)
        #[arg(long)]
        database: Option<String>,
    },

    /// Create or upgrade the heartbeat schema in the configured store
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cluster=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::debug!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load_or_default(&cli.config)?;
    config.database = config.database.with_env_overrides();
    if let Some(driver) = cli.driver {
        config.database.driver = driver;
    }
    config.validate()?;

    match cli.command {
        Command::Run(RunCommand::Collector { port }) => run_collector(&config, port).await?,
        Command::Run(RunCommand::Ping) => {
            let opts = AnsibleOptions::from(&config.deploy);
            run_tool(ANSIBLE, opts.ping_args()).await?;
        }
        Command::Run(RunCommand::UpdateNode) => {
            let opts = AnsibleOptions::from(&config.deploy);
            run_tool(ANSIBLE_PLAYBOOK, opts.playbook_args(UPDATE_NODE_PLAYBOOK)).await?;
        }
        Command::Run(RunCommand::ReleaseUpgrade) => {
            let opts = AnsibleOptions::from(&config.deploy);
            run_tool(ANSIBLE_PLAYBOOK, opts.playbook_args(RELEASE_UPGRADE_PLAYBOOK)).await?;
        }
        Command::Deploy { service } => {
            let opts = AnsibleOptions::from(&config.deploy);
            let tool = ProcessTool::new(ANSIBLE_PLAYBOOK)
                .with_env(STDOUT_CALLBACK_ENV, DEPLOY_STDOUT_CALLBACK);
            run_checked(&tool, &opts.deploy_args(&service)).await?;
        }
        Command::Tools(ToolsCommand::Db(DbCommand::Proxy)) => {
            let args = port_forward_args(
                &config.deploy.port_forward_target,
                &config.deploy.port_forward_ports,
            );
            run_tool(KUBECTL, args).await?;
        }
        Command::Tools(ToolsCommand::Db(DbCommand::Connect { database })) => {
            let database = database.unwrap_or_else(|| config.database.database.clone());
            run_tool(KUBECTL, sql_client_args(&database)).await?;
        }
        Command::Tools(ToolsCommand::Db(DbCommand::Migrate)) => {
            let handles = StorageBuilder::new(config.database.clone())
                .migrate(true)
                .build()
                .await?;
            tracing::info!(backend = handles.store.backend(), "Schema is up to date");
            handles.shutdown().await?;
        }
        Command::Tools(ToolsCommand::Nslookup { host }) => {
            run_tool(KUBECTL, nslookup_args(&config.deploy.dns_pod, &host)).await?;
        }
    }

    Ok(())
}

/// Connect, migrate, serve until SIGINT/SIGTERM, then drain.
async fn run_collector(
    config: &AppConfig,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let port = port.unwrap_or(config.server.port);
    let ip: IpAddr = config.server.bind.parse()?;
    let addr = SocketAddr::new(ip, port);

    tracing::info!(
        "Collector: {}, Database: {} ({})",
        addr,
        config.database.connection_url(),
        config.database.driver,
    );

    let handles = StorageBuilder::new(config.database.clone()).build().await?;

    let service = CollectorService::new(handles.store.clone());
    service.migrate().await?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Press Ctrl+C to shutdown");

    let outcome = service.serve(listener, shutdown_signal()).await?;

    // After an abandoned drain the aborted requests may still be returning
    // pooled connections; process exit releases them.
    if outcome == DrainOutcome::Drained {
        handles.shutdown().await?;
    }
    tracing::info!(%outcome, "Shutdown complete");
    Ok(())
}

async fn run_tool(program: &str, args: Vec<String>) -> Result<(), ToolError> {
    run_checked(&ProcessTool::new(program), &args).await
}
