//! Deployment settings consumed by the Ansible and kubectl wrappers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_user() -> String {
    "deploy".to_string()
}

fn default_build_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_playbook_dir() -> PathBuf {
    PathBuf::from("playbooks")
}

fn default_inventory_file() -> PathBuf {
    PathBuf::from("inventory.yml")
}

fn default_true() -> bool {
    true
}

fn default_port_forward_target() -> String {
    "pod/cockroachdb-0".to_string()
}

fn default_port_forward_ports() -> String {
    "9000:26257".to_string()
}

fn default_dns_pod() -> String {
    "dnsutils".to_string()
}

/// Deployment configuration (`deploy:` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Remote user Ansible connects as.
    #[serde(default = "default_user")]
    pub user: String,

    /// Checkout containing the playbook tree.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,

    /// Playbook tree, relative to `build_dir` (default: playbooks).
    #[serde(default = "default_playbook_dir")]
    pub playbook_dir: PathBuf,

    /// Ansible inventory file.
    #[serde(default = "default_inventory_file")]
    pub inventory_file: PathBuf,

    /// Optional extra-vars file passed as `--extra-vars @file`.
    #[serde(default)]
    pub extra_vars_file: Option<PathBuf>,

    /// Run tasks with privilege escalation (default: true).
    #[serde(default = "default_true", rename = "become")]
    pub become_root: bool,

    /// Prompt for the privilege escalation password (default: true).
    #[serde(default = "default_true")]
    pub ask_become_pass: bool,

    /// Pass `-vv` to ansible-playbook (default: true).
    #[serde(default = "default_true")]
    pub verbose: bool,

    /// kubectl port-forward resource (default: pod/cockroachdb-0).
    #[serde(default = "default_port_forward_target")]
    pub port_forward_target: String,

    /// kubectl port-forward mapping (default: 9000:26257).
    #[serde(default = "default_port_forward_ports")]
    pub port_forward_ports: String,

    /// Pod with DNS utilities for `tools nslookup` (default: dnsutils).
    #[serde(default = "default_dns_pod")]
    pub dns_pod: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            build_dir: default_build_dir(),
            playbook_dir: default_playbook_dir(),
            inventory_file: default_inventory_file(),
            extra_vars_file: None,
            become_root: true,
            ask_become_pass: true,
            verbose: true,
            port_forward_target: default_port_forward_target(),
            port_forward_ports: default_port_forward_ports(),
            dns_pod: default_dns_pod(),
        }
    }
}
