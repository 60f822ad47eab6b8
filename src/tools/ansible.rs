//! Ansible argument builders.

use std::path::{Path, PathBuf};

use crate::config::DeployConfig;

pub const ANSIBLE: &str = "ansible";
pub const ANSIBLE_PLAYBOOK: &str = "ansible-playbook";

/// Environment variable selecting Ansible's output plugin.
pub const STDOUT_CALLBACK_ENV: &str = "ANSIBLE_STDOUT_CALLBACK";

/// Output plugin for `deploy` runs.
pub const DEPLOY_STDOUT_CALLBACK: &str = "yaml";

/// OS package update, relative to the playbook tree.
pub const UPDATE_NODE_PLAYBOOK: &str = "node/update.yml";

/// OS release upgrade, relative to the playbook tree.
pub const RELEASE_UPGRADE_PLAYBOOK: &str = "node/upgrade-release.yml";

/// Entry playbook inside each service directory.
const DEPLOY_PLAYBOOK: &str = "build.yml";

/// Service whose variables live in an ansible-vault file.
const VAULTED_SERVICE: &str = "scrutiny";
const VAULTED_VARS_FILE: &str = "cfg.enc";

/// Options shared by playbook runs and ad-hoc commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnsibleOptions {
    pub user: String,
    pub build_dir: PathBuf,
    pub playbook_dir: PathBuf,
    pub inventory: PathBuf,
    pub extra_vars_file: Option<PathBuf>,
    pub become_root: bool,
    pub ask_become_pass: bool,
    pub ask_vault_pass: bool,
    pub verbose: bool,
}

impl From<&DeployConfig> for AnsibleOptions {
    fn from(deploy: &DeployConfig) -> Self {
        Self {
            user: deploy.user.clone(),
            build_dir: deploy.build_dir.clone(),
            playbook_dir: deploy.playbook_dir.clone(),
            inventory: deploy.inventory_file.clone(),
            extra_vars_file: deploy.extra_vars_file.clone(),
            become_root: deploy.become_root,
            ask_become_pass: deploy.ask_become_pass,
            ask_vault_pass: false,
            verbose: deploy.verbose,
        }
    }
}

impl AnsibleOptions {
    /// `<build_dir>/<playbook_dir>/<relative>`.
    pub fn playbook_path(&self, relative: &str) -> PathBuf {
        self.build_dir.join(&self.playbook_dir).join(relative)
    }

    fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            display(&self.inventory),
            "-u".to_string(),
            self.user.clone(),
        ];
        if self.become_root {
            args.push("--become".to_string());
            if self.ask_become_pass {
                args.push("--ask-become-pass".to_string());
            }
        }
        args
    }

    /// Arguments for `ansible-playbook` running `relative`.
    pub fn playbook_args(&self, relative: &str) -> Vec<String> {
        let mut args = self.connection_args();
        if self.ask_vault_pass {
            args.push("--ask-vault-pass".to_string());
        }
        if let Some(file) = &self.extra_vars_file {
            args.push("--extra-vars".to_string());
            args.push(format!("@{}", file.display()));
        }
        if self.verbose {
            args.push("-vv".to_string());
        }
        args.push(display(&self.playbook_path(relative)));
        args
    }

    /// Arguments for `ansible-playbook` deploying `service` from
    /// `<service>/build.yml`. The vaulted service also prompts for the
    /// vault password and loads its encrypted variables.
    pub fn deploy_args(&self, service: &str) -> Vec<String> {
        let mut opts = self.clone();
        if service == VAULTED_SERVICE {
            opts.ask_vault_pass = true;
            opts.extra_vars_file =
                Some(self.playbook_path(&format!("{VAULTED_SERVICE}/{VAULTED_VARS_FILE}")));
        }
        opts.playbook_args(&format!("{service}/{DEPLOY_PLAYBOOK}"))
    }

    /// Arguments for `ansible` pinging every inventory host.
    pub fn ping_args(&self) -> Vec<String> {
        let mut args = vec![
            "all".to_string(),
            "-m".to_string(),
            "ansible.builtin.ping".to_string(),
            "--one-line".to_string(),
        ];
        args.extend(self.connection_args());
        args
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> AnsibleOptions {
        AnsibleOptions::from(&DeployConfig {
            user: "ops".to_string(),
            build_dir: PathBuf::from("/srv/cluster"),
            inventory_file: PathBuf::from("hosts.yml"),
            ..DeployConfig::default()
        })
    }

    #[test]
    fn test_playbook_args() {
        let args = options().playbook_args(UPDATE_NODE_PLAYBOOK);
        assert_eq!(
            args,
            vec![
                "-i",
                "hosts.yml",
                "-u",
                "ops",
                "--become",
                "--ask-become-pass",
                "-vv",
                "/srv/cluster/playbooks/node/update.yml",
            ]
        );
    }

    #[test]
    fn test_playbook_args_extra_vars_and_quiet() {
        let mut opts = options();
        opts.extra_vars_file = Some(PathBuf::from("vars/cfg.enc"));
        opts.verbose = false;
        opts.become_root = false;

        let args = opts.playbook_args(RELEASE_UPGRADE_PLAYBOOK);
        assert!(!args.contains(&"--become".to_string()));
        assert!(!args.contains(&"--ask-become-pass".to_string()));
        assert!(!args.contains(&"--ask-vault-pass".to_string()));
        let pos = args.iter().position(|a| a == "--extra-vars").unwrap();
        assert_eq!(args[pos + 1], "@vars/cfg.enc");
        assert!(!args.contains(&"-vv".to_string()));
        assert_eq!(
            args.last().unwrap(),
            "/srv/cluster/playbooks/node/upgrade-release.yml"
        );
    }

    #[test]
    fn test_playbook_dir_is_configurable() {
        let opts = AnsibleOptions::from(&DeployConfig {
            build_dir: PathBuf::from("/srv/cluster"),
            playbook_dir: PathBuf::from("ansible"),
            ..DeployConfig::default()
        });
        assert_eq!(
            opts.playbook_path(UPDATE_NODE_PLAYBOOK),
            PathBuf::from("/srv/cluster/ansible/node/update.yml")
        );
    }

    #[test]
    fn test_deploy_args() {
        let args = options().deploy_args("grafana");
        assert_eq!(
            args,
            vec![
                "-i",
                "hosts.yml",
                "-u",
                "ops",
                "--become",
                "--ask-become-pass",
                "-vv",
                "/srv/cluster/playbooks/grafana/build.yml",
            ]
        );
    }

    #[test]
    fn test_deploy_args_vaulted_service() {
        let mut opts = options();
        opts.extra_vars_file = Some(PathBuf::from("vars/common.yml"));

        let args = opts.deploy_args("scrutiny");
        assert!(args.contains(&"--ask-vault-pass".to_string()));
        let pos = args.iter().position(|a| a == "--extra-vars").unwrap();
        assert_eq!(args[pos + 1], "@/srv/cluster/playbooks/scrutiny/cfg.enc");
        assert_eq!(args.iter().filter(|a| *a == "--extra-vars").count(), 1);
        assert_eq!(
            args.last().unwrap(),
            "/srv/cluster/playbooks/scrutiny/build.yml"
        );
        // The options themselves are left untouched.
        assert!(!opts.ask_vault_pass);
    }

    #[test]
    fn test_ping_args() {
        let args = options().ping_args();
        assert_eq!(&args[..4], ["all", "-m", "ansible.builtin.ping", "--one-line"]);
        assert!(args.contains(&"hosts.yml".to_string()));
        assert!(args.contains(&"--become".to_string()));
        assert!(!args.contains(&"-vv".to_string()));
    }
}
