//! External tool wrappers.
//!
//! The CLI drives `ansible-playbook`, `ansible` and `kubectl` through the
//! [`ExternalTool`] trait. This module only builds argument lists and checks
//! exit statuses; what the tools do is owned by the tools themselves.

mod ansible;
mod external;
mod kubectl;

pub use ansible::{
    ANSIBLE, ANSIBLE_PLAYBOOK, AnsibleOptions, DEPLOY_STDOUT_CALLBACK, RELEASE_UPGRADE_PLAYBOOK,
    STDOUT_CALLBACK_ENV, UPDATE_NODE_PLAYBOOK,
};
pub use external::{ExternalTool, ProcessTool, ToolError, run_checked};
pub use kubectl::{KUBECTL, nslookup_args, port_forward_args, sql_client_args};
