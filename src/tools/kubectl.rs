//! kubectl argument builders for the cluster database and DNS checks.

pub const KUBECTL: &str = "kubectl";

const SQL_CLIENT_POD: &str = "cockroachdb-client-secure";
const SQL_CERTS_DIR: &str = "/cockroach/cockroach-certs";
const SQL_HOST: &str = "cockroachdb-public";

/// Forwarded ports are reachable from other machines, not just loopback.
const PORT_FORWARD_ADDRESS: &str = "0.0.0.0";

/// `kubectl port-forward --address 0.0.0.0 <target> <local:remote>`.
pub fn port_forward_args(target: &str, ports: &str) -> Vec<String> {
    vec![
        "port-forward".to_string(),
        "--address".to_string(),
        PORT_FORWARD_ADDRESS.to_string(),
        target.to_string(),
        ports.to_string(),
    ]
}

/// Resolve `host` from inside the cluster via the DNS utilities pod.
pub fn nslookup_args(pod: &str, host: &str) -> Vec<String> {
    ["exec", "-it", pod, "--", "nslookup", host]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Interactive SQL shell on the in-cluster client pod.
pub fn sql_client_args(database: &str) -> Vec<String> {
    [
        "exec",
        "-it",
        SQL_CLIENT_POD,
        "--",
        "./cockroach",
        "sql",
        "--certs-dir",
        SQL_CERTS_DIR,
    ]
    .into_iter()
    .map(str::to_string)
    .chain([
        format!("--host={SQL_HOST}"),
        format!("--database={database}"),
    ])
    .collect()
}
