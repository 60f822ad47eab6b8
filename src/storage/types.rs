//! Core data types for the storage layer.
//!
//! - [`LogRow`]: A persisted heartbeat record
//! - [`AppendRequest`]: A check-in submitted by a node
//! - [`LogQuery`]: Host-scoped history/freshness query

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

/// Default number of rows returned by a read.
pub const DEFAULT_LIMIT: u32 = 100;

/// Upper bound on rows returned by a single read.
pub const MAX_LIMIT: u32 = 10_000;

/// Maximum length of a host identifier (matches the `host` column width).
pub const MAX_HOST_LEN: usize = 255;

/// Maximum length of the `arch` field.
pub const MAX_ARCH_LEN: usize = 64;

/// Maximum length of the `kernelVersion` field.
pub const MAX_KERNEL_VERSION_LEN: usize = 255;

/// A heartbeat record stored in the `logs` table.
///
/// Rows are append-only. `created_at` is always set by the store's clock at
/// insert time and never taken from the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LogRow {
    /// Reporting node.
    pub host: String,
    /// CPU architecture reported by the node.
    pub arch: Option<String>,
    /// Kernel release reported by the node.
    pub kernel_version: Option<String>,
    /// Server-assigned insert time (UTC).
    pub created_at: DateTime<Utc>,
}

/// A check-in submitted by a node.
///
/// Field aliases accept the capitalised names sent by older Go clients,
/// including the historical `KernalVersion` spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    #[serde(default, alias = "Host")]
    pub host: String,

    #[serde(default, alias = "Arch")]
    pub arch: Option<String>,

    #[serde(
        default,
        alias = "KernelVersion",
        alias = "KernalVersion",
        alias = "kernalVersion"
    )]
    pub kernel_version: Option<String>,
}

impl AppendRequest {
    /// Create a request for a host with no descriptive fields.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            arch: None,
            kernel_version: None,
        }
    }

    /// Attach the node architecture.
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    /// Attach the node kernel version.
    pub fn with_kernel_version(mut self, version: impl Into<String>) -> Self {
        self.kernel_version = Some(version.into());
        self
    }

    /// Trim whitespace and turn empty optional fields into `None`.
    #[must_use]
    pub fn normalized(self) -> Self {
        fn non_empty(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            host: self.host.trim().to_string(),
            arch: non_empty(self.arch),
            kernel_version: non_empty(self.kernel_version),
        }
    }

    /// Validate field presence and column widths.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidData` describing the first invalid field.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.host.is_empty() {
            return Err(StorageError::InvalidData("missing host".to_string()));
        }
        if self.host.len() > MAX_HOST_LEN {
            return Err(StorageError::InvalidData(format!(
                "host exceeds {MAX_HOST_LEN} bytes"
            )));
        }
        if self.arch.as_ref().is_some_and(|a| a.len() > MAX_ARCH_LEN) {
            return Err(StorageError::InvalidData(format!(
                "arch exceeds {MAX_ARCH_LEN} bytes"
            )));
        }
        if self
            .kernel_version
            .as_ref()
            .is_some_and(|k| k.len() > MAX_KERNEL_VERSION_LEN)
        {
            return Err(StorageError::InvalidData(format!(
                "kernelVersion exceeds {MAX_KERNEL_VERSION_LEN} bytes"
            )));
        }
        Ok(())
    }
}

/// Host-scoped read query.
///
/// `since` is a freshness window in minutes. When it is non-zero only rows
/// created within the last `since` minutes are returned; when it is zero the
/// most recent `limit` rows are returned unconditionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub host: String,
    pub since: u8,
    pub limit: u32,
}

impl LogQuery {
    /// History query with the default limit and no window.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            since: 0,
            limit: DEFAULT_LIMIT,
        }
    }

    /// Query for the single most recent row of a host.
    pub fn last(host: impl Into<String>) -> Self {
        Self::new(host).with_limit(1)
    }

    /// Restrict results to the last `minutes` minutes.
    pub fn with_since(mut self, minutes: u8) -> Self {
        self.since = minutes;
        self
    }

    /// Set the row limit, clamped to [`MAX_LIMIT`].
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.min(MAX_LIMIT);
        self
    }

    /// Whether the freshness window applies.
    pub fn is_windowed(&self) -> bool {
        self.since > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_request_accepts_legacy_field_names() {
        let req: AppendRequest = serde_json::from_str(
            r#"{"Host":"node-1","Arch":"aarch64","KernalVersion":"6.1.0"}"#,
        )
        .unwrap();
        assert_eq!(req.host, "node-1");
        assert_eq!(req.arch.as_deref(), Some("aarch64"));
        assert_eq!(req.kernel_version.as_deref(), Some("6.1.0"));
    }

    #[test]
    fn test_append_request_camel_case() {
        let req: AppendRequest =
            serde_json::from_str(r#"{"host":"node-2","kernelVersion":"6.8.0"}"#).unwrap();
        assert_eq!(req, AppendRequest::new("node-2").with_kernel_version("6.8.0"));
    }

    #[test]
    fn test_append_request_absent_host_fails_validation() {
        let req: AppendRequest = serde_json::from_str(r#"{"arch":"x86_64"}"#).unwrap();
        let err = req.normalized().validate().unwrap_err();
        assert!(err.to_string().contains("missing host"));
    }

    #[test]
    fn test_normalized_trims_and_drops_empty_fields() {
        let req = AppendRequest {
            host: "  node-3 ".to_string(),
            arch: Some(String::new()),
            kernel_version: Some(" 6.1 ".to_string()),
        }
        .normalized();
        assert_eq!(req.host, "node-3");
        assert_eq!(req.arch, None);
        assert_eq!(req.kernel_version.as_deref(), Some("6.1"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_fields() {
        let long_host = "h".repeat(MAX_HOST_LEN + 1);
        assert!(AppendRequest::new(long_host).validate().is_err());

        let long_arch = AppendRequest::new("node").with_arch("a".repeat(MAX_ARCH_LEN + 1));
        assert!(long_arch.validate().is_err());
    }

    #[test]
    fn test_log_query_defaults_and_clamp() {
        let q = LogQuery::new("node-1");
        assert_eq!(q.limit, DEFAULT_LIMIT);
        assert!(!q.is_windowed());

        let q = LogQuery::new("node-1").with_limit(50_000).with_since(10);
        assert_eq!(q.limit, MAX_LIMIT);
        assert!(q.is_windowed());

        assert_eq!(LogQuery::last("node-1").limit, 1);
    }

    #[test]
    fn test_log_row_serializes_camel_case() {
        let row = LogRow {
            host: "node-1".to_string(),
            arch: None,
            kernel_version: Some("6.1".to_string()),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["host"], "node-1");
        assert_eq!(value["kernelVersion"], "6.1");
        assert!(value.get("createdAt").is_some());
    }
}
