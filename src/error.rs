//! Error handling for the deimos engine
//!
//! Fatal conditions are `ScanError` values. Conditions that let an operation
//! continue on a reduced or substituted plan are `Notice` values carried on
//! the operation's report.

use serde::Serialize;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid target: {0}")]
    TargetInvalid(String),

    #[error("Port range error: {0}")]
    PortRangeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Permission denied: {0}")]
    PermissionError(String),

    #[error("Probe execution failed: {0}")]
    ProbeExecution(String),

    #[error("External tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl ScanError {
    /// Map an OS error from socket creation, keeping permission failures distinct
    pub fn from_socket_error(e: std::io::Error, what: &str) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ScanError::PermissionError(format!("{}: {}", what, e))
        } else {
            ScanError::NetworkError(format!("{}: {}", what, e))
        }
    }

    /// True for errors that mean the caller lacks raw-socket privileges
    pub fn is_permission(&self) -> bool {
        matches!(self, ScanError::PermissionError(_))
    }
}

/// Non-fatal conditions surfaced alongside results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// CIDR expansion exceeded the configured ceiling; only `kept` hosts are probed
    TruncatedWarning { requested: u64, kept: usize },
    /// Requested strategy needs privileges we do not hold; `used` was run instead
    PrivilegeDowngraded { requested: String, used: String, reason: String },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::TruncatedWarning { requested, kept } => write!(
                f,
                "target expands to {} hosts, truncated to the first {}",
                requested, kept
            ),
            Notice::PrivilegeDowngraded { requested, used, reason } => write!(
                f,
                "{} probing unavailable ({}), using {} probing instead",
                requested, reason, used
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_mapping() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let mapped = ScanError::from_socket_error(err, "raw socket");
        assert!(mapped.is_permission());

        let err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        let mapped = ScanError::from_socket_error(err, "raw socket");
        assert!(matches!(mapped, ScanError::NetworkError(_)));
    }

    #[test]
    fn test_notice_display() {
        let notice = Notice::TruncatedWarning { requested: 65534, kept: 1000 };
        assert_eq!(
            notice.to_string(),
            "target expands to 65534 hosts, truncated to the first 1000"
        );
    }
}
