//! Error types shared by the pkd crates
//!
//! Errors carry the cluster name and, where known, the offending field of
//! `cluster.yaml` so an operator can fix the input without re-running with
//! debug logging.

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific cluster is known yet
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for cluster specification and manifest generation
#[derive(Debug, Error)]
pub enum Error {
    /// The cluster specification is incomplete or inconsistent
    #[error(
        "validation error for {cluster}: {}{message}",
        .field.as_ref().map(|f| format!("{f}: ")).unwrap_or_default()
    )]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "metadata.sshuser")
        field: Option<String>,
    },

    /// A file could not be read or written
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// YAML could not be parsed
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A generated object could not be encoded
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },
}

impl Error {
    /// Create a validation error without cluster context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an io error for a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Whether this error was caused by bad input rather than the environment
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Yaml(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_without_context_uses_unknown_cluster() {
        let err = Error::validation("missing name");
        assert_eq!(
            err.to_string(),
            "validation error for unknown: missing name"
        );
        assert!(err.is_validation());
    }

    #[test]
    fn validation_for_field_records_field() {
        let err = Error::validation_for_field("demo", "metadata.sshuser", "must not be empty");
        match err {
            Error::Validation { cluster, field, .. } => {
                assert_eq!(cluster, "demo");
                assert_eq!(field.as_deref(), Some("metadata.sshuser"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validation_message_names_the_field() {
        let err = Error::validation_for_field("demo", "metadata.sshuser", "must not be empty");
        assert_eq!(
            err.to_string(),
            "validation error for demo: metadata.sshuser: must not be empty"
        );
    }

    #[test]
    fn io_error_includes_path() {
        let err = Error::io(
            "resources/demo-Cluster.yaml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("resources/demo-Cluster.yaml"));
        assert!(!err.is_validation());
    }
}
