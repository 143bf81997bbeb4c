use thiserror::Error;

use crate::maya_client::ClientError;

#[derive(Error, Debug)]
pub enum ProvisionerError {
    /// Missing annotation or condition, or an input of the wrong shape.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unsupported fstype or access mode, missing snapshot id.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{operation} failed: {source}")]
    Upstream {
        operation: &'static str,
        #[source]
        source: ClientError,
    },

    /// The volume belongs to another provisioner instance. Callers skip it
    /// instead of backing off.
    #[error("identity annotation on PV does not match ours: owner '{owner}', identity '{identity}'")]
    OwnershipMismatch { owner: String, identity: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl ProvisionerError {
    pub fn upstream(operation: &'static str, source: ClientError) -> Self {
        ProvisionerError::Upstream { operation, source }
    }

    /// True for errors that signal "not ours" rather than a failed operation.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, ProvisionerError::OwnershipMismatch { .. })
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionerError::Config(_) => "config",
            ProvisionerError::Validation(_) => "validation",
            ProvisionerError::Upstream { .. } => "upstream",
            ProvisionerError::OwnershipMismatch { .. } => "ignored",
            ProvisionerError::NotFound(_) => "not_found",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ownership_mismatch_is_ignorable() {
        let mismatch = ProvisionerError::OwnershipMismatch {
            owner: "node-b".to_string(),
            identity: "node-a".to_string(),
        };
        assert!(mismatch.is_ignorable());
        assert_eq!(mismatch.kind(), "ignored");

        assert!(!ProvisionerError::Config("x".into()).is_ignorable());
        assert!(!ProvisionerError::Validation("x".into()).is_ignorable());
        assert!(!ProvisionerError::NotFound("x".into()).is_ignorable());
        let upstream = ProvisionerError::upstream(
            "create volume",
            ClientError::Status {
                status: 500,
                body: "boom".into(),
            },
        );
        assert!(!upstream.is_ignorable());
        assert_eq!(upstream.kind(), "upstream");
    }

    #[test]
    fn test_error_messages() {
        let err = ProvisionerError::Validation("Filesystem btrfs is not supported".into());
        assert_eq!(
            err.to_string(),
            "validation failed: Filesystem btrfs is not supported"
        );

        let err = ProvisionerError::upstream(
            "delete volume",
            ClientError::Status {
                status: 404,
                body: "volume not found".into(),
            },
        );
        assert!(err.to_string().starts_with("delete volume failed:"));
        assert!(err.to_string().contains("404"));
    }
}
