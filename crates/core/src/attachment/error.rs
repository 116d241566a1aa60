//! Attachment error types.

use thiserror::Error;

use crate::storage::StorageError;

/// Attachment lifecycle errors.
///
/// Only failures the caller has to act on are returned as errors. Object store
/// failures during deletion are classified into
/// [`DeleteOutcome`](super::DeleteOutcome) and logged instead.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Repository operation failed.
    #[error("repository error: {0}")]
    Repository(String),

    /// Payload could not be decoded into bytes.
    #[error("invalid content for {filename}: {reason}")]
    InvalidContent {
        /// Filename of the offending attachment.
        filename: String,
        /// Decoder message.
        reason: String,
    },

    /// Settings could not be read.
    #[error("settings error: {0}")]
    Settings(String),
}

impl AttachmentError {
    /// Create a repository error.
    #[must_use]
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }

    /// Create an invalid content error.
    #[must_use]
    pub fn invalid_content(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidContent {
            filename: filename.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure is operational (object store unreachable or not
    /// configured) rather than a catalog or input failure.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_recoverable() {
        let err = AttachmentError::from(StorageError::NotConfigured);
        assert!(err.is_recoverable());
        assert!(err.to_string().starts_with("storage error"));
    }

    #[test]
    fn test_catalog_and_input_errors_are_not_recoverable() {
        assert!(!AttachmentError::repository("connection reset").is_recoverable());
        assert!(!AttachmentError::invalid_content("a.pdf", "bad base64").is_recoverable());
        assert!(!AttachmentError::Settings("missing".into()).is_recoverable());
    }

    #[test]
    fn test_invalid_content_message() {
        let err = AttachmentError::invalid_content("report.pdf", "Invalid byte 33");
        assert_eq!(
            err.to_string(),
            "invalid content for report.pdf: Invalid byte 33"
        );
    }
}
