/// Errors surfaced by prompt operations.
///
/// `RemoteUnavailable` is a mode rather than a failure: callers that can
/// work locally treat it as "cloud sync off". `RemoteOperation` carries the
/// rendered error chain of a failed create/update/delete/tag-link call.
#[derive(thiserror::Error, Debug)]
pub enum PromptError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("cloud sync is not available")]
    RemoteUnavailable,

    #[error("remote operation failed: {0}")]
    RemoteOperation(String),

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("prompt not found: {0}")]
    NotFound(String),
}

impl PromptError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        PromptError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        PromptError::Storage(err.to_string())
    }

    pub fn remote(err: anyhow::Error) -> Self {
        PromptError::RemoteOperation(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_displays_field_and_message() {
        let err = PromptError::validation("title", "must not be empty");
        assert_eq!(err.to_string(), "invalid title: must not be empty");
    }

    #[test]
    fn remote_keeps_context_chain() {
        let inner = anyhow::anyhow!("connection refused").context("failed to create prompt");
        let err = PromptError::remote(inner);
        assert_eq!(
            err.to_string(),
            "remote operation failed: failed to create prompt: connection refused"
        );
        assert!(matches!(err, PromptError::RemoteOperation(_)));
    }

    #[test]
    fn storage_wraps_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = PromptError::storage(io_err);
        assert_eq!(err.to_string(), "storage error: read-only");
    }

    #[test]
    fn not_found_displays_id() {
        let err = PromptError::NotFound("1700000000000".into());
        assert_eq!(err.to_string(), "prompt not found: 1700000000000");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PromptError>();
    }
}
