//! Common result and error types for the Cascade runtime.

/// The standard result type for fallible internal operations.
///
/// `Err` indicates an unrecoverable internal error (a bug in Cascade), not a
/// user-facing problem. User errors — parse, declaration, elaboration, and
/// compilation failures — are reported through the diagnostics sink and the
/// operation still returns `Ok` with a degraded result.
pub type CascadeResult<T> = Result<T, InternalError>;

/// An internal runtime error indicating a bug in Cascade, not bad user input.
#[derive(Debug, thiserror::Error)]
#[error("internal runtime error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let err = InternalError::new("engine slot vanished");
        assert_eq!(
            format!("{err}"),
            "internal runtime error: engine slot vanished"
        );
    }

    #[test]
    fn from_string() {
        let err: InternalError = "from string".to_string().into();
        assert_eq!(err.message, "from string");
    }
}
