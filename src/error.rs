//! Error taxonomy shared by every backend and state container.
//!
//! Three families matter to callers:
//!
//! | Kind | Raised when | Backend called? |
//! |------|-------------|-----------------|
//! | [`ErrorKind::Configuration`] | a data source is selected without credentials | no |
//! | [`ErrorKind::Validation`] | a required field is empty or an upload is rejected | no |
//! | [`ErrorKind::Backend`] | the database, filesystem, or API failed | yes |
//!
//! Nothing is retried. The action boundary (the CLI) turns every error into
//! a one-line notification via [`NoteError::notification`].

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, NoteError>;

#[derive(Debug, thiserror::Error)]
pub enum NoteError {
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("{0}")]
    Backend(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Coarse classification used for user-facing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Backend,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Backend => "backend",
        };
        f.write_str(label)
    }
}

impl NoteError {
    pub fn config(message: impl Into<String>) -> Self {
        NoteError::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        NoteError::Validation(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        NoteError::Backend(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        NoteError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NoteError::Config(_) | NoteError::Auth(_) => ErrorKind::Configuration,
            NoteError::Validation(_) => ErrorKind::Validation,
            NoteError::Backend(_)
            | NoteError::NotFound { .. }
            | NoteError::Database(_)
            | NoteError::Http(_)
            | NoteError::Io(_)
            | NoteError::Serde(_) => ErrorKind::Backend,
        }
    }

    /// Render the error the way the action boundary shows it to the user.
    pub fn notification(&self) -> String {
        format!("error[{}]: {}", self.kind(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(NoteError::config("x").kind(), ErrorKind::Configuration);
        assert_eq!(NoteError::Auth("x".into()).kind(), ErrorKind::Configuration);
        assert_eq!(NoteError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(NoteError::not_found("note", "n1").kind(), ErrorKind::Backend);
    }

    #[test]
    fn notification_carries_kind_and_message() {
        let err = NoteError::validation("title must not be empty");
        assert_eq!(
            err.notification(),
            "error[validation]: title must not be empty"
        );
    }
}
