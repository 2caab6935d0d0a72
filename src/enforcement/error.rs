//! Error types for the enforcement system
//!
//! Remote failures are classified once, at the platform boundary, so the retry
//! layer can decide between retrying, giving up, or treating the call as done.

use thiserror::Error;

/// Classification of a failed remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RemoteErrorKind {
    /// The bot lacks the permission for this action
    #[display("missing permissions")]
    MissingPermissions,
    /// The bot cannot see the guild or channel
    #[display("missing access")]
    MissingAccess,
    /// Messages cannot be delivered to the target
    #[display("cannot send messages")]
    CannotMessage,
    /// Unban target was not banned
    #[display("unknown ban")]
    UnknownBan,
    /// Guild, user or channel does not exist
    #[display("not found")]
    NotFound,
    /// Anything else, including timeouts and 5xx responses
    #[display("transient")]
    Transient,
}

impl RemoteErrorKind {
    /// Classify a Discord JSON error code
    #[must_use]
    pub fn from_code(code: isize) -> Self {
        match code {
            50013 => Self::MissingPermissions,
            50001 => Self::MissingAccess,
            50007 => Self::CannotMessage,
            10026 => Self::UnknownBan,
            10003 | 10004 | 10007 | 10013 => Self::NotFound,
            _ => Self::Transient,
        }
    }

    /// Whether retrying can never succeed
    #[must_use]
    pub fn is_access_denied(self) -> bool {
        matches!(
            self,
            Self::MissingPermissions | Self::MissingAccess | Self::CannotMessage
        )
    }
}

/// A failed call against the remote guild platform
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }
}

impl From<poise::serenity_prelude::Error> for RemoteError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        use poise::serenity_prelude::{Error as SerenityError, HttpError};

        let kind = match &error {
            SerenityError::Http(HttpError::UnsuccessfulRequest(response)) => {
                RemoteErrorKind::from_code(response.error.code)
            }
            _ => RemoteErrorKind::Transient,
        };
        Self::new(kind, error.to_string())
    }
}

/// Errors raised by the persistent store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur during enforcement operations
#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Discord API error: {0}")]
    Remote(#[from] RemoteError),

    /// Operator tried to add an entry that already exists
    #[error("Already blacklisted: {0}")]
    AlreadyBlacklisted(u64),

    /// Operator tried to remove an entry that does not exist
    #[error("Not blacklisted: {0}")]
    NotBlacklisted(u64),

    /// Generic error
    #[error("Enforcement error: {0}")]
    Other(String),
}

impl From<String> for EnforcementError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

/// Result type for enforcement operations
pub type EnforcementResult<T> = Result<T, EnforcementError>;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
