//! Centralized error types for muttlearn.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors produced by the muttlearn library.
///
/// Problems local to a single message are not errors; they are reported as
/// [`Rejection`] and the message is skipped.
#[derive(Error, Debug)]
pub enum LearnError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The mailbox path does not exist.
    #[error("mailbox \"{0}\" does not exist")]
    MailboxNotFound(PathBuf),

    /// The path exists but is neither a known mailbox file nor directory.
    #[error("cannot recognize mailbox format of '{0}'")]
    UnknownMailboxFormat(PathBuf),

    /// The mailbox is structurally broken.
    #[error("corrupt mailbox '{path}': {reason}")]
    InvalidMailbox { path: PathBuf, reason: String },

    /// The configuration file is not valid TOML for [`crate::config::Config`].
    #[error("invalid configuration file '{path}': {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    /// A configured regular expression does not compile.
    #[error("{option} is invalid regexp: {source}")]
    InvalidPattern {
        option: String,
        source: regex::Error,
    },

    /// The configured weight formula is not one of the supported variants.
    #[error("weight_formula is invalid: {0}")]
    InvalidWeightFormula(String),

    /// The message cache or its metadata could not be decoded.
    #[error("corrupt message cache '{path}': {reason}")]
    InvalidCache { path: PathBuf, reason: String },

    /// Another process holds the cache lock.
    #[error("cache is locked by running process {pid}; remove the lock file if this is wrong")]
    CacheLocked { pid: u32 },

    /// The liveness check of the lock owner failed in an unexpected way.
    #[error("cannot check cache lock owner {pid}: {reason}")]
    LockCheckFailed { pid: u32, reason: String },

    /// Serializing a cache record failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias for `Result<T, LearnError>`.
pub type Result<T> = std::result::Result<T, LearnError>;

impl LearnError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `LearnError::io`).
impl From<std::io::Error> for LearnError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

impl From<bincode::Error> for LearnError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for LearnError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Why a single message was excluded from learning.
///
/// These are soft failures: they are logged at debug level and the scan
/// continues with the next message.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Rejection {
    /// A header (`From` / `To`) could not be decoded.
    #[error("can not decode {0}: header")]
    UndecodableHeader(String),
    #[error("mail has no sender")]
    NoSender,
    #[error("mail has no recipient")]
    NoRecipient,
    /// Multipart message without a `text/plain` part.
    #[error("{0} message contains no text/plain subpart")]
    NoTextPart(String),
    /// Single-part message that is not `text/plain`.
    #[error("content type {0} not supported")]
    UnsupportedContentType(String),
    /// The body failed to decode under every candidate charset.
    #[error("can not decode body as {0}")]
    UndecodableBody(String),
    /// Nothing left after newline normalization.
    #[error("empty body")]
    EmptyBody,
    /// A recipient is a mailing list and mailing lists are not personalized.
    #[error("recipient is a mailing list")]
    MailingList,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            Rejection::UndecodableHeader("From".to_string()).to_string(),
            "can not decode From: header"
        );
        assert_eq!(
            Rejection::NoTextPart("multipart/alternative".to_string()).to_string(),
            "multipart/alternative message contains no text/plain subpart"
        );
        assert_eq!(Rejection::MailingList.to_string(), "recipient is a mailing list");
    }
}
