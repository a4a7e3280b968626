//! Error types for the postern-spool crate.
//!
//! Queue and repository failures are operational errors: the processing engine
//! reacts to them by rejecting the queue item, never by retrying on its own.

use std::io;

use thiserror::Error;

use crate::MailKey;

/// Failures raised by a [`crate::MailQueue`] or one of its items.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was closed; no further items will be dequeued.
    #[error("Queue {0} is closed")]
    Closed(String),

    /// The item was already acknowledged.
    #[error("Queue item for {0} was already acknowledged")]
    Acknowledged(String),

    /// The backend refused the operation.
    #[error("Queue {queue} rejected the operation: {reason}")]
    Rejected { queue: String, reason: String },

    #[error("Queue I/O error: {0}")]
    Io(#[from] io::Error),
}

impl QueueError {
    /// Returns `true` if the queue will never yield another item.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Failures raised by a [`crate::MailRepository`] or while resolving one.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Repository I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Mail not found: {0}")]
    NotFound(MailKey),

    /// Repository location validation failed.
    #[error("Repository validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid repository URL {0:?}, expected <protocol>://<path>")]
    InvalidUrl(String),

    #[error("Unsupported repository protocol {0:?}")]
    UnsupportedProtocol(String),

    #[error("Repository capacity exceeded: {0} mails")]
    CapacityExceeded(usize),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Repository location validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Repository path cannot contain '..' components: {0}")]
    ParentTraversal(String),

    #[error("Repository path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },

    #[error("Repository path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
