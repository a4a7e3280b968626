pub mod backends;
pub mod config;
pub mod error;
pub mod queue;
pub mod repository;
pub mod store;
pub mod types;

pub use backends::{FileMailRepository, MemoryMailQueue, MemoryMailRepository, TestMailRepository};
pub use config::{QueueConfig, RepositoryStoreConfig};
pub use error::{QueueError, RepositoryError, Result, SerializationError, ValidationError};
pub use queue::{CompletionStatus, MailQueue, QueueItem};
pub use repository::MailRepository;
pub use store::{MailRepositoryStore, Protocol, RepositoryUrl};
pub use types::MailKey;
