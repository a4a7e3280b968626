use serde::Deserialize;

use crate::{MailRepositoryStore, MemoryMailQueue, Protocol};

/// Configuration of the repository store.
///
/// ```ron
/// repositories: (
///     default_protocol: File,
/// ),
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryStoreConfig {
    #[serde(default)]
    pub default_protocol: Protocol,
}

impl RepositoryStoreConfig {
    #[must_use]
    pub fn into_store(self) -> MailRepositoryStore {
        MailRepositoryStore::new(self.default_protocol)
    }
}

/// Configuration of the spool queue.
///
/// ```ron
/// queue: (
///     name: "spool",
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "QueueConfig::default_name")]
    pub name: String,
}

impl QueueConfig {
    fn default_name() -> String {
        String::from("spool")
    }

    #[must_use]
    pub fn into_queue(self) -> MemoryMailQueue {
        MemoryMailQueue::new(self.name)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
        }
    }
}
