use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use postern_common::Mail;

use crate::{MailKey, MailRepository, RepositoryError, Result};

/// In-memory mail repository.
///
/// Mails are kept in a `HashMap` behind an `RwLock`. Intended for tests and
/// for deployments that do not need the error repository to survive restarts.
/// An optional capacity makes `store` fail once the repository is full.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailRepository {
    pub(crate) mails: Arc<RwLock<HashMap<MailKey, Mail>>>,
    capacity: Option<usize>,
}

impl MemoryMailRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mails: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of stored mails.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mails.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MailRepository for MemoryMailRepository {
    async fn store(&self, mail: &Mail) -> Result<MailKey> {
        let key = MailKey::generate();

        let mut stored = mail.clone();
        stored.clear_diagnostic();

        let mut mails = self.mails.write();
        if let Some(capacity) = self.capacity
            && mails.len() >= capacity
        {
            return Err(RepositoryError::CapacityExceeded(capacity));
        }
        mails.insert(key, stored);

        Ok(key)
    }

    async fn list(&self) -> Result<Vec<MailKey>> {
        let mut keys: Vec<_> = self.mails.read().keys().copied().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn retrieve(&self, key: &MailKey) -> Result<Mail> {
        self.mails
            .read()
            .get(key)
            .cloned()
            .ok_or(RepositoryError::NotFound(*key))
    }

    async fn remove(&self, key: &MailKey) -> Result<()> {
        self.mails
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound(*key))
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.mails.read().len())
    }
}
