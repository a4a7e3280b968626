use std::fmt::Debug;

use async_trait::async_trait;
use postern_common::Mail;

use crate::{MailKey, Result};

/// Storage for mails that need operator attention, such as mails that failed
/// processing too many times.
#[async_trait]
pub trait MailRepository: Send + Sync + Debug {
    /// Stores a copy of `mail`, returning the key it was stored under.
    async fn store(&self, mail: &Mail) -> Result<MailKey>;

    /// Keys of every stored mail, oldest first.
    async fn list(&self) -> Result<Vec<MailKey>>;

    async fn retrieve(&self, key: &MailKey) -> Result<Mail>;

    async fn remove(&self, key: &MailKey) -> Result<()>;

    async fn size(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}
