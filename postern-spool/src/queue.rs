use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use postern_common::Mail;

use crate::QueueError;

/// Outcome reported back to the queue once an item has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The mail was fully handled (or durably handed elsewhere) and must not
    /// be delivered again.
    Success,
    /// The mail could not be handled; the queue should deliver it again.
    Reject,
}

/// A single delivery from a [`MailQueue`].
#[async_trait]
pub trait QueueItem: Send + Sync + Debug {
    /// The mail as it was dequeued. Processing works on a copy of this.
    fn mail(&self) -> &Mail;

    /// Acknowledges the item. Consumes it, so an item is acknowledged at most once.
    async fn done(self: Box<Self>, status: CompletionStatus) -> Result<(), QueueError>;
}

/// The durable queue feeding the spooler. Implementations own durability;
/// the processing engine only dequeues, acknowledges and re-enqueues.
#[async_trait]
pub trait MailQueue: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Adds a mail, optionally to become visible only after `delay`.
    async fn enqueue(&self, mail: Mail, delay: Option<Duration>) -> Result<(), QueueError>;

    /// Waits for the next item. Must be cancel safe: dropping the future
    /// before it completes must not lose a mail.
    async fn dequeue(&self) -> Result<Box<dyn QueueItem>, QueueError>;

    /// Stops handing out items. Pending `dequeue` calls fail with
    /// [`QueueError::Closed`].
    async fn close(&self);
}
