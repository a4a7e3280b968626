use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use postern_common::{Mail, internal};
use tokio::sync::Notify;

use crate::{CompletionStatus, MailQueue, QueueError, QueueItem};

/// Counters describing what happened to the items of a [`MemoryMailQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Mails ready to be dequeued.
    pub ready: usize,
    /// Successful `enqueue` calls, including delayed ones that are not yet ready.
    pub enqueued: usize,
    /// Items acknowledged with [`CompletionStatus::Success`].
    pub acknowledged: usize,
    /// Items acknowledged with [`CompletionStatus::Reject`], or dropped without
    /// any acknowledgement.
    pub rejected: usize,
}

#[derive(Debug)]
struct Shared {
    name: String,
    ready: Mutex<VecDeque<Mail>>,
    available: Notify,
    settled: Notify,
    closed: AtomicBool,
    enqueued: AtomicUsize,
    acknowledged: AtomicUsize,
    rejected: AtomicUsize,
}

impl Shared {
    fn push(&self, mail: Mail) {
        self.ready.lock().push_back(mail);
        self.available.notify_one();
    }

    fn pop(&self) -> Option<Mail> {
        self.ready.lock().pop_front()
    }

    fn settle(&self, status: CompletionStatus) {
        match status {
            CompletionStatus::Success => self.acknowledged.fetch_add(1, Ordering::AcqRel),
            CompletionStatus::Reject => self.rejected.fetch_add(1, Ordering::AcqRel),
        };
        self.settled.notify_waiters();
    }
}

/// Non-durable queue kept in process memory.
///
/// Rejected items, and items dropped without being acknowledged, are put back
/// at the end of the queue, the way a broker redelivers unacknowledged messages.
/// Delayed enqueues become visible once their delay elapses.
#[derive(Debug, Clone)]
pub struct MemoryMailQueue {
    shared: Arc<Shared>,
}

impl MemoryMailQueue {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                ready: Mutex::new(VecDeque::new()),
                available: Notify::new(),
                settled: Notify::new(),
                closed: AtomicBool::new(false),
                enqueued: AtomicUsize::new(0),
                acknowledged: AtomicUsize::new(0),
                rejected: AtomicUsize::new(0),
            }),
        }
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            ready: self.shared.ready.lock().len(),
            enqueued: self.shared.enqueued.load(Ordering::Acquire),
            acknowledged: self.shared.acknowledged.load(Ordering::Acquire),
            rejected: self.shared.rejected.load(Ordering::Acquire),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Removes and returns every ready mail without acknowledging anything.
    pub fn drain(&self) -> Vec<Mail> {
        self.shared.ready.lock().drain(..).collect()
    }

    /// Waits until the queue statistics satisfy `condition`.
    ///
    /// # Errors
    /// Returns an error if `timeout` elapses first.
    pub async fn wait_for(
        &self,
        condition: impl Fn(&QueueStats) -> bool + Send,
        timeout: Duration,
    ) -> Result<QueueStats, tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, async {
            loop {
                let settled = self.shared.settled.notified();
                tokio::pin!(settled);
                settled.as_mut().enable();

                let stats = self.stats();
                if condition(&stats) {
                    return stats;
                }

                settled.await;
            }
        })
        .await
    }
}

#[async_trait]
impl MailQueue for MemoryMailQueue {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn enqueue(&self, mut mail: Mail, delay: Option<Duration>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.shared.name.clone()));
        }

        mail.clear_diagnostic();
        self.shared.enqueued.fetch_add(1, Ordering::AcqRel);

        match delay {
            Some(delay) if !delay.is_zero() => {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.push(mail);
                });
            }
            _ => self.shared.push(mail),
        }

        self.shared.settled.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Box<dyn QueueItem>, QueueError> {
        loop {
            let available = self.shared.available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            if self.is_closed() {
                return Err(QueueError::Closed(self.shared.name.clone()));
            }

            if let Some(mail) = self.shared.pop() {
                return Ok(Box::new(MemoryQueueItem {
                    mail,
                    shared: Arc::clone(&self.shared),
                    acknowledged: false,
                }));
            }

            available.await;
        }
    }

    async fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            internal!(level = DEBUG, "Closing queue {}", self.shared.name);
        }
        self.shared.available.notify_waiters();
    }
}

#[derive(Debug)]
struct MemoryQueueItem {
    mail: Mail,
    shared: Arc<Shared>,
    acknowledged: bool,
}

#[async_trait]
impl QueueItem for MemoryQueueItem {
    fn mail(&self) -> &Mail {
        &self.mail
    }

    async fn done(self: Box<Self>, status: CompletionStatus) -> Result<(), QueueError> {
        let mut item = self;
        item.acknowledged = true;

        if status == CompletionStatus::Reject {
            item.shared.push(item.mail.clone());
        }
        item.shared.settle(status);

        Ok(())
    }
}

impl Drop for MemoryQueueItem {
    fn drop(&mut self) {
        if !self.acknowledged {
            tracing::warn!(
                mail = %self.mail.name(),
                queue = %self.shared.name,
                "Queue item dropped without acknowledgement, returning it to the queue"
            );
            self.shared.push(self.mail.clone());
            self.shared.settle(CompletionStatus::Reject);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    fn mail(name: &str) -> Mail {
        Mail::builder()
            .name(name)
            .recipient("a@example.com".parse().unwrap())
            .build()
    }

    #[tokio::test]
    async fn fifo_order_and_acknowledgement() {
        let queue = MemoryMailQueue::new("spool");
        queue.enqueue(mail("first"), None).await.unwrap();
        queue.enqueue(mail("second"), None).await.unwrap();

        let item = queue.dequeue().await.unwrap();
        assert_eq!(item.mail().name(), "first");
        item.done(CompletionStatus::Success).await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.acknowledged, 1);
    }

    #[tokio::test]
    async fn rejected_items_are_redelivered() {
        let queue = MemoryMailQueue::new("spool");
        queue.enqueue(mail("m"), None).await.unwrap();

        let item = queue.dequeue().await.unwrap();
        item.done(CompletionStatus::Reject).await.unwrap();

        let again = queue.dequeue().await.unwrap();
        assert_eq!(again.mail().name(), "m");
        assert_eq!(queue.stats().rejected, 1);
        again.done(CompletionStatus::Success).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_items_are_redelivered() {
        let queue = MemoryMailQueue::new("spool");
        queue.enqueue(mail("m"), None).await.unwrap();

        drop(queue.dequeue().await.unwrap());

        assert_eq!(queue.stats().ready, 1);
        assert_eq!(queue.stats().rejected, 1);
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let queue = MemoryMailQueue::new("spool");
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await.map(|item| item.mail().name().to_owned()) })
        };

        tokio::task::yield_now().await;
        queue.enqueue(mail("late"), None).await.unwrap();

        let name = consumer.await.unwrap().unwrap();
        assert_eq!(name, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_enqueue_becomes_visible_later() {
        let queue = MemoryMailQueue::new("spool");
        queue
            .enqueue(mail("later"), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(queue.stats().ready, 0);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(queue.stats().ready, 1);
    }

    #[tokio::test]
    async fn close_wakes_pending_dequeue() {
        let queue = MemoryMailQueue::new("spool");
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await.map(|_| ()) })
        };

        tokio::task::yield_now().await;
        queue.close().await;

        assert!(matches!(consumer.await.unwrap(), Err(QueueError::Closed(_))));
        assert!(queue.enqueue(mail("m"), None).await.is_err());
    }

    #[tokio::test]
    async fn enqueue_clears_diagnostics() {
        let queue = MemoryMailQueue::new("spool");
        let mut m = mail("m");
        m.set_diagnostic(Arc::new(std::io::Error::other("cause")));
        queue.enqueue(m, None).await.unwrap();

        let item = queue.dequeue().await.unwrap();
        assert!(item.mail().diagnostic().is_none());
        item.done(CompletionStatus::Success).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_and_consumers() {
        let queue = MemoryMailQueue::new("spool");

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        queue.enqueue(mail(&format!("m{p}-{i}")), None).await.unwrap();
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        let item = queue.dequeue().await.unwrap();
                        item.done(CompletionStatus::Success).await.unwrap();
                    }
                })
            })
            .collect();

        for handle in producers.into_iter().chain(consumers) {
            handle.await.unwrap();
        }

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 100);
        assert_eq!(stats.acknowledged, 80);
        assert_eq!(stats.ready, 20);
        assert_eq!(queue.drain().len(), 20);
        assert_eq!(queue.stats().ready, 0);
    }
}
