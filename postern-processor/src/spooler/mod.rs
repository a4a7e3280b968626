//! The spooler: a bounded pool of workers pulling mails off the spool queue and
//! routing each through the dispatch table.

mod worker;

use std::{
    sync::{Arc, atomic::AtomicUsize},
    time::Duration,
};

use parking_lot::Mutex;
use postern_common::{Signal, internal};
use postern_spool::{MailQueue, MailRepository, MailRepositoryStore};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Semaphore, broadcast, watch},
    task::{JoinHandle, JoinSet},
};

pub use self::worker::MAX_FAILURE_COUNT;
use self::worker::Worker;
use crate::{
    dispatch::{DEFAULT_MAX_HOPS, DispatchTable},
    error::SpoolerError,
    interrupt::{Interrupt, InterruptHandle},
};

const fn default_threads() -> usize {
    100
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_interrupt_grace_secs() -> u64 {
    5
}

const fn default_max_hops() -> usize {
    DEFAULT_MAX_HOPS
}

const fn default_dequeue_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolerConfig {
    /// Maximum number of mails processed concurrently. Zero disables the spooler.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// URL of the repository exhausted mails are stored in. Defaults to
    /// `var/mail/error/` under the store's default protocol.
    #[serde(default)]
    pub error_repository: Option<String>,

    /// How long shutdown waits for in-flight mails before interrupting them.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// How long interrupted workers get to wind down before they are aborted.
    #[serde(default = "default_interrupt_grace_secs")]
    pub interrupt_grace_secs: u64,

    /// Reroutes allowed while processing one dequeued mail.
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Pause after a dequeue error that does not mean the queue is closed.
    #[serde(default = "default_dequeue_backoff_ms")]
    pub dequeue_backoff_ms: u64,
}

impl Default for SpoolerConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            error_repository: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            interrupt_grace_secs: default_interrupt_grace_secs(),
            max_hops: default_max_hops(),
            dequeue_backoff_ms: default_dequeue_backoff_ms(),
        }
    }
}

impl SpoolerConfig {
    /// The error repository URL, resolved against the store's default protocol.
    #[must_use]
    pub fn error_repository_url(&self, store: &MailRepositoryStore) -> String {
        self.error_repository
            .clone()
            .unwrap_or_else(|| store.default_url("var/mail/error/").to_string())
    }
}

/// One generation of the dequeue loop.
#[derive(Debug)]
struct Runner {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Runner {
    fn spawn(worker: Arc<Worker>, config: SpoolerConfig) -> Self {
        let (stop, stopped) = watch::channel(false);
        let handle = tokio::spawn(run(worker, config, stopped));
        Self { stop, handle }
    }

    /// Stops dequeueing and waits for the in-flight mails to be settled.
    async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Spooler loop ended abnormally");
        }
    }
}

/// Pulls mails off the queue and processes up to `threads` of them at a time.
#[derive(Debug)]
pub struct MailSpooler {
    config: SpoolerConfig,
    worker: Arc<Worker>,
    runner: Mutex<Option<Runner>>,
    /// Loops replaced by `restart` that may still be draining.
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl MailSpooler {
    pub fn new(
        config: SpoolerConfig,
        dispatcher: Arc<DispatchTable>,
        queue: Arc<dyn MailQueue>,
        error_repository: Arc<dyn MailRepository>,
    ) -> Self {
        Self {
            config,
            worker: Arc::new(Worker {
                dispatcher,
                queue,
                error_repository,
                in_flight: AtomicUsize::new(0),
            }),
            runner: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Builds a spooler whose error repository is resolved through `store`.
    ///
    /// # Errors
    /// If the error repository cannot be opened
    pub async fn with_store(
        config: SpoolerConfig,
        dispatcher: Arc<DispatchTable>,
        queue: Arc<dyn MailQueue>,
        store: &MailRepositoryStore,
    ) -> Result<Self, SpoolerError> {
        let error_repository = store.select(&config.error_repository_url(store)).await?;
        Ok(Self::new(config, dispatcher, queue, error_repository))
    }

    pub const fn config(&self) -> &SpoolerConfig {
        &self.config
    }

    /// Mails currently being processed.
    pub fn in_flight(&self) -> usize {
        self.worker
            .in_flight
            .load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.runner.lock().is_some()
    }

    /// Starts dequeueing. Does nothing if already running, or if the spooler is
    /// configured with zero threads.
    pub fn start(&self) {
        if self.config.threads == 0 {
            internal!(level = INFO, "Spooler is configured with 0 threads, not starting");
            return;
        }

        let mut runner = self.runner.lock();
        if runner.is_some() {
            internal!(level = DEBUG, "Spooler is already running");
            return;
        }

        internal!(
            level = INFO,
            "Starting spooler on queue {} with {} threads",
            self.worker.queue.name(),
            self.config.threads
        );
        *runner = Some(Runner::spawn(Arc::clone(&self.worker), self.config.clone()));
    }

    /// Replaces the running dequeue loop with a fresh one. The old loop stops
    /// dequeueing and drains its in-flight mails in the background.
    pub fn restart(&self) {
        if self.config.threads == 0 {
            return;
        }

        let fresh = Runner::spawn(Arc::clone(&self.worker), self.config.clone());
        let previous = self.runner.lock().replace(fresh);

        internal!(level = INFO, "Spooler restarted");

        if let Some(previous) = previous {
            let mut retired = self.retired.lock();
            retired.retain(|handle| !handle.is_finished());
            retired.push(tokio::spawn(previous.stop()));
        }
    }

    /// Stops dequeueing, waits for in-flight mails, then closes the queue.
    ///
    /// Mails still running after `shutdown_timeout_secs` are interrupted, and
    /// aborted after a further `interrupt_grace_secs`. Their queue items are
    /// not acknowledged, so the queue delivers them again. Loops replaced by
    /// [`MailSpooler::restart`] are waited for as well.
    pub async fn shutdown(&self) {
        let runner = self.runner.lock().take();

        if let Some(runner) = runner {
            internal!(level = INFO, "Stopping spooler");
            runner.stop().await;
        }

        let retired = std::mem::take(&mut *self.retired.lock());
        for handle in retired {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Restarted spooler loop ended abnormally");
            }
        }

        self.worker.queue.close().await;
        internal!(level = INFO, "Spooler stopped");
    }

    /// Runs until a shutdown signal is broadcast, then shuts down.
    pub async fn serve(&self, mut signal: broadcast::Receiver<Signal>) {
        self.start();

        loop {
            match signal.recv().await {
                Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                Ok(Signal::Finalised) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    internal!(level = DEBUG, "Spooler missed {skipped} signals");
                }
            }
        }

        self.shutdown().await;
    }
}

async fn run(worker: Arc<Worker>, config: SpoolerConfig, mut stop: watch::Receiver<bool>) {
    let permits = Arc::new(Semaphore::new(config.threads));
    let (interrupt_handle, interrupt) = Interrupt::channel();
    let backoff = Duration::from_millis(config.dequeue_backoff_ms);
    let mut workers = JoinSet::new();

    loop {
        while let Some(joined) = workers.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Spooler worker panicked");
            }
        }

        let stopping = *stop.borrow();
        if stopping {
            break;
        }

        let permit = tokio::select! {
            biased;

            _ = stop.changed() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let item = tokio::select! {
            biased;

            _ = stop.changed() => break,
            item = worker.queue.dequeue() => item,
        };

        match item {
            Ok(item) => {
                let worker = Arc::clone(&worker);
                let interrupt = interrupt.clone();
                workers.spawn(async move {
                    worker.process(item, &interrupt).await;
                    drop(permit);
                });
            }
            Err(e) if e.is_closed() => {
                internal!(level = INFO, "Queue closed, spooler stops dequeueing");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to dequeue mail, retrying in {backoff:?}");
                drop(permit);
                tokio::select! {
                    _ = stop.changed() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    drain(workers, &config, &interrupt_handle).await;
}

async fn join_all(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Spooler worker panicked");
        }
    }
}

async fn drain(mut workers: JoinSet<()>, config: &SpoolerConfig, interrupt: &InterruptHandle) {
    if workers.is_empty() {
        return;
    }

    internal!(
        level = INFO,
        "Waiting for {} in-flight mails to finish",
        workers.len()
    );

    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(timeout, join_all(&mut workers))
        .await
        .is_ok()
    {
        return;
    }

    tracing::warn!(
        remaining = workers.len(),
        "In-flight mails did not finish within {timeout:?}, interrupting them"
    );
    interrupt.interrupt();

    let grace = Duration::from_secs(config.interrupt_grace_secs);
    if tokio::time::timeout(grace, join_all(&mut workers))
        .await
        .is_ok()
    {
        return;
    }

    tracing::warn!(
        remaining = workers.len(),
        "Aborting in-flight mails; they will be delivered again"
    );
    workers.abort_all();
    while workers.join_next().await.is_some() {}
}
