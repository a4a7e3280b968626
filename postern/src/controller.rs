use std::sync::{Arc, LazyLock};

use postern_common::{Signal, internal, logging};
use postern_metrics::MetricsConfig;
use postern_processor::{MailSpooler, MailetContext, ProcessorsConfig, Registry, SpoolerConfig};
use postern_spool::{MailQueue, QueueConfig, RepositoryStoreConfig};
use postern_tracing::traced;
use serde::Deserialize;
use tokio::sync::broadcast;

/// Top level configuration of a postern container.
///
/// Every section is optional; an empty `()` runs the default pipeline, which
/// stores every mail under `var/mail/outgoing/`.
#[derive(Debug, Default, Deserialize)]
pub struct Postern {
    #[serde(default)]
    spooler: SpoolerConfig,
    #[serde(alias = "repository", default)]
    repositories: RepositoryStoreConfig,
    #[serde(alias = "spool", default)]
    queue: QueueConfig,
    #[serde(alias = "processor", default)]
    processors: ProcessorsConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

impl Postern {
    /// Run the container until it is asked to shut down
    ///
    /// # Errors
    ///
    /// This function will return an error if metrics, the processor pipeline
    /// or the error repository fail to initialise.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        postern_metrics::init_metrics(&self.metrics)?;

        internal!("Controller running");

        let store = Arc::new(self.repositories.into_store());
        let queue: Arc<dyn MailQueue> = Arc::new(self.queue.into_queue());
        let context = MailetContext::new(Arc::clone(&store)).with_queue(Arc::clone(&queue));

        let dispatcher = self
            .processors
            .load(&Registry::builtin(), &context)?
            .max_hops(self.spooler.max_hops)
            .build()?;

        let spooler =
            MailSpooler::with_store(self.spooler, Arc::new(dispatcher), queue, &store).await?;

        // Subscribe before the signal handler can broadcast.
        let signal = SHUTDOWN_BROADCAST.subscribe();
        let ((), signalled) = tokio::join!(spooler.serve(signal), async {
            let result = shutdown().await;
            if result.is_err() {
                // The spooler only stops on the broadcast.
                let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
            }
            result
        });

        internal!("Shutting down...");

        signalled
    }
}
