use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use futures_util::FutureExt;
use postern_common::{internal, processing};
use postern_metrics::SpoolerOutcome;
use postern_spool::{CompletionStatus, MailQueue, MailRepository, QueueItem};
use postern_tracing::traced;

use crate::{
    dispatch::DispatchTable,
    error::{ProcessingError, SpoolerError},
    interrupt::Interrupt,
};

/// Consecutive failures tolerated before a mail is moved to the error
/// repository.
pub const MAX_FAILURE_COUNT: u32 = 5;

/// State shared by every worker of a spooler, across restarts.
#[derive(Debug)]
pub(crate) struct Worker {
    pub dispatcher: Arc<DispatchTable>,
    pub queue: Arc<dyn MailQueue>,
    pub error_repository: Arc<dyn MailRepository>,
    pub in_flight: AtomicUsize,
}

impl Worker {
    /// Routes one dequeued mail and settles its queue item.
    ///
    /// A failed mail is put back on the queue with its failure count raised,
    /// or stored in the error repository once the count exceeds
    /// [`MAX_FAILURE_COUNT`]. Either way the item is acknowledged; it is only
    /// rejected if that fallback fails too.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(mail = %item.mail().name())), timing(precision = "ms"))]
    pub(crate) async fn process(
        &self,
        item: Box<dyn QueueItem>,
        interrupt: &Interrupt,
    ) -> SpoolerOutcome {
        let mut in_flight = InFlight::enter(&self.in_flight);

        let routed = AssertUnwindSafe(self.dispatcher.route_with(item.mail().clone(), interrupt))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ProcessingError::Panicked {
                    mail: item.mail().name().to_owned(),
                    message: panic_message(&*panic),
                })
            });

        let outcome = match routed {
            Ok(summary) => {
                processing!(
                    level = DEBUG,
                    mail = %item.mail().name(),
                    traversals = summary.traversals,
                    disposed = summary.disposed,
                    "Mail processed"
                );
                acknowledge(item, CompletionStatus::Success).await;
                SpoolerOutcome::Success
            }
            Err(error) if error.is_interrupted() => {
                internal!(
                    level = INFO,
                    mail = %item.mail().name(),
                    "Processing interrupted, returning mail to the queue"
                );
                acknowledge(item, CompletionStatus::Reject).await;
                SpoolerOutcome::Rejected
            }
            Err(error) => self.handle_failure(item, &error).await,
        };

        in_flight.outcome = outcome;
        outcome
    }

    async fn handle_failure(
        &self,
        item: Box<dyn QueueItem>,
        error: &ProcessingError,
    ) -> SpoolerOutcome {
        // The item still holds the mail as dequeued: every recipient, and the
        // count from before this attempt.
        let mut mail = item.mail().clone();
        let failure_count = mail.failure_count() + 1;
        mail.set_error_message(error.to_string());

        if error.is_configuration_error() {
            internal!(
                level = ERROR,
                mail = %mail.name(),
                "The processor pipeline is misconfigured: {error}"
            );
        }

        let handled: Result<SpoolerOutcome, SpoolerError> = if failure_count > MAX_FAILURE_COUNT {
            tracing::error!(
                mail = %mail.name(),
                failure_count,
                error = %error,
                "Giving up on mail, storing it in the error repository"
            );
            self.error_repository
                .store(&mail)
                .await
                .map(|_| SpoolerOutcome::Archived)
                .map_err(SpoolerError::from)
        } else {
            tracing::error!(
                mail = %mail.name(),
                failure_count,
                error = %error,
                "Mail processing failed, requeueing it"
            );
            mail.set_failure_count(failure_count);
            self.queue
                .enqueue(mail, None)
                .await
                .map(|()| SpoolerOutcome::Requeued)
                .map_err(SpoolerError::from)
        };

        match handled {
            Ok(outcome) => {
                acknowledge(item, CompletionStatus::Success).await;
                outcome
            }
            Err(nested) => {
                tracing::error!(
                    mail = %item.mail().name(),
                    error = %nested,
                    "Could not apply standard error handling, rejecting the queue item"
                );
                acknowledge(item, CompletionStatus::Reject).await;
                SpoolerOutcome::Rejected
            }
        }
    }
}

/// Counts a mail as in flight until dropped, so that workers aborted during
/// shutdown are accounted for. Those items were never settled and come back
/// from the queue, hence the default outcome.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    started: Instant,
    outcome: SpoolerOutcome,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        if let Some(metrics) = postern_metrics::metrics() {
            metrics.spooler.record_started();
        }

        Self {
            counter,
            started: Instant::now(),
            outcome: SpoolerOutcome::Rejected,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
        if let Some(metrics) = postern_metrics::metrics() {
            metrics
                .spooler
                .record_finished(self.outcome, self.started.elapsed().as_secs_f64());
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic"))
}

async fn acknowledge(item: Box<dyn QueueItem>, status: CompletionStatus) {
    let name = item.mail().name().to_owned();
    if let Err(e) = item.done(status).await {
        tracing::error!(mail = %name, ?status, error = %e, "Failed to acknowledge queue item");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use postern_common::{Mail, State};
    use postern_spool::{MemoryMailQueue, TestMailRepository};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        builtin::{All, Null},
        processor::StateProcessor,
        step::{OnMailetError, PipelineStep},
        testing::{FailingMailet, PanickingMailet},
    };

    fn worker(
        root: PipelineStep,
        queue: &MemoryMailQueue,
        errors: &TestMailRepository,
    ) -> Worker {
        let dispatcher = DispatchTable::builder()
            .processor(StateProcessor::new(State::ROOT, vec![root]).unwrap())
            .processor(
                StateProcessor::new(
                    State::ERROR,
                    vec![PipelineStep::new(Arc::new(All), Arc::new(Null))],
                )
                .unwrap(),
            )
            .build()
            .unwrap();

        Worker {
            dispatcher: Arc::new(dispatcher),
            queue: Arc::new(queue.clone()),
            error_repository: Arc::new(errors.clone()),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn propagating() -> PipelineStep {
        PipelineStep::new(Arc::new(All), Arc::new(FailingMailet::default()))
            .on_mailet_error(OnMailetError::Propagate)
    }

    async fn run_once(worker: &Worker, queue: &MemoryMailQueue) -> SpoolerOutcome {
        let item = queue.dequeue().await.unwrap();
        worker.process(item, &Interrupt::never()).await
    }

    #[tokio::test]
    async fn success_acknowledges() {
        let queue = MemoryMailQueue::new("spool");
        let errors = TestMailRepository::new();
        let worker = worker(
            PipelineStep::new(Arc::new(All), Arc::new(Null)),
            &queue,
            &errors,
        );

        queue
            .enqueue(Mail::builder().recipients("a@x.org".parse().unwrap()).build(), None)
            .await
            .unwrap();

        assert_eq!(run_once(&worker, &queue).await, SpoolerOutcome::Success);
        assert_eq!(queue.stats().acknowledged, 1);
        assert_eq!(queue.stats().ready, 0);
        assert_eq!(worker.in_flight.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn failure_requeues_with_original_recipients() {
        let queue = MemoryMailQueue::new("spool");
        let errors = TestMailRepository::new();
        let worker = worker(propagating(), &queue, &errors);

        queue
            .enqueue(
                Mail::builder()
                    .name("m")
                    .recipients("a@x.org, b@x.org".parse().unwrap())
                    .build(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(run_once(&worker, &queue).await, SpoolerOutcome::Requeued);

        let requeued = queue.drain();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].failure_count(), 1);
        assert_eq!(requeued[0].recipients().len(), 2);
        assert!(
            requeued[0]
                .error_message()
                .is_some_and(|message| message.contains("FailingMailet"))
        );
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn exhausted_mail_is_archived_verbatim() {
        let queue = MemoryMailQueue::new("spool");
        let errors = TestMailRepository::new();
        let worker = worker(propagating(), &queue, &errors);

        let mut mail = Mail::builder()
            .name("m")
            .recipients("a@x.org".parse().unwrap())
            .build();
        mail.set_failure_count(MAX_FAILURE_COUNT);
        queue.enqueue(mail, None).await.unwrap();

        assert_eq!(run_once(&worker, &queue).await, SpoolerOutcome::Archived);

        let archived = errors.mails().await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].failure_count(), MAX_FAILURE_COUNT);
        assert_eq!(queue.stats().ready, 0);
        assert_eq!(queue.stats().acknowledged, 1);
    }

    #[tokio::test]
    async fn panicking_mailet_counts_as_a_failure() {
        let queue = MemoryMailQueue::new("spool");
        let errors = TestMailRepository::new();
        let worker = worker(
            PipelineStep::new(Arc::new(All), Arc::new(PanickingMailet)),
            &queue,
            &errors,
        );

        queue
            .enqueue(
                Mail::builder()
                    .name("m")
                    .recipients("a@x.org".parse().unwrap())
                    .build(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(run_once(&worker, &queue).await, SpoolerOutcome::Requeued);
        assert_eq!(queue.stats().rejected, 0);
        assert_eq!(worker.in_flight.load(Ordering::Acquire), 0);

        let requeued = queue.drain();
        assert_eq!(requeued[0].failure_count(), 1);
        assert!(
            requeued[0]
                .error_message()
                .is_some_and(|message| message.contains("mailet bug"))
        );
    }

    #[tokio::test]
    async fn nested_failure_rejects() {
        let queue = MemoryMailQueue::new("spool");
        let errors = TestMailRepository::new();
        let worker = worker(propagating(), &queue, &errors);
        errors.fail_next(1);

        let mut mail = Mail::builder()
            .name("m")
            .recipients("a@x.org".parse().unwrap())
            .build();
        mail.set_failure_count(MAX_FAILURE_COUNT);
        queue.enqueue(mail, None).await.unwrap();

        assert_eq!(run_once(&worker, &queue).await, SpoolerOutcome::Rejected);
        assert_eq!(queue.stats().rejected, 1);

        // Redelivered untouched, so the next attempt archives it.
        assert_eq!(run_once(&worker, &queue).await, SpoolerOutcome::Archived);
        assert_eq!(errors.len(), 1);
    }
}
