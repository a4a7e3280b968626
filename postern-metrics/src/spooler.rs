//! Spooler metrics
//!
//! - mails currently being processed
//! - processing durations
//! - how each dequeued mail was settled

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

/// How the spooler settled one dequeued mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolerOutcome {
    /// Processed without error and acknowledged.
    Success,
    /// Failed and was put back on the queue with an incremented failure count.
    Requeued,
    /// Failed too often and was stored in the error repository.
    Archived,
    /// Failure handling itself failed; the queue item was rejected.
    Rejected,
}

impl SpoolerOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Requeued => "requeued",
            Self::Archived => "archived",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug)]
pub struct SpoolerMetrics {
    mails_total: Counter<u64>,
    duration_seconds: Histogram<f64>,
    in_flight: Arc<AtomicU64>,
}

impl SpoolerMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        let mails_total = meter
            .u64_counter("postern.spooler.mails")
            .with_description("Dequeued mails by outcome")
            .build();

        let duration_seconds = meter
            .f64_histogram("postern.spooler.processing.duration")
            .with_description("Time spent routing one dequeued mail")
            .with_unit("s")
            .build();

        let in_flight = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&in_flight);

        meter
            .u64_observable_gauge("postern.spooler.in_flight")
            .with_description("Mails currently being processed by spooler workers")
            .with_callback(move |observer| {
                observer.observe(observed.load(Ordering::Relaxed), &[]);
            })
            .build();

        Self {
            mails_total,
            duration_seconds,
            in_flight,
        }
    }

    pub fn record_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self, outcome: SpoolerOutcome, duration_secs: f64) {
        // Saturate rather than wrap if finished is ever recorded without started.
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));

        let attributes = [KeyValue::new("outcome", outcome.as_str())];
        self.mails_total.add(1, &attributes);
        self.duration_seconds.record(duration_secs, &attributes);
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Default for SpoolerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("postern.spooler")
}
