//! Observers notified as mails pass through matchers and mailets.

use std::{fmt::Debug, time::Duration};

use postern_common::{AddressList, Mail, State};

use crate::error::{MailetError, MatcherError};

/// Outcome of one matcher invocation.
#[derive(Debug)]
pub struct MatcherEvent<'a> {
    pub processor: &'a State,
    pub matcher: &'a str,
    pub mail: &'a str,
    /// Recipients the matcher was asked about.
    pub recipients: &'a AddressList,
    /// Recipients the step went on with, after the error policy was applied.
    pub matched: Option<&'a AddressList>,
    pub duration: Duration,
    pub error: Option<&'a MatcherError>,
}

/// Outcome of one mailet invocation.
#[derive(Debug)]
pub struct MailetEvent<'a> {
    pub processor: &'a State,
    pub mailet: &'a str,
    pub mail: &'a str,
    /// State of the mail once the mailet and the error policy are done with it.
    pub state: &'a State,
    pub duration: Duration,
    pub error: Option<&'a MailetError>,
}

/// Receives processor events. Calls happen inline on the worker processing the
/// mail, so implementations should return quickly.
pub trait ProcessorListener: Send + Sync + Debug {
    fn after_matcher(&self, _event: &MatcherEvent<'_>) {}

    fn after_mailet(&self, _event: &MailetEvent<'_>) {}

    /// A mail reached the end of a processor without being routed elsewhere.
    fn fell_through(&self, _processor: &State, _mail: &Mail) {}
}

/// Feeds processor events into the global metrics, when they are enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsListener;

impl ProcessorListener for MetricsListener {
    fn after_matcher(&self, event: &MatcherEvent<'_>) {
        if let Some(metrics) = postern_metrics::metrics() {
            metrics.processor.record_matcher(
                event.processor.as_str(),
                event.matcher,
                event.duration.as_secs_f64(),
                event.error.is_some(),
            );
        }
    }

    fn after_mailet(&self, event: &MailetEvent<'_>) {
        if let Some(metrics) = postern_metrics::metrics() {
            metrics.processor.record_mailet(
                event.processor.as_str(),
                event.mailet,
                event.duration.as_secs_f64(),
                event.error.is_some(),
            );
        }
    }

    fn fell_through(&self, processor: &State, _mail: &Mail) {
        if let Some(metrics) = postern_metrics::metrics() {
            metrics.processor.record_fallthrough(processor.as_str());
        }
    }
}
