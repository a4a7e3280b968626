//! Per-processor matcher and mailet metrics

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

#[derive(Debug)]
pub struct ProcessorMetrics {
    matcher_duration: Histogram<f64>,
    mailet_duration: Histogram<f64>,
    errors_total: Counter<u64>,
    fallthrough_total: Counter<u64>,
}

impl ProcessorMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        Self {
            matcher_duration: meter
                .f64_histogram("postern.processor.matcher.duration")
                .with_description("Time spent in matchers")
                .with_unit("s")
                .build(),
            mailet_duration: meter
                .f64_histogram("postern.processor.mailet.duration")
                .with_description("Time spent in mailets")
                .with_unit("s")
                .build(),
            errors_total: meter
                .u64_counter("postern.processor.errors")
                .with_description("Matcher and mailet failures by processor")
                .build(),
            fallthrough_total: meter
                .u64_counter("postern.processor.fallthrough")
                .with_description("Mails that reached the end of a processor without being routed")
                .build(),
        }
    }

    pub fn record_matcher(&self, processor: &str, matcher: &str, duration_secs: f64, failed: bool) {
        let attributes = [
            KeyValue::new("processor", processor.to_string()),
            KeyValue::new("matcher", matcher.to_string()),
        ];
        self.matcher_duration.record(duration_secs, &attributes);

        if failed {
            self.record_error(processor, "matcher");
        }
    }

    pub fn record_mailet(&self, processor: &str, mailet: &str, duration_secs: f64, failed: bool) {
        let attributes = [
            KeyValue::new("processor", processor.to_string()),
            KeyValue::new("mailet", mailet.to_string()),
        ];
        self.mailet_duration.record(duration_secs, &attributes);

        if failed {
            self.record_error(processor, "mailet");
        }
    }

    pub fn record_fallthrough(&self, processor: &str) {
        self.fallthrough_total
            .add(1, &[KeyValue::new("processor", processor.to_string())]);
    }

    fn record_error(&self, processor: &str, kind: &'static str) {
        self.errors_total.add(
            1,
            &[
                KeyValue::new("processor", processor.to_string()),
                KeyValue::new("kind", kind),
            ],
        );
    }
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("postern.processor")
}
