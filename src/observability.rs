use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("codeassist.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter =
    Counter::new("codeassist.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("codeassist.client.request_duration_seconds");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("codeassist.stream.events");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("codeassist.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("codeassist.stream.bytes");

pub(crate) static EXPLAIN_INVOCATIONS: Counter = Counter::new("codeassist.explain.invocations");
pub(crate) static EXPLAIN_FAILURES: Counter = Counter::new("codeassist.explain.failures");
pub(crate) static EXPLAIN_FRAGMENTS: Counter = Counter::new("codeassist.explain.fragments");
pub(crate) static EXPLAIN_TTFB: Moments = Moments::new("codeassist.explain.ttfb_seconds");
pub(crate) static EXPLAIN_DURATION: Moments =
    Moments::new("codeassist.explain.duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);

    collector.register_counter(&EXPLAIN_INVOCATIONS);
    collector.register_counter(&EXPLAIN_FAILURES);
    collector.register_counter(&EXPLAIN_FRAGMENTS);
    collector.register_moments(&EXPLAIN_TTFB);
    collector.register_moments(&EXPLAIN_DURATION);
}
