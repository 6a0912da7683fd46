use tracing::{Span, field};

use super::TraceId;

/// Create a root span for a request / sweep / job.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        event_id = field::Empty,
        booking_id = field::Empty
    )
}

/// Create a child span (inherits trace_id through the parent).
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        event_id = field::Empty,
        booking_id = field::Empty
    )
}

/// Records the booking coordinates on the current span, if it declares them.
pub fn annotate_span(event_id: Option<i64>, booking_id: Option<&dyn std::fmt::Display>) {
    let span = Span::current();
    if let Some(eid) = event_id {
        span.record("event_id", eid);
    }
    if let Some(bid) = booking_id {
        span.record("booking_id", field::display(bid));
    }
}
