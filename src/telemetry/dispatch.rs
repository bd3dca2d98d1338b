//! Dispatch span helpers.
//!
//! Spans for claiming and reporting on actions, plus state-transition
//! events recorded inside them.

use tracing::Span;

use crate::model::action::{ActionId, State};

/// Start a span for one `take_action` call.
///
/// `action.id` and `action.attempts` are declared empty and filled in by
/// [`record_claim`] once the claim loop finishes.
pub fn start_take_span(pack: &str, name: &str) -> Span {
    tracing::info_span!(
        "action.take",
        "action.pack" = pack,
        "action.name" = name,
        "action.id" = tracing::field::Empty,
        "action.attempts" = tracing::field::Empty,
    )
}

/// Record the claimed action (if any) and the number of CAS attempts.
pub fn record_claim(span: &Span, id: Option<ActionId>, attempts: u32) {
    if let Some(id) = id {
        span.record("action.id", tracing::field::display(id));
    }
    span.record("action.attempts", attempts);
}

/// Start a span for a worker's outcome report.
pub fn start_report_span(id: ActionId, outcome: &str) -> Span {
    tracing::info_span!(
        "action.report",
        "action.id" = %id,
        "action.outcome" = outcome,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: State, to: State) {
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}
