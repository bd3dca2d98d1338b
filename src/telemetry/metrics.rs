//! Metric instrument factories for packflow.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"packflow"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for packflow instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("packflow")
}

/// Counter: actions offered to packs.
/// Labels: `pack`, `name`.
pub fn actions_created() -> Counter<u64> {
    meter()
        .u64_counter("packflow.actions.created")
        .with_description("Number of actions created")
        .build()
}

/// Counter: claim attempts.
/// Labels: `pack`, `name`, `result` ("won" | "conflict" | "empty").
pub fn action_claims() -> Counter<u64> {
    meter()
        .u64_counter("packflow.actions.claims")
        .with_description("Number of claim attempts by result")
        .build()
}

/// Counter: action state transitions.
/// Labels: `from`, `to`.
pub fn action_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("packflow.actions.state_transitions")
        .with_description("Number of action state transitions")
        .build()
}

/// Counter: claims moved to `timeout` by the reaper.
pub fn actions_expired() -> Counter<u64> {
    meter()
        .u64_counter("packflow.actions.expired")
        .with_description("Number of claims expired after the claim timeout")
        .build()
}

/// Counter: datastore operations.
/// Labels: `operation` ("put" | "get" | "delete"), `result`.
pub fn datastore_operations() -> Counter<u64> {
    meter()
        .u64_counter("packflow.datastore.operations")
        .with_description("Number of datastore operations")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("packflow.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
