//! # packflow
//!
//! Action dispatch core for pack-based automation.
//!
//! Packs (worker processes) take pending actions by name; many workers, in
//! many processes, may race for the same queue. Exactly one of them wins
//! each action because every claim is a compare-and-swap performed by the
//! shared store (Postgres via sqlx, or an in-memory store for tests).
//!
//! Also provides the pack registry, a claim reaper for abandoned work, a
//! namespaced JSON datastore, and OpenTelemetry observability.

pub mod config;
pub mod datastore;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod reaper;
pub mod registry;
pub mod store;
pub mod telemetry;
