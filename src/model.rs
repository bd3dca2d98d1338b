//! Core data model.
//!
//! A pack is an addressable worker channel. An action is one unit of work
//! offered to a pack, identified within the pack by its name, and moved
//! through its lifecycle only by the dispatcher.

pub mod action;
pub mod datastore;
pub mod pack;
