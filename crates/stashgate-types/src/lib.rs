//! Shared types, snapshot model, and adapter traits for the Stashgate visibility engine.
//!
//! This crate contains the foundational types that are shared between the
//! visibility engine and all adapter implementations. Adapters only depend on
//! this crate, so catalog and rule storage backends compile independently of
//! the engine itself.

#![forbid(unsafe_code)]

pub mod entity;
pub mod error;
pub mod event;
pub mod graph;
pub mod graph_adapter;
pub mod prelude;
pub mod rule;
pub mod rule_adapter;
pub mod types;
pub mod worker;

// vim: ts=4
