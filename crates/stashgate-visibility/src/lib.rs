//! Per-user content visibility exclusion engine.
//!
//! Decides, for every library entity (scenes, performers, studios, tags,
//! groups, galleries, images), whether a user may see it:
//!
//! - [`cascade`] expands admin rules and user hides over the relationship graph
//! - [`filter`] evaluates scenes and other entities against the expanded rules
//! - [`prune`] removes organizational entities that were left without content
//! - [`computer`] orchestrates the pipeline, fully or incrementally
//! - [`cache`] keeps one exclusion set per user, valid for one sync version
//! - [`service`] is the fail-closed query façade used by browsing controllers

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod cascade;
pub mod computer;
pub mod config;
pub mod exclusion;
pub mod filter;
pub mod prelude;
pub mod prune;
pub mod rules;
pub mod service;

pub use cache::ExclusionCache;
pub use computer::{ExclusionComputer, UpdateMode};
pub use config::{RetryPolicy, VisibilityConfig};
pub use exclusion::{Decision, ExclusionReason, ExclusionRecord, ExclusionSet};
pub use rules::RuleSet;
pub use service::{ExcludedIds, ExclusionStats, RecomputeReport, VisibilityQueryService};

// vim: ts=4
