//! In-memory adapters for the Stashgate visibility engine.
//!
//! [`MemoryCatalog`] keeps the last few published snapshots and announces each
//! publish as an [`InvalidationEvent`]. [`MemoryRuleStore`] keeps admin rules
//! and hide lists. Both can be switched unavailable to exercise the engine's
//! fail-closed paths.

#![forbid(unsafe_code)]

mod catalog;
mod rules;

pub use catalog::MemoryCatalog;
pub use rules::MemoryRuleStore;

pub use stashgate::event::InvalidationEvent;

/// Catalog adapter configuration
#[derive(Debug, Clone)]
pub struct MemoryCatalogConfig {
	/// Number of snapshots kept addressable by version
	pub retain_versions: usize,

	/// Broadcast channel capacity for invalidation events
	pub broadcast_capacity: usize,
}

impl Default for MemoryCatalogConfig {
	fn default() -> Self {
		Self { retain_versions: 4, broadcast_capacity: 1024 }
	}
}

// vim: ts=4
