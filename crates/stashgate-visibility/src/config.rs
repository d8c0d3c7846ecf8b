//! Visibility engine configuration
//!
//! Plain structs with defaults. Hosts may deserialize them from their own
//! settings files; every field is optional there.

use serde::Deserialize;
use std::time::Duration;

/// Exponential backoff for snapshot and rule store fetches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Backoff bounds in milliseconds
	pub wait_min_max_ms: (u64, u64),
	/// Retries after the first attempt
	pub times: u16,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { wait_min_max_ms: (50, 2000), times: 3 }
	}
}

impl RetryPolicy {
	pub fn new(wait_min_max_ms: (u64, u64), times: u16) -> Self {
		Self { wait_min_max_ms, times }
	}

	/// Never retry (tests, or hosts doing their own retries)
	pub fn none() -> Self {
		Self { wait_min_max_ms: (0, 0), times: 0 }
	}

	/// Exponential backoff: min * (2^attempt), capped at max
	pub fn calculate_backoff(&self, attempt_count: u16) -> Duration {
		let (min, max) = self.wait_min_max_ms;
		let backoff = min.saturating_mul(1u64 << u64::from(attempt_count.min(32)));
		Duration::from_millis(backoff.min(max))
	}

	pub fn should_retry(&self, attempt_count: u16) -> bool {
		attempt_count < self.times
	}
}

/// Main visibility engine configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
	/// Number of users whose exclusion sets are kept in memory
	pub cache_capacity: usize,
	/// Worker threads per lane: (query, update, batch)
	pub workers: (usize, usize, usize),
	/// Upper bound a query waits for a missing exclusion set before failing closed
	pub query_wait_ms: u64,
	pub retry: RetryPolicy,
	/// Treat a gallery without image nodes as non-empty when its catalog
	/// `image_count` is positive
	pub gallery_count_fallback: bool,
	/// Keep organizational entities visible that have no content in the
	/// catalog at all. Off: they are excluded as empty like any other.
	pub keep_never_filled: bool,
	/// Recompute users cached at the old version right after a sync bump
	pub eager_recompute_on_sync: bool,
}

impl Default for VisibilityConfig {
	fn default() -> Self {
		Self {
			cache_capacity: 1024,
			workers: (1, 2, 1),
			query_wait_ms: 5000,
			retry: RetryPolicy::default(),
			gallery_count_fallback: true,
			keep_never_filled: false,
			eager_recompute_on_sync: true,
		}
	}
}

impl VisibilityConfig {
	pub fn query_wait(&self) -> Duration {
		Duration::from_millis(self.query_wait_ms)
	}

	pub fn prune_options(&self) -> PruneOptions {
		PruneOptions {
			gallery_count_fallback: self.gallery_count_fallback,
			keep_never_filled: self.keep_never_filled,
		}
	}
}

/// Knobs of the empty entity pruner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PruneOptions {
	pub gallery_count_fallback: bool,
	/// Only prune entities that had content and lost all of it
	pub keep_never_filled: bool,
}

impl Default for PruneOptions {
	fn default() -> Self {
		Self { gallery_count_fallback: true, keep_never_filled: false }
	}
}


// vim: ts=4
