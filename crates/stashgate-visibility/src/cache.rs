//! Per-user exclusion set cache
//!
//! One entry per user, holding the exclusion set of every kind for a single
//! sync version. An entry computed against an older version than the current
//! one is never returned by [`ExclusionCache::get`], and a write can never
//! replace an entry with one computed against an older version.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::exclusion::ExclusionSet;
use crate::prelude::*;

pub struct ExclusionCache {
	entries: parking_lot::RwLock<LruCache<UserId, Arc<ExclusionSet>>>,
	/// Latest sync version announced to the engine
	current: AtomicU64,
}

impl ExclusionCache {
	pub fn new(capacity: usize) -> Self {
		let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
		Self {
			entries: parking_lot::RwLock::new(LruCache::new(capacity)),
			current: AtomicU64::new(0),
		}
	}

	pub fn current_version(&self) -> SyncVersion {
		SyncVersion(self.current.load(Ordering::Acquire))
	}

	/// Moves the current version forward. Returns false if `version` is not
	/// newer than the current one.
	pub fn advance(&self, version: SyncVersion) -> bool {
		self.current.fetch_max(version.0, Ordering::AcqRel) < version.0
	}

	/// Entry of `user_id`, only if it was computed against the current version
	pub fn get(&self, user_id: UserId) -> Option<Arc<ExclusionSet>> {
		let current = self.current_version();
		let mut entries = self.entries.write();
		match entries.get(&user_id) {
			Some(set) if set.version() == current => Some(Arc::clone(set)),
			Some(set) => {
				debug!("Cache entry of user {} is at {}, current is {}", user_id, set.version(), current);
				None
			}
			None => None,
		}
	}

	/// Entry of `user_id` at whatever version, without touching recency
	pub fn peek(&self, user_id: UserId) -> Option<Arc<ExclusionSet>> {
		self.entries.read().peek(&user_id).cloned()
	}

	/// Stores `set` unless it is older than the current version or than the
	/// entry it would replace
	pub fn store(&self, set: Arc<ExclusionSet>) -> ClResult<()> {
		let current = self.current_version();
		if set.version() < current {
			return Err(Error::StaleVersionDiscarded { computed: set.version(), current });
		}

		let mut entries = self.entries.write();
		if let Some(existing) = entries.peek(&set.user_id()) {
			if existing.version() > set.version() {
				return Err(Error::StaleVersionDiscarded {
					computed: set.version(),
					current: existing.version(),
				});
			}
		}
		entries.put(set.user_id(), set);
		Ok(())
	}

	pub fn invalidate(&self, user_id: UserId) -> Option<Arc<ExclusionSet>> {
		self.entries.write().pop(&user_id)
	}

	pub fn clear(&self) {
		self.entries.write().clear();
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Every cached user, most recently used first
	pub fn users(&self) -> Vec<UserId> {
		self.entries.read().iter().map(|(user_id, _)| *user_id).collect()
	}

	/// Users whose entry is older than the current version
	pub fn stale_users(&self) -> Vec<UserId> {
		let current = self.current_version();
		self.entries
			.read()
			.iter()
			.filter(|(_, set)| set.version() < current)
			.map(|(user_id, _)| *user_id)
			.collect()
	}

	/// Entries valid for the current version
	pub fn current_entries(&self) -> Vec<Arc<ExclusionSet>> {
		let current = self.current_version();
		self.entries
			.read()
			.iter()
			.filter(|(_, set)| set.version() == current)
			.map(|(_, set)| Arc::clone(set))
			.collect()
	}

	/// Moves entries older than `graph` to it when the snapshot content did
	/// not change. Users for which `busy` holds are left alone: their entry
	/// is about to be replaced. Returns the number of entries moved.
	pub fn retag(&self, graph: &Arc<EntityGraph>, busy: impl Fn(UserId) -> bool) -> usize {
		let mut entries = self.entries.write();
		// Entries share a handful of snapshots, compare each one once
		let mut checked: Vec<(Arc<EntityGraph>, bool)> = Vec::new();
		let mut retagged = Vec::new();
		for (user_id, set) in entries.iter() {
			if set.version() >= graph.version() || busy(*user_id) {
				continue;
			}
			let same = match checked.iter().find(|(seen, _)| Arc::ptr_eq(seen, set.graph())) {
				Some((_, same)) => *same,
				None => {
					let same = set.graph().same_content(graph);
					checked.push((Arc::clone(set.graph()), same));
					same
				}
			};
			if same {
				retagged.push((*user_id, Arc::new(set.rebase(Arc::clone(graph)))));
			}
		}
		let count = retagged.len();
		for (user_id, set) in retagged {
			entries.put(user_id, set);
		}
		count
	}
}

impl std::fmt::Debug for ExclusionCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExclusionCache")
			.field("current", &self.current_version())
			.field("len", &self.len())
			.finish()
	}
}


// vim: ts=4
