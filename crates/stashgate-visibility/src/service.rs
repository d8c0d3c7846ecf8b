//! Visibility query service
//!
//! The only surface browsing controllers talk to. Every query fails closed:
//! when no exclusion set for the current sync version can be produced within
//! `query_wait`, the answer is "not visible", "everything excluded" or a zero
//! count, never the unrestricted catalog.

use futures::future::join_all;
use itertools::Itertools;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;

use stashgate_types::event::InvalidationEvent;
use stashgate_types::graph_adapter::GraphAdapter;
use stashgate_types::rule_adapter::RuleAdapter;
use stashgate_types::worker::{Priority, WorkerPool};

use crate::cache::ExclusionCache;
use crate::computer::{ExclusionComputer, UpdateMode};
use crate::config::VisibilityConfig;
use crate::exclusion::{ExclusionReason, ExclusionSet};
use crate::prelude::*;

/// Excluded ids of one kind, for anti-join filters of paginated listings
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExcludedIds {
	/// No exclusion set available: treat every entity as excluded
	All,
	Set(Arc<BTreeSet<EntityId>>),
}

impl ExcludedIds {
	pub fn contains(&self, id: &str) -> bool {
		match self {
			ExcludedIds::All => true,
			ExcludedIds::Set(ids) => ids.contains(id),
		}
	}

	pub fn is_all(&self) -> bool {
		matches!(self, ExcludedIds::All)
	}
}

/// Admin overview of the cached exclusion sets
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionStats {
	pub version: SyncVersion,
	pub cached_users: usize,
	pub stale_users: usize,
	pub pending_jobs: usize,
	pub by_kind: BTreeMap<EntityKind, usize>,
	pub by_reason: BTreeMap<ExclusionReason, usize>,
}

/// Outcome of a batch recompute. One user's failure never aborts the others.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeReport {
	pub version: SyncVersion,
	pub succeeded: Vec<UserId>,
	/// Finished after a newer sync version was announced
	pub discarded: Vec<UserId>,
	pub failed: Vec<(UserId, String)>,
}

impl RecomputeReport {
	pub fn is_ok(&self) -> bool {
		self.failed.is_empty()
	}
}

#[derive(Debug)]
pub struct VisibilityQueryService {
	computer: ExclusionComputer,
	cache: ExclusionCache,
	locks: parking_lot::Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
	config: VisibilityConfig,
}

impl VisibilityQueryService {
	pub fn new(
		graphs: Arc<dyn GraphAdapter>,
		rules: Arc<dyn RuleAdapter>,
		config: VisibilityConfig,
	) -> Self {
		let (n_query, n_update, n_batch) = config.workers;
		let worker = Arc::new(WorkerPool::new(n_query, n_update, n_batch));
		Self::with_worker(graphs, rules, worker, config)
	}

	/// Shares an existing worker pool
	pub fn with_worker(
		graphs: Arc<dyn GraphAdapter>,
		rules: Arc<dyn RuleAdapter>,
		worker: Arc<WorkerPool>,
		config: VisibilityConfig,
	) -> Self {
		Self {
			computer: ExclusionComputer::new(graphs, rules, worker, &config),
			cache: ExclusionCache::new(config.cache_capacity),
			locks: parking_lot::Mutex::new(HashMap::new()),
			config,
		}
	}

	/// Reads the current sync version from the catalog
	pub async fn init(&self) -> ClResult<SyncVersion> {
		let version = self.computer.graph_adapter().current_version().await?;
		self.cache.advance(version);
		info!("Visibility engine at sync version {}", version);
		Ok(version)
	}

	/// Spawns a task handling invalidation events until the channel closes
	pub fn start(
		self: &Arc<Self>,
		events: broadcast::Receiver<InvalidationEvent>,
	) -> tokio::task::JoinHandle<()> {
		let service = Arc::clone(self);
		tokio::spawn(async move { service.listen(events).await })
	}

	pub fn cache(&self) -> &ExclusionCache {
		&self.cache
	}

	pub fn computer(&self) -> &ExclusionComputer {
		&self.computer
	}

	// Queries //
	//*********//

	pub async fn is_visible(&self, user_id: UserId, kind: EntityKind, id: &str) -> bool {
		match self.exclusion_set(user_id).await {
			Ok(set) => set.is_visible(kind, id),
			Err(err) => {
				warn!("Visibility of {}:{} for user {} unavailable: {}", kind, id, user_id, err);
				false
			}
		}
	}

	pub async fn excluded_ids(&self, user_id: UserId, kind: EntityKind) -> ExcludedIds {
		match self.exclusion_set(user_id).await {
			Ok(set) => ExcludedIds::Set(set.excluded_ids(kind)),
			Err(err) => {
				warn!("Excluded {} ids for user {} unavailable: {}", kind, user_id, err);
				ExcludedIds::All
			}
		}
	}

	pub async fn visible_count(&self, user_id: UserId, kind: EntityKind) -> u64 {
		match self.exclusion_set(user_id).await {
			Ok(set) => u64::try_from(set.visible_count(kind)).unwrap_or(u64::MAX),
			Err(err) => {
				warn!("Visible {} count for user {} unavailable: {}", kind, user_id, err);
				0
			}
		}
	}

	/// Exclusion set of the current version, computing it on a miss within
	/// the bounded query wait
	pub async fn exclusion_set(&self, user_id: UserId) -> ClResult<Arc<ExclusionSet>> {
		if let Some(set) = self.cache.get(user_id) {
			return Ok(set);
		}
		debug!("Exclusion cache miss for user {}", user_id);

		match tokio::time::timeout(self.config.query_wait(), self.load(user_id)).await {
			Ok(res) => res,
			Err(_) => Err(Error::Timeout),
		}
	}

	async fn load(&self, user_id: UserId) -> ClResult<Arc<ExclusionSet>> {
		let lock = self.user_lock(user_id);
		let _guard = lock.lock().await;

		// Computed by a concurrent caller while we waited
		if let Some(set) = self.cache.get(user_id) {
			return Ok(set);
		}
		let graph = self.current_graph().await?;
		let set = Arc::new(self.computer.recompute(user_id, graph, Priority::Query).await?);
		self.commit(Arc::clone(&set))?;
		Ok(set)
	}

	// Invalidation //
	//**************//

	pub async fn on_sync_version_bumped(
		&self,
		old: SyncVersion,
		new: SyncVersion,
		changed_kinds: &BTreeSet<EntityKind>,
	) {
		self.cache.advance(new);
		info!(
			"Sync version bumped {} -> {}, changed kinds: [{}]",
			old,
			new,
			changed_kinds.iter().join(", ")
		);

		if changed_kinds.is_empty() {
			match self.computer.load_graph(Some(new)).await {
				Ok(graph) => {
					let retagged = self.cache.retag(&graph, |user_id| self.is_updating(user_id));
					debug!("Moved {} exclusion sets to {} without recompute", retagged, new);
				}
				Err(err) => warn!("Snapshot {} unavailable for retagging: {}", new, err),
			}
		}

		if self.config.eager_recompute_on_sync {
			let users = self.cache.stale_users();
			if !users.is_empty() {
				let report = self.recompute_users(users, Priority::Batch).await;
				info!(
					"Recomputed {} users for {} ({} discarded, {} failed)",
					report.succeeded.len(),
					report.version,
					report.discarded.len(),
					report.failed.len()
				);
			}
		}
	}

	/// Admin replaced or removed one of the user's rules
	pub async fn on_rule_changed(&self, user_id: UserId) -> ClResult<UpdateMode> {
		let lock = self.user_lock(user_id);
		let _guard = lock.lock().await;

		let Some(set) = self.cache.get(user_id) else {
			// Nothing current cached: the next query computes from scratch
			self.cache.invalidate(user_id);
			return Ok(UpdateMode::Full);
		};
		let res = self.computer.refresh(set, Priority::Update).await;
		self.commit_update(user_id, res)
	}

	/// User hid or unhid one entity
	pub async fn on_hide_toggled(
		&self,
		user_id: UserId,
		entity: &EntityRef,
		hidden: bool,
	) -> ClResult<UpdateMode> {
		let lock = self.user_lock(user_id);
		let _guard = lock.lock().await;

		let Some(set) = self.cache.get(user_id) else {
			self.cache.invalidate(user_id);
			return Ok(UpdateMode::Full);
		};
		let res = self.computer.refresh_hide(set, entity, hidden, Priority::Update).await;
		self.commit_update(user_id, res)
	}

	fn commit_update(
		&self,
		user_id: UserId,
		res: ClResult<(ExclusionSet, UpdateMode)>,
	) -> ClResult<UpdateMode> {
		match res {
			Ok((set, mode)) => match self.commit(Arc::new(set)) {
				Ok(()) => Ok(mode),
				Err(err) => {
					// Computed against a snapshot the cache has moved past. The
					// cached entry predates this change.
					self.cache.invalidate(user_id);
					warn!("Update of user {} discarded, cache entry dropped: {}", user_id, err);
					Err(err)
				}
			},
			Err(err) => {
				// The cached set no longer reflects the rules: drop it
				self.cache.invalidate(user_id);
				error!("Update of user {} failed, cache entry dropped: {}", user_id, err);
				Err(err)
			}
		}
	}

	pub async fn handle_event(&self, event: InvalidationEvent) {
		match event {
			InvalidationEvent::SyncVersionBumped { old, new, changed_kinds } => {
				self.on_sync_version_bumped(old, new, &changed_kinds).await;
			}
			InvalidationEvent::RuleChanged { user_id } => {
				if let Err(err) = self.on_rule_changed(user_id).await {
					warn!("Rule change of user {} not applied: {}", user_id, err);
				}
			}
			InvalidationEvent::HideToggled { user_id, entity, hidden } => {
				if let Err(err) = self.on_hide_toggled(user_id, &entity, hidden).await {
					warn!("Hide toggle of {} for user {} not applied: {}", entity, user_id, err);
				}
			}
		}
	}

	/// Handles events until the channel closes
	pub async fn listen(&self, mut events: broadcast::Receiver<InvalidationEvent>) {
		loop {
			match events.recv().await {
				Ok(event) => self.handle_event(event).await,
				Err(broadcast::error::RecvError::Lagged(missed)) => {
					warn!("Missed {} invalidation events, dropping all cached exclusions", missed);
					self.cache.clear();
					if let Err(err) = self.init().await {
						error!("Failed to re-read sync version: {}", err);
					}
				}
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
		debug!("Invalidation event channel closed");
	}

	// Maintenance //
	//*************//

	pub async fn recompute_user(&self, user_id: UserId) -> ClResult<()> {
		let graph = self.current_graph().await?;
		self.recompute_with(user_id, graph, Priority::Update).await
	}

	/// Recomputes every user having rules or hides, plus every cached user
	pub async fn recompute_all(&self) -> ClResult<RecomputeReport> {
		let mut users: BTreeSet<UserId> =
			self.computer.rule_adapter().list_users().await?.into_iter().collect();
		users.extend(self.cache.users());

		let report = self.recompute_users(users, Priority::Batch).await;
		info!(
			"Recomputed all users for {}: {} ok, {} discarded, {} failed",
			report.version,
			report.succeeded.len(),
			report.discarded.len(),
			report.failed.len()
		);
		Ok(report)
	}

	async fn recompute_users(
		&self,
		users: impl IntoIterator<Item = UserId>,
		priority: Priority,
	) -> RecomputeReport {
		let users: Vec<UserId> = users.into_iter().collect();
		let graph = match self.current_graph().await {
			Ok(graph) => graph,
			Err(err) => {
				let reason = err.to_string();
				return RecomputeReport {
					version: self.cache.current_version(),
					failed: users.into_iter().map(|user_id| (user_id, reason.clone())).collect(),
					..RecomputeReport::default()
				};
			}
		};

		let jobs = users.into_iter().map(|user_id| {
			let graph = Arc::clone(&graph);
			async move { (user_id, self.recompute_with(user_id, graph, priority).await) }
		});

		let mut report = RecomputeReport { version: graph.version(), ..RecomputeReport::default() };
		for (user_id, res) in join_all(jobs).await {
			match res {
				Ok(()) => report.succeeded.push(user_id),
				Err(Error::StaleVersionDiscarded { .. }) => report.discarded.push(user_id),
				Err(err) => report.failed.push((user_id, err.to_string())),
			}
		}
		report
	}

	async fn recompute_with(
		&self,
		user_id: UserId,
		graph: Arc<EntityGraph>,
		priority: Priority,
	) -> ClResult<()> {
		let lock = self.user_lock(user_id);
		let _guard = lock.lock().await;

		match self.computer.recompute(user_id, graph, priority).await {
			Ok(set) => self.commit(Arc::new(set)),
			Err(err) => {
				self.cache.invalidate(user_id);
				Err(err)
			}
		}
	}

	pub fn exclusion_stats(&self) -> ExclusionStats {
		let mut stats = ExclusionStats {
			version: self.cache.current_version(),
			cached_users: self.cache.len(),
			stale_users: self.cache.stale_users().len(),
			pending_jobs: self.computer_pending(),
			..ExclusionStats::default()
		};

		for set in self.cache.current_entries() {
			for kind in EntityKind::ALL {
				*stats.by_kind.entry(kind).or_insert(0) += set.excluded_count(kind);
			}
			for (reason, count) in set.reason_counts() {
				*stats.by_reason.entry(reason).or_insert(0) += count;
			}
		}
		stats
	}

	// Internals //
	//***********//

	fn computer_pending(&self) -> usize {
		self.computer.worker().pending()
	}

	/// Current snapshot. The catalog may be ahead of the events seen so far.
	async fn current_graph(&self) -> ClResult<Arc<EntityGraph>> {
		let graph = self.computer.load_graph(None).await?;
		self.cache.advance(graph.version());
		Ok(graph)
	}

	fn commit(&self, set: Arc<ExclusionSet>) -> ClResult<()> {
		let user_id = set.user_id();
		self.cache.store(set).inspect_err(|err| debug!("User {}: {}", user_id, err))
	}

	/// A query, update or recompute of the user is in flight
	fn is_updating(&self, user_id: UserId) -> bool {
		self.locks.lock().get(&user_id).is_some_and(|lock| lock.try_lock().is_err())
	}

	fn user_lock(&self, user_id: UserId) -> Arc<tokio::sync::Mutex<()>> {
		let mut locks = self.locks.lock();
		if locks.len() > self.config.cache_capacity.saturating_mul(2) {
			locks.retain(|_, lock| Arc::strong_count(lock) > 1);
		}
		Arc::clone(locks.entry(user_id).or_default())
	}
}


// vim: ts=4
