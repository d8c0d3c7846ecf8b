//! Exclusion pipeline orchestration.
//!
//! The pipeline itself (`full`, `apply_delta`, `update`) is synchronous and
//! pure: the same snapshot and rule set always produce the same decisions,
//! whether computed from scratch or incrementally. The async half loads the
//! inputs from the adapters, with retries, and runs the pipeline on the
//! worker pool.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use stashgate_types::graph_adapter::GraphAdapter;
use stashgate_types::rule_adapter::RuleAdapter;
use stashgate_types::worker::{Priority, WorkerPool};

use crate::config::{PruneOptions, RetryPolicy, VisibilityConfig};
use crate::exclusion::ExclusionSet;
use crate::filter::SceneVisibilityFilter;
use crate::prelude::*;
use crate::prune::{EmptyEntityPruner, PruneScope};
use crate::rules::RuleSet;

/// How an exclusion set was brought up to date
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
	/// Computed from scratch
	Full,
	/// Only the entities reachable from the changed rules and hides were revisited
	Incremental,
	/// Rules and hides did not change
	Unchanged,
	/// Incremental update found an inconsistency and fell back to a full run
	SelfHealed,
}

#[derive(Debug)]
pub struct ExclusionComputer {
	graphs: Arc<dyn GraphAdapter>,
	rules: Arc<dyn RuleAdapter>,
	worker: Arc<WorkerPool>,
	retry: RetryPolicy,
	options: PruneOptions,
}

impl ExclusionComputer {
	pub fn new(
		graphs: Arc<dyn GraphAdapter>,
		rules: Arc<dyn RuleAdapter>,
		worker: Arc<WorkerPool>,
		config: &VisibilityConfig,
	) -> Self {
		Self { graphs, rules, worker, retry: config.retry, options: config.prune_options() }
	}

	pub fn graph_adapter(&self) -> &Arc<dyn GraphAdapter> {
		&self.graphs
	}

	pub fn rule_adapter(&self) -> &Arc<dyn RuleAdapter> {
		&self.rules
	}

	pub fn worker(&self) -> &Arc<WorkerPool> {
		&self.worker
	}

	// Pipeline //
	//**********//

	/// Full recompute: cascade, filter, then prune every tier
	pub fn full(
		user_id: UserId,
		graph: Arc<EntityGraph>,
		rules: Arc<RuleSet>,
		options: PruneOptions,
	) -> ExclusionSet {
		let mut set = ExclusionSet::new(user_id, Arc::clone(&graph), Arc::clone(&rules));

		let filter = SceneVisibilityFilter::new(&graph, &rules);
		for node in filter.candidates() {
			if let Some(decision) = filter.evaluate(node) {
				set.insert(node, decision);
			}
		}

		let stats = EmptyEntityPruner::new(&graph, options).prune(&mut set, &PruneScope::All);
		debug!(
			"Computed {} exclusions ({} empty) for user {} at {}",
			set.len(),
			stats.pruned,
			user_id,
			graph.version()
		);
		set
	}

	/// Brings `set` up to date with `rules` without a full recompute where
	/// possible.
	///
	/// - added EXCLUDE ids and hides: only the entities referencing them are
	///   re-evaluated
	/// - removed ones: their own record and every record sourced at them are
	///   re-checked against the remaining rules and hides
	/// - any INCLUDE change: full recompute
	///
	/// The pruner then runs over the containers of everything that changed.
	pub fn apply_delta(
		set: &ExclusionSet,
		rules: Arc<RuleSet>,
		options: PruneOptions,
	) -> ClResult<(ExclusionSet, UpdateMode)> {
		let delta = set.rules().diff(&rules);
		if delta.include_changed {
			let graph = Arc::clone(set.graph());
			return Ok((Self::full(set.user_id(), graph, rules, options), UpdateMode::Full));
		}
		if delta.is_empty() {
			return Ok((set.fork(rules), UpdateMode::Unchanged));
		}

		let graph = Arc::clone(set.graph());
		let filter = SceneVisibilityFilter::new(&graph, &rules);
		let mut next = set.fork(Arc::clone(&rules));

		let mut touched: BTreeSet<Node> = BTreeSet::new();
		let added: Vec<Node> = delta.added.iter().filter_map(|e| graph.node_of(e)).collect();
		let removed: Vec<Node> = delta.removed.iter().filter_map(|e| graph.node_of(e)).collect();
		touched.extend(filter.resolver().expand(added.iter().copied()));
		for node in &removed {
			touched.insert(*node);
			touched.extend(next.sourced_from(*node));
		}

		for node in &touched {
			match filter.evaluate(*node) {
				Some(decision) => {
					next.insert(*node, decision);
				}
				None => {
					next.remove(*node);
				}
			}
		}

		// A retracted source may only be referenced by empty records, which the
		// pruner recomputes below
		for node in &removed {
			let stale = next
				.sourced_from(*node)
				.into_iter()
				.find(|target| next.get(*target).is_some_and(|d| !d.is_empty()));
			if let Some(target) = stale {
				return Err(Error::InconsistentExclusionState(format!(
					"{} still excluded by retracted {}",
					graph.entity_ref(target),
					graph.entity_ref(*node)
				)));
			}
		}

		let pruner = EmptyEntityPruner::new(&graph, options);
		let dirty = pruner.dirty_closure(touched.iter().copied());
		let stats = pruner.prune(&mut next, &PruneScope::Dirty(dirty));
		debug!(
			"Updated user {} at {}: +{} -{} sources, {} entities rechecked, {} pruned, {} restored",
			set.user_id(),
			graph.version(),
			added.len(),
			removed.len(),
			touched.len(),
			stats.pruned,
			stats.restored
		);
		Ok((next, UpdateMode::Incremental))
	}

	/// `apply_delta`, self-healing with a full recompute on inconsistency
	pub fn update(
		set: &ExclusionSet,
		rules: Arc<RuleSet>,
		options: PruneOptions,
	) -> (ExclusionSet, UpdateMode) {
		match Self::apply_delta(set, Arc::clone(&rules), options) {
			Ok(res) => res,
			Err(err) => {
				warn!("Incremental update of user {} failed: {}, recomputing", set.user_id(), err);
				let graph = Arc::clone(set.graph());
				(Self::full(set.user_id(), graph, rules, options), UpdateMode::SelfHealed)
			}
		}
	}

	/// Incremental add for one hidden entity
	pub fn apply_hide(
		set: &ExclusionSet,
		entity: &EntityRef,
		options: PruneOptions,
	) -> ClResult<ExclusionSet> {
		let rules = Arc::new(set.rules().with_hidden(entity.clone()));
		Self::apply_delta(set, rules, options).map(|(set, _)| set)
	}

	/// Incremental remove for one unhidden entity
	pub fn apply_unhide(
		set: &ExclusionSet,
		entity: &EntityRef,
		options: PruneOptions,
	) -> ClResult<ExclusionSet> {
		let rules = Arc::new(set.rules().without_hidden(entity));
		Self::apply_delta(set, rules, options).map(|(set, _)| set)
	}

	// Loading //
	//*********//

	async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> ClResult<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = ClResult<T>>,
	{
		let mut attempt = 0u16;
		loop {
			match op().await {
				Ok(res) => return Ok(res),
				Err(err) if err.is_retryable() && self.retry.should_retry(attempt) => {
					let wait = self.retry.calculate_backoff(attempt);
					warn!("{} failed (attempt {}): {}, retrying in {:?}", what, attempt + 1, err, wait);
					tokio::time::sleep(wait).await;
					attempt += 1;
				}
				Err(err) => {
					error!("{} failed after {} attempts: {}", what, attempt + 1, err);
					return Err(err);
				}
			}
		}
	}

	/// Snapshot at `version`, or the current one
	pub async fn load_graph(&self, version: Option<SyncVersion>) -> ClResult<Arc<EntityGraph>> {
		self.with_retry("Snapshot fetch", || async move {
			self.graphs.graph_view(version).await.map_err(|err| match err {
				Error::SnapshotUnavailable(_) => err,
				err => Error::SnapshotUnavailable(err.to_string()),
			})
		})
		.await
	}

	pub async fn load_rules(&self, user_id: UserId) -> ClResult<Arc<RuleSet>> {
		let rules = self
			.with_retry("Rule fetch", || async move {
				self.rules.list_rules(user_id).await.map_err(rule_store_error)
			})
			.await?;
		let hidden = self
			.with_retry("Hidden entity fetch", || async move {
				self.rules.list_hidden(user_id).await.map_err(rule_store_error)
			})
			.await?;
		Ok(Arc::new(RuleSet::from_records(user_id, rules, hidden)))
	}

	/// Full recompute of one user against `graph`
	pub async fn recompute(
		&self,
		user_id: UserId,
		graph: Arc<EntityGraph>,
		priority: Priority,
	) -> ClResult<ExclusionSet> {
		let rules = self.load_rules(user_id).await?;
		let options = self.options;
		self.worker
			.spawn(priority, move || {
				let _span = debug_span!("exclusions", user = %user_id).entered();
				Self::full(user_id, graph, rules, options)
			})
			.await
	}

	/// Re-reads the user's rules and hides and updates `set` incrementally
	pub async fn refresh(
		&self,
		set: Arc<ExclusionSet>,
		priority: Priority,
	) -> ClResult<(ExclusionSet, UpdateMode)> {
		let rules = self.load_rules(set.user_id()).await?;
		let options = self.options;
		self.worker
			.spawn(priority, move || {
				let _span = debug_span!("exclusions", user = %set.user_id()).entered();
				Self::update(&set, rules, options)
			})
			.await
	}

	/// Like `refresh`, after a hide toggle of `entity`. If the store does not
	/// confirm the toggle the cached state cannot be trusted and the user is
	/// recomputed from scratch.
	pub async fn refresh_hide(
		&self,
		set: Arc<ExclusionSet>,
		entity: &EntityRef,
		hidden: bool,
		priority: Priority,
	) -> ClResult<(ExclusionSet, UpdateMode)> {
		let user_id = set.user_id();
		let rules = self.load_rules(user_id).await?;
		let options = self.options;

		if rules.is_hidden(entity) != hidden {
			let err = Error::InconsistentExclusionState(format!(
				"hide toggle of {} to {} not confirmed by the rule store",
				entity, hidden
			));
			warn!("User {}: {}, recomputing", user_id, err);
			let graph = Arc::clone(set.graph());
			let set = self.worker.spawn(priority, move || Self::full(user_id, graph, rules, options)).await?;
			return Ok((set, UpdateMode::SelfHealed));
		}

		self.worker
			.spawn(priority, move || {
				let _span = debug_span!("exclusions", user = %user_id).entered();
				Self::update(&set, rules, options)
			})
			.await
	}
}

fn rule_store_error(err: Error) -> Error {
	match err {
		Error::RuleStoreUnavailable(_) => err,
		err => Error::RuleStoreUnavailable(err.to_string()),
	}
}


// vim: ts=4
