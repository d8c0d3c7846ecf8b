//! Exclusion sets: the derived per-user projection of rules and hides.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

use crate::prelude::*;
use crate::rules::RuleSet;

/// Why an entity is excluded. Declaration order is precedence, highest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionReason {
	/// Admin rule
	Restricted,
	/// Hidden by the user
	Hidden,
	/// Related to an entity hidden by the user
	Cascade,
	/// Organizational entity left without visible content
	Empty,
}

impl ExclusionReason {
	pub const ALL: [ExclusionReason; 4] = [
		ExclusionReason::Restricted,
		ExclusionReason::Hidden,
		ExclusionReason::Cascade,
		ExclusionReason::Empty,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			ExclusionReason::Restricted => "restricted",
			ExclusionReason::Hidden => "hidden",
			ExclusionReason::Cascade => "cascade",
			ExclusionReason::Empty => "empty",
		}
	}
}

impl std::fmt::Display for ExclusionReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Exclusion of one node, with the upstream cause when there is one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
	pub reason: ExclusionReason,
	pub source: Option<Node>,
}

impl Decision {
	pub fn new(reason: ExclusionReason, source: Option<Node>) -> Self {
		Self { reason, source }
	}

	pub fn restricted(source: Option<Node>) -> Self {
		Self::new(ExclusionReason::Restricted, source)
	}

	pub fn hidden() -> Self {
		Self::new(ExclusionReason::Hidden, None)
	}

	pub fn cascade(source: Node) -> Self {
		Self::new(ExclusionReason::Cascade, Some(source))
	}

	pub fn empty(source: Option<Node>) -> Self {
		Self::new(ExclusionReason::Empty, source)
	}

	/// Set by the pruner rather than by a rule or hide
	pub fn is_empty(&self) -> bool {
		self.reason == ExclusionReason::Empty
	}
}

/// Picks the preferred source among candidates: smallest by kind, then id
pub fn prefer_source(graph: &EntityGraph, current: Option<Node>, candidate: Node) -> Option<Node> {
	match current {
		Some(cur) if (cur.kind, graph.id_of(cur)) <= (candidate.kind, graph.id_of(candidate)) => {
			Some(cur)
		}
		_ => Some(candidate),
	}
}

/// Exclusion record in its external form
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionRecord {
	pub user_id: UserId,
	pub kind: EntityKind,
	pub id: EntityId,
	pub reason: ExclusionReason,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source_kind: Option<EntityKind>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source_id: Option<EntityId>,
	pub computed_at_version: SyncVersion,
}

impl ExclusionRecord {
	pub fn source(&self) -> Option<EntityRef> {
		match (self.source_kind, &self.source_id) {
			(Some(kind), Some(id)) => Some(EntityRef::new(kind, id.clone())),
			_ => None,
		}
	}
}

/// All exclusion decisions of one user against one snapshot
///
/// Visible counts are maintained on every insert and remove. Excluded id sets
/// are materialized lazily per kind and shared with callers.
#[derive(Clone, Debug)]
pub struct ExclusionSet {
	user_id: UserId,
	graph: Arc<EntityGraph>,
	rules: Arc<RuleSet>,
	decisions: BTreeMap<Node, Decision>,
	by_source: HashMap<Node, BTreeSet<Node>>,
	excluded: [usize; 7],
	ids: [OnceLock<Arc<BTreeSet<EntityId>>>; 7],
}

impl ExclusionSet {
	pub fn new(user_id: UserId, graph: Arc<EntityGraph>, rules: Arc<RuleSet>) -> Self {
		Self {
			user_id,
			graph,
			rules,
			decisions: BTreeMap::new(),
			by_source: HashMap::new(),
			excluded: [0; 7],
			ids: Default::default(),
		}
	}

	/// Copy to be updated against a newer rule set
	pub fn fork(&self, rules: Arc<RuleSet>) -> Self {
		Self {
			user_id: self.user_id,
			graph: Arc::clone(&self.graph),
			rules,
			decisions: self.decisions.clone(),
			by_source: self.by_source.clone(),
			excluded: self.excluded,
			ids: Default::default(),
		}
	}

	/// Same decisions against another snapshot of identical content. Returns
	/// `None` if the snapshot content differs.
	pub fn retag(&self, graph: Arc<EntityGraph>) -> Option<Self> {
		if !self.graph.same_content(&graph) {
			return None;
		}
		Some(self.rebase(graph))
	}

	/// Same decisions against `graph`, which the caller checked to have the
	/// content of the current one
	pub(crate) fn rebase(&self, graph: Arc<EntityGraph>) -> Self {
		let mut set = self.fork(Arc::clone(&self.rules));
		set.graph = graph;
		set
	}

	pub fn user_id(&self) -> UserId {
		self.user_id
	}

	pub fn version(&self) -> SyncVersion {
		self.graph.version()
	}

	pub fn graph(&self) -> &Arc<EntityGraph> {
		&self.graph
	}

	/// Rules and hides the set was computed from
	pub fn rules(&self) -> &Arc<RuleSet> {
		&self.rules
	}

	pub fn len(&self) -> usize {
		self.decisions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.decisions.is_empty()
	}

	pub fn get(&self, node: Node) -> Option<&Decision> {
		self.decisions.get(&node)
	}

	pub fn is_excluded(&self, node: Node) -> bool {
		self.decisions.contains_key(&node)
	}

	/// Records `decision` for `node`, replacing any previous one
	pub fn insert(&mut self, node: Node, decision: Decision) -> Option<Decision> {
		let prev = self.decisions.insert(node, decision);
		match prev {
			Some(prev) => self.unlink(node, prev.source),
			None => self.excluded[node.kind.index()] += 1,
		}
		if let Some(source) = decision.source {
			self.by_source.entry(source).or_default().insert(node);
		}
		self.ids[node.kind.index()].take();
		prev
	}

	pub fn remove(&mut self, node: Node) -> Option<Decision> {
		let prev = self.decisions.remove(&node)?;
		self.unlink(node, prev.source);
		self.excluded[node.kind.index()] -= 1;
		self.ids[node.kind.index()].take();
		Some(prev)
	}

	fn unlink(&mut self, node: Node, source: Option<Node>) {
		let Some(source) = source else { return };
		if let Some(targets) = self.by_source.get_mut(&source) {
			targets.remove(&node);
			if targets.is_empty() {
				self.by_source.remove(&source);
			}
		}
	}

	/// Nodes whose recorded source is `source`
	pub fn sourced_from(&self, source: Node) -> Vec<Node> {
		self.by_source.get(&source).map(|t| t.iter().copied().collect()).unwrap_or_default()
	}

	pub fn iter(&self) -> impl Iterator<Item = (Node, &Decision)> {
		self.decisions.iter().map(|(node, decision)| (*node, decision))
	}

	pub fn iter_kind(&self, kind: EntityKind) -> impl Iterator<Item = (Node, &Decision)> {
		self.decisions
			.range(Node::new(kind, 0)..=Node::new(kind, NodeIx::MAX))
			.map(|(node, decision)| (*node, decision))
	}

	/// Decision for an entity of the snapshot
	pub fn decision_of(&self, entity: &EntityRef) -> Option<&Decision> {
		self.graph.node_of(entity).and_then(|node| self.decisions.get(&node))
	}

	/// Ids unknown to the snapshot are not visible
	pub fn is_visible(&self, kind: EntityKind, id: &str) -> bool {
		self.graph.index_of(kind, id).is_some_and(|ix| !self.is_excluded(Node::new(kind, ix)))
	}

	pub fn excluded_count(&self, kind: EntityKind) -> usize {
		self.excluded[kind.index()]
	}

	pub fn visible_count(&self, kind: EntityKind) -> usize {
		self.graph.len(kind).saturating_sub(self.excluded[kind.index()])
	}

	pub fn excluded_ids(&self, kind: EntityKind) -> Arc<BTreeSet<EntityId>> {
		let ids = self.ids[kind.index()].get_or_init(|| {
			Arc::new(
				self.iter_kind(kind)
					.map(|(node, _)| EntityId::from(self.graph.id_of(node)))
					.collect(),
			)
		});
		Arc::clone(ids)
	}

	pub fn reason_counts(&self) -> BTreeMap<ExclusionReason, usize> {
		let mut counts = BTreeMap::new();
		for decision in self.decisions.values() {
			*counts.entry(decision.reason).or_insert(0) += 1;
		}
		counts
	}

	pub fn record(&self, node: Node, decision: &Decision) -> ExclusionRecord {
		ExclusionRecord {
			user_id: self.user_id,
			kind: node.kind,
			id: self.graph.id_of(node).into(),
			reason: decision.reason,
			source_kind: decision.source.map(|s| s.kind),
			source_id: decision.source.map(|s| self.graph.id_of(s).into()),
			computed_at_version: self.version(),
		}
	}

	/// All records, ordered by kind then id
	pub fn records(&self) -> Vec<ExclusionRecord> {
		self.decisions
			.iter()
			.map(|(node, decision)| self.record(*node, decision))
			.sorted_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)))
			.collect()
	}
}

impl PartialEq for ExclusionSet {
	fn eq(&self, other: &Self) -> bool {
		self.user_id == other.user_id
			&& self.version() == other.version()
			&& self.decisions == other.decisions
	}
}


// vim: ts=4
