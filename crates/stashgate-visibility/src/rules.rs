//! Normalized per-user view of admin rules and user hides.
//!
//! `RuleSet` is keyed by ids and independent of any snapshot. `ActiveRules` is
//! the same set resolved against one `EntityGraph`, with ids that do not exist
//! in that snapshot dropped.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use stashgate_types::rule::{HiddenEntity, RestrictionRule, RuleMode};

use crate::prelude::*;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleSet {
	user_id: UserId,
	include: BTreeMap<EntityKind, BTreeSet<EntityId>>,
	exclude: BTreeMap<EntityKind, BTreeSet<EntityId>>,
	hidden: BTreeSet<EntityRef>,
}

impl RuleSet {
	pub fn empty(user_id: UserId) -> Self {
		Self { user_id, ..Self::default() }
	}

	/// Builds the normalized set from store records. Records of other users and
	/// rules on kinds that cannot carry rules are skipped. A duplicate rule for
	/// one `(user, kind)` is merged fail-closed: excludes union, includes
	/// intersect.
	pub fn from_records(
		user_id: UserId,
		rules: impl IntoIterator<Item = RestrictionRule>,
		hidden: impl IntoIterator<Item = HiddenEntity>,
	) -> Self {
		let mut set = Self::empty(user_id);

		for rule in rules {
			if rule.user_id != user_id {
				warn!("Skipping rule of user {} returned for user {}", rule.user_id, user_id);
				continue;
			}
			if !rule.kind.is_rule_kind() {
				warn!("Skipping {:?} rule on unsupported kind {} for user {}", rule.mode, rule.kind, user_id);
				continue;
			}
			set.merge_rule(rule);
		}

		for entry in hidden {
			if entry.user_id != user_id {
				warn!("Skipping hidden entity of user {} returned for user {}", entry.user_id, user_id);
				continue;
			}
			set.hidden.insert(entry.entity);
		}

		set
	}

	fn merge_rule(&mut self, rule: RestrictionRule) {
		let RestrictionRule { user_id, kind, mode, ids } = rule;
		match mode {
			RuleMode::Exclude => {
				if let Some(existing) = self.exclude.get_mut(&kind) {
					warn!("Duplicate EXCLUDE {} rule for user {}, merging ids", kind, user_id);
					existing.extend(ids);
				} else {
					self.exclude.insert(kind, ids);
				}
			}
			RuleMode::Include => {
				if let Some(existing) = self.include.get_mut(&kind) {
					warn!("Duplicate INCLUDE {} rule for user {}, intersecting ids", kind, user_id);
					existing.retain(|id| ids.contains(id));
				} else {
					self.include.insert(kind, ids);
				}
			}
		}
	}

	pub fn user_id(&self) -> UserId {
		self.user_id
	}

	/// No rules and no hides: nothing can be excluded
	pub fn is_empty(&self) -> bool {
		self.include.is_empty() && self.exclude.is_empty() && self.hidden.is_empty()
	}

	pub fn has_include(&self) -> bool {
		!self.include.is_empty()
	}

	pub fn include(&self, kind: EntityKind) -> Option<&BTreeSet<EntityId>> {
		self.include.get(&kind)
	}

	pub fn exclude(&self, kind: EntityKind) -> Option<&BTreeSet<EntityId>> {
		self.exclude.get(&kind)
	}

	pub fn hidden(&self) -> &BTreeSet<EntityRef> {
		&self.hidden
	}

	pub fn is_hidden(&self, entity: &EntityRef) -> bool {
		self.hidden.contains(entity)
	}

	pub fn is_excluded(&self, entity: &EntityRef) -> bool {
		self.exclude.get(&entity.kind).is_some_and(|ids| ids.contains(&entity.id))
	}

	/// Rules in their store form, ordered by mode then kind
	pub fn rules(&self) -> Vec<RestrictionRule> {
		let include = self.include.iter().map(|(kind, ids)| (RuleMode::Include, kind, ids));
		let exclude = self.exclude.iter().map(|(kind, ids)| (RuleMode::Exclude, kind, ids));
		include
			.chain(exclude)
			.map(|(mode, kind, ids)| RestrictionRule {
				user_id: self.user_id,
				kind: *kind,
				mode,
				ids: ids.clone(),
			})
			.collect()
	}

	pub fn with_hidden(&self, entity: EntityRef) -> Self {
		let mut set = self.clone();
		set.hidden.insert(entity);
		set
	}

	pub fn without_hidden(&self, entity: &EntityRef) -> Self {
		let mut set = self.clone();
		set.hidden.remove(entity);
		set
	}

	/// Replaces the rule for `rule.kind`, whatever its mode was
	pub fn with_rule(&self, rule: RestrictionRule) -> Self {
		let mut set = self.without_rule(rule.kind);
		match rule.mode {
			RuleMode::Include => set.include.insert(rule.kind, rule.ids),
			RuleMode::Exclude => set.exclude.insert(rule.kind, rule.ids),
		};
		set
	}

	pub fn without_rule(&self, kind: EntityKind) -> Self {
		let mut set = self.clone();
		set.include.remove(&kind);
		set.exclude.remove(&kind);
		set
	}

	/// Changes needed to go from `self` to `newer`
	pub fn diff(&self, newer: &RuleSet) -> RuleDelta {
		let old = self.exclusion_sources();
		let new = newer.exclusion_sources();

		RuleDelta {
			added: new.difference(&old).cloned().collect(),
			removed: old.difference(&new).cloned().collect(),
			include_changed: self.include != newer.include,
		}
	}

	/// Every entity that is a direct cause of exclusion: EXCLUDE ids and hides
	fn exclusion_sources(&self) -> BTreeSet<EntityRef> {
		let excluded = self
			.exclude
			.iter()
			.flat_map(|(kind, ids)| ids.iter().map(|id| EntityRef::new(*kind, id.clone())));
		excluded.chain(self.hidden.iter().cloned()).collect()
	}

	/// Resolves ids to nodes of `graph`
	pub fn resolve(&self, graph: &EntityGraph) -> ActiveRules {
		let mut unresolved = 0usize;

		let mut include = BTreeMap::new();
		for (kind, ids) in &self.include {
			let nodes: HashSet<NodeIx> = ids
				.iter()
				.filter_map(|id| {
					let ix = graph.index_of(*kind, id);
					unresolved += usize::from(ix.is_none());
					ix
				})
				.collect();
			include.insert(*kind, nodes);
		}

		let mut exclude = HashSet::new();
		for (kind, ids) in &self.exclude {
			for id in ids {
				match graph.index_of(*kind, id) {
					Some(ix) => {
						exclude.insert(Node::new(*kind, ix));
					}
					None => unresolved += 1,
				}
			}
		}

		let mut hidden = HashSet::new();
		for entity in &self.hidden {
			match graph.node_of(entity) {
				Some(node) => {
					hidden.insert(node);
				}
				None => unresolved += 1,
			}
		}

		if unresolved > 0 {
			debug!(
				"{} rule ids of user {} are not present in snapshot {}",
				unresolved,
				self.user_id,
				graph.version()
			);
		}

		ActiveRules { include, exclude, hidden }
	}
}

/// Difference between two rule sets of one user
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleDelta {
	/// New EXCLUDE ids and new hides
	pub added: BTreeSet<EntityRef>,
	/// Dropped EXCLUDE ids and unhidden entities
	pub removed: BTreeSet<EntityRef>,
	/// Any INCLUDE rule was added, removed or changed
	pub include_changed: bool,
}

impl RuleDelta {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty() && !self.include_changed
	}
}

/// Rule set resolved against one snapshot
#[derive(Clone, Debug, Default)]
pub struct ActiveRules {
	include: BTreeMap<EntityKind, HashSet<NodeIx>>,
	exclude: HashSet<Node>,
	hidden: HashSet<Node>,
}

impl ActiveRules {
	pub fn is_empty(&self) -> bool {
		self.include.is_empty() && self.exclude.is_empty() && self.hidden.is_empty()
	}

	pub fn has_include(&self) -> bool {
		!self.include.is_empty()
	}

	/// INCLUDE rules as `(kind, allowed indices)`, in kind order
	pub fn includes(&self) -> impl Iterator<Item = (EntityKind, &HashSet<NodeIx>)> {
		self.include.iter().map(|(kind, allowed)| (*kind, allowed))
	}

	pub fn include_for(&self, kind: EntityKind) -> Option<&HashSet<NodeIx>> {
		self.include.get(&kind)
	}

	pub fn is_excluded(&self, node: Node) -> bool {
		self.exclude.contains(&node)
	}

	pub fn is_hidden(&self, node: Node) -> bool {
		self.hidden.contains(&node)
	}

	/// Listed by an EXCLUDE rule or hidden by the user
	pub fn is_source(&self, node: Node) -> bool {
		self.is_excluded(node) || self.is_hidden(node)
	}

	pub fn excluded(&self) -> impl Iterator<Item = Node> + '_ {
		self.exclude.iter().copied()
	}

	pub fn hidden(&self) -> impl Iterator<Item = Node> + '_ {
		self.hidden.iter().copied()
	}
}


// vim: ts=4
