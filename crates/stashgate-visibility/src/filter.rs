//! Direct (pre-pruning) visibility decisions.
//!
//! Scenes are the densest cross-reference point, so the filter is named after
//! them, but the same evaluation applies to every kind: an entity is decided
//! by its own rule listing, its INCLUDE relationships, and the EXCLUDE rules
//! and hides found in its reference closure.
//!
//! Evaluation order is a fixed contract:
//! 1. INCLUDE rules, one per kind, composed as intersection
//! 2. EXCLUDE rules, as a set difference on what INCLUDE let through
//! 3. user hides, then hides of referenced entities (cascade)

use std::collections::{BTreeMap, BTreeSet};

use crate::cascade::{CascadeResolver, RuleCascade, include_applies};
use crate::exclusion::{Decision, prefer_source};
use crate::prelude::*;
use crate::rules::{ActiveRules, RuleSet};

pub struct SceneVisibilityFilter<'a> {
	graph: &'a EntityGraph,
	rules: &'a RuleSet,
	active: ActiveRules,
	resolver: CascadeResolver<'a>,
}

impl<'a> SceneVisibilityFilter<'a> {
	pub fn new(graph: &'a EntityGraph, rules: &'a RuleSet) -> Self {
		Self { graph, rules, active: rules.resolve(graph), resolver: CascadeResolver::new(graph) }
	}

	pub fn active(&self) -> &ActiveRules {
		&self.active
	}

	pub fn resolver(&self) -> &CascadeResolver<'a> {
		&self.resolver
	}

	/// Union of the scene's tags and the tags of its performers, studio and groups
	pub fn tag_closure(&self, scene: NodeIx) -> BTreeSet<NodeIx> {
		let mut tags = BTreeSet::new();
		self.resolver.visit_references(Node::new(EntityKind::Scene, scene), |node| {
			if node.kind == EntityKind::Tag {
				tags.insert(node.ix);
			}
		});
		tags
	}

	/// Nodes that may carry a direct decision. Every other node is visible
	/// before pruning.
	pub fn candidates(&self) -> BTreeSet<Node> {
		if self.active.is_empty() {
			return BTreeSet::new();
		}

		let mut nodes = BTreeSet::new();
		for rule in self.rules.rules() {
			match self.resolver.resolve_rule(&rule) {
				RuleCascade::Exclude(affected) => nodes.extend(affected),
				RuleCascade::Include(filter) => {
					for kind in EntityKind::ALL.into_iter().filter(|kind| filter.applies_to(*kind)) {
						nodes.extend(self.graph.nodes(kind));
					}
				}
			}
		}
		nodes.extend(self.resolver.expand(self.active.hidden()));
		nodes
	}

	/// Scene exclusion set of the user
	pub fn filter_scenes(&self) -> BTreeMap<NodeIx, Decision> {
		self.candidates()
			.into_iter()
			.filter(|node| node.kind == EntityKind::Scene)
			.filter_map(|node| self.evaluate(node).map(|decision| (node.ix, decision)))
			.collect()
	}

	/// Direct decision for one node, `None` if rules and hides leave it visible
	pub fn evaluate(&self, node: Node) -> Option<Decision> {
		if self.active.is_empty() {
			return None;
		}
		if self.active.has_include() && !self.passes_includes(node) {
			return Some(Decision::restricted(None));
		}
		if self.active.is_excluded(node) {
			return Some(Decision::restricted(None));
		}

		let mut restricted_by = None;
		let mut hidden_by = None;
		self.resolver.visit_references(node, |r| {
			if self.active.is_excluded(r) {
				restricted_by = prefer_source(self.graph, restricted_by, r);
			}
			if self.active.is_hidden(r) {
				hidden_by = prefer_source(self.graph, hidden_by, r);
			}
		});

		if restricted_by.is_some() {
			return Some(Decision::restricted(restricted_by));
		}
		if self.active.is_hidden(node) {
			return Some(Decision::hidden());
		}
		hidden_by.map(Decision::cascade)
	}

	fn passes_includes(&self, node: Node) -> bool {
		for (kind, allowed) in self.active.includes() {
			if !include_applies(kind, node.kind) {
				continue;
			}
			let pass = if kind == node.kind {
				allowed.contains(&node.ix)
			} else {
				let mut hit = false;
				self.resolver.visit_references(node, |r| {
					hit |= r.kind == kind && allowed.contains(&r.ix);
				});
				hit
			};
			if !pass {
				return false;
			}
		}
		true
	}
}


// vim: ts=4
