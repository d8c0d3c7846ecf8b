//! Rule and hide expansion over the relationship graph.
//!
//! Every entity has a *reference closure*: the entities whose exclusion can
//! exclude it. The closure is flat: an entity carrying a tag references that
//! tag, but a tag does not reference its parent tags, and child studios or
//! groups do not reference their parents.
//!
//! | kind      | references                                                   |
//! |-----------|--------------------------------------------------------------|
//! | scene     | tags, studio (+tags), performers (+tags), groups (+tags), galleries |
//! | image     | tags, studio (+tags), performers (+tags), galleries          |
//! | gallery   | tags, studio (+tags), performers (+tags)                     |
//! | group     | tags, studio                                                 |
//! | performer | tags                                                         |
//! | studio    | tags                                                         |
//! | tag       | -                                                            |
//!
//! [`CascadeResolver::referrers`] walks the reverse indices of the snapshot
//! and is the exact inverse of [`CascadeResolver::visit_references`].

use std::collections::{BTreeSet, HashSet};

use stashgate_types::rule::{RestrictionRule, RuleMode};

use crate::prelude::*;

/// Entities directly affected by a rule or a hidden entity
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AffectedSet {
	nodes: BTreeSet<Node>,
}

impl AffectedSet {
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn contains(&self, node: Node) -> bool {
		self.nodes.contains(&node)
	}

	pub fn iter(&self) -> impl Iterator<Item = Node> + '_ {
		self.nodes.iter().copied()
	}

	pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = Node> + '_ {
		self.nodes.range(Node::new(kind, 0)..=Node::new(kind, NodeIx::MAX)).copied()
	}

	/// Affected ids of one kind
	pub fn ids(&self, graph: &EntityGraph, kind: EntityKind) -> BTreeSet<EntityId> {
		self.of_kind(kind).map(|node| EntityId::from(graph.id_of(node))).collect()
	}
}

impl IntoIterator for AffectedSet {
	type Item = Node;
	type IntoIter = std::collections::btree_set::IntoIter<Node>;

	fn into_iter(self) -> Self::IntoIter {
		self.nodes.into_iter()
	}
}

/// Whitelist produced by an INCLUDE rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncludeFilter {
	pub kind: EntityKind,
	pub allowed: HashSet<NodeIx>,
}

impl IncludeFilter {
	pub fn applies_to(&self, kind: EntityKind) -> bool {
		include_applies(self.kind, kind)
	}
}

/// Whether an INCLUDE rule on `rule_kind` constrains entities of `kind`.
/// Content only relates to the rule kinds it can reference; organizational
/// entities are only constrained by a rule on their own kind.
pub fn include_applies(rule_kind: EntityKind, kind: EntityKind) -> bool {
	if rule_kind == kind {
		return true;
	}
	match kind {
		EntityKind::Scene => rule_kind.is_rule_kind(),
		EntityKind::Image => {
			matches!(rule_kind, EntityKind::Tag | EntityKind::Studio | EntityKind::Gallery)
		}
		EntityKind::Gallery => matches!(rule_kind, EntityKind::Tag | EntityKind::Studio),
		_ => false,
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleCascade {
	Exclude(AffectedSet),
	Include(IncludeFilter),
}

#[derive(Clone, Copy, Debug)]
pub struct CascadeResolver<'g> {
	graph: &'g EntityGraph,
}

impl<'g> CascadeResolver<'g> {
	pub fn new(graph: &'g EntityGraph) -> Self {
		Self { graph }
	}

	/// Expands one rule. Ids missing from the snapshot affect nothing.
	pub fn resolve_rule(&self, rule: &RestrictionRule) -> RuleCascade {
		let nodes = rule
			.ids
			.iter()
			.filter_map(|id| self.graph.index_of(rule.kind, id))
			.map(|ix| Node::new(rule.kind, ix));

		match rule.mode {
			RuleMode::Exclude => {
				if rule.ids.is_empty() {
					return RuleCascade::Exclude(AffectedSet::default());
				}
				RuleCascade::Exclude(self.expand(nodes))
			}
			RuleMode::Include => RuleCascade::Include(IncludeFilter {
				kind: rule.kind,
				allowed: nodes.map(|node| node.ix).collect(),
			}),
		}
	}

	/// `sources` plus every entity referencing one of them
	pub fn expand(&self, sources: impl IntoIterator<Item = Node>) -> AffectedSet {
		let mut nodes = BTreeSet::new();
		for source in sources {
			nodes.insert(source);
			self.visit_referrers(source, |node| {
				nodes.insert(node);
			});
		}
		AffectedSet { nodes }
	}

	/// Entities whose reference closure contains `node`
	pub fn referrers(&self, node: Node) -> BTreeSet<Node> {
		let mut nodes = BTreeSet::new();
		self.visit_referrers(node, |n| {
			nodes.insert(n);
		});
		nodes
	}

	/// Reference closure of `node`, may contain duplicates
	pub fn references(&self, node: Node) -> Vec<Node> {
		let mut nodes = Vec::new();
		self.visit_references(node, |n| nodes.push(n));
		nodes
	}

	pub fn visit_references(&self, node: Node, mut visit: impl FnMut(Node)) {
		let g = self.graph;

		match node.kind {
			EntityKind::Tag => {}
			EntityKind::Performer | EntityKind::Studio => self.visit_tags(node, &mut visit),
			EntityKind::Group => {
				self.visit_tags(node, &mut visit);
				if let Some(studio) = g.studio_of(node) {
					visit(Node::new(EntityKind::Studio, studio));
				}
			}
			EntityKind::Scene | EntityKind::Image | EntityKind::Gallery => {
				self.visit_tags(node, &mut visit);
				if let Some(studio) = g.studio_of(node) {
					let studio = Node::new(EntityKind::Studio, studio);
					visit(studio);
					self.visit_tags(studio, &mut visit);
				}
				for performer in g.performers_of(node) {
					let performer = Node::new(EntityKind::Performer, *performer);
					visit(performer);
					self.visit_tags(performer, &mut visit);
				}
				let galleries = match node.kind {
					EntityKind::Scene => g.scene(node.ix).map(|scene| {
						for group in &scene.groups {
							let group = Node::new(EntityKind::Group, *group);
							visit(group);
							self.visit_tags(group, &mut visit);
						}
						&scene.galleries[..]
					}),
					EntityKind::Image => g.image(node.ix).map(|image| &image.galleries[..]),
					_ => None,
				};
				for gallery in galleries.into_iter().flatten() {
					visit(Node::new(EntityKind::Gallery, *gallery));
				}
			}
		}
	}

	fn visit_tags(&self, owner: Node, visit: &mut impl FnMut(Node)) {
		for tag in self.graph.tags_of(owner) {
			visit(Node::new(EntityKind::Tag, *tag));
		}
	}

	pub fn visit_referrers(&self, node: Node, mut visit: impl FnMut(Node)) {
		let g = self.graph;
		let mut all = |kind: EntityKind, ixs: &[NodeIx]| {
			for ix in ixs {
				visit(Node::new(kind, *ix));
			}
		};

		match node.kind {
			EntityKind::Tag => {
				for kind in EntityKind::ALL {
					all(kind, g.tagged(node.ix, kind));
				}
				for studio in g.tagged(node.ix, EntityKind::Studio) {
					for kind in [EntityKind::Scene, EntityKind::Gallery, EntityKind::Image] {
						all(kind, g.studio_owned(*studio, kind));
					}
				}
				for performer in g.tagged(node.ix, EntityKind::Performer) {
					for kind in [EntityKind::Scene, EntityKind::Gallery, EntityKind::Image] {
						all(kind, g.featuring(*performer, kind));
					}
				}
				for group in g.tagged(node.ix, EntityKind::Group) {
					all(EntityKind::Scene, g.group_scenes(*group));
				}
			}
			EntityKind::Studio => {
				for kind in [EntityKind::Scene, EntityKind::Group, EntityKind::Gallery, EntityKind::Image] {
					all(kind, g.studio_owned(node.ix, kind));
				}
			}
			EntityKind::Performer => {
				for kind in [EntityKind::Scene, EntityKind::Gallery, EntityKind::Image] {
					all(kind, g.featuring(node.ix, kind));
				}
			}
			EntityKind::Group => all(EntityKind::Scene, g.group_scenes(node.ix)),
			EntityKind::Gallery => {
				all(EntityKind::Scene, g.gallery_scenes(node.ix));
				all(EntityKind::Image, g.gallery_images(node.ix));
			}
			EntityKind::Scene | EntityKind::Image => {}
		}
	}
}


// vim: ts=4
