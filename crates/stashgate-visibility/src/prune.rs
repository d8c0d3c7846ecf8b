//! Empty entity pruning.
//!
//! Organizational entities without any visible content or visible child are
//! excluded as `empty`. That includes entities the catalog never gave any
//! content, which carry no source; [`PruneOptions::keep_never_filled`] keeps
//! those visible instead. Tiers run in dependency order, each one reading
//! the decisions of the tiers before it:
//!
//! galleries → groups → studios → performers → tags
//!
//! Hierarchical tiers (groups, studios, tags) are solved as upward
//! reachability: an entity is visible if it has visible direct content or a
//! visible child. Propagation follows parent edges with a visited set, so
//! cyclic hierarchies terminate and contribute nothing on their own.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::config::PruneOptions;
use crate::exclusion::{Decision, ExclusionSet, prefer_source};
use crate::prelude::*;

/// Tier order of the pruner
pub const TIERS: [EntityKind; 5] = [
	EntityKind::Gallery,
	EntityKind::Group,
	EntityKind::Studio,
	EntityKind::Performer,
	EntityKind::Tag,
];

/// Entities a pruning pass reconsiders
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PruneScope {
	All,
	/// Closed set of organizational nodes, see [`EmptyEntityPruner::dirty_closure`]
	Dirty(BTreeSet<Node>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneStats {
	/// Entities newly excluded as empty
	pub pruned: usize,
	/// Entities whose empty exclusion was lifted
	pub restored: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct EmptyEntityPruner<'g> {
	graph: &'g EntityGraph,
	options: PruneOptions,
}

impl<'g> EmptyEntityPruner<'g> {
	pub fn new(graph: &'g EntityGraph, options: PruneOptions) -> Self {
		Self { graph, options }
	}

	/// Organizational nodes whose emptiness may change when `changed` nodes
	/// change visibility. Closed upward over hierarchies and across tiers.
	pub fn dirty_closure(&self, changed: impl IntoIterator<Item = Node>) -> BTreeSet<Node> {
		let mut dirty = BTreeSet::new();
		let mut queue: VecDeque<Node> = VecDeque::new();

		for node in changed {
			if !node.kind.is_content() {
				dirty.insert(node);
			}
			queue.push_back(node);
		}

		while let Some(node) = queue.pop_front() {
			self.visit_containers(node, |container| {
				if dirty.insert(container) {
					queue.push_back(container);
				}
			});
		}
		dirty
	}

	/// Runs every tier over `scope`, updating `set` in place
	pub fn prune(&self, set: &mut ExclusionSet, scope: &PruneScope) -> PruneStats {
		let mut stats = PruneStats::default();

		for kind in TIERS {
			let tier = match scope {
				PruneScope::All => self.prune_tier(set, kind, self.graph.nodes(kind)),
				PruneScope::Dirty(dirty) => {
					let nodes = dirty.range(Node::new(kind, 0)..=Node::new(kind, NodeIx::MAX)).copied();
					self.prune_tier(set, kind, nodes)
				}
			};
			stats.pruned += tier.pruned;
			stats.restored += tier.restored;
		}

		debug!(
			"Pruned {} and restored {} entities for user {} at {}",
			stats.pruned,
			stats.restored,
			set.user_id(),
			set.version()
		);
		stats
	}

	fn prune_tier(
		&self,
		set: &mut ExclusionSet,
		kind: EntityKind,
		nodes: impl Iterator<Item = Node>,
	) -> PruneStats {
		// Entities excluded by rules or hides stay as they are; previous empty
		// decisions are recomputed
		let mut candidates: HashSet<NodeIx> = HashSet::new();
		let mut was_empty: HashSet<NodeIx> = HashSet::new();
		for node in nodes {
			match set.get(node) {
				None => {
					candidates.insert(node.ix);
				}
				Some(decision) if decision.is_empty() => {
					set.remove(node);
					was_empty.insert(node.ix);
					candidates.insert(node.ix);
				}
				Some(_) => {}
			}
		}
		if candidates.is_empty() {
			return PruneStats::default();
		}

		for cyclic in self.graph.cycles().iter().filter(|n| n.kind == kind && candidates.contains(&n.ix)) {
			let err = Error::CyclicGraphDetected { kind, id: self.graph.id_of(*cyclic).into() };
			debug!("Pruning user {}: {}", set.user_id(), err);
		}

		let mut visible: HashSet<NodeIx> = HashSet::new();
		let mut queue: VecDeque<NodeIx> = VecDeque::new();
		for ix in &candidates {
			let node = Node::new(kind, *ix);
			let seed = (self.options.keep_never_filled && !self.has_content(node))
				|| self.has_visible_content(set, node)
				|| self
					.children(node)
					.iter()
					.any(|c| !candidates.contains(c) && !set.is_excluded(Node::new(kind, *c)));
			if seed {
				visible.insert(*ix);
				queue.push_back(*ix);
			}
		}

		while let Some(ix) = queue.pop_front() {
			for parent in self.parents(Node::new(kind, ix)) {
				if candidates.contains(parent) && visible.insert(*parent) {
					queue.push_back(*parent);
				}
			}
		}

		let mut stats = PruneStats::default();
		let mut emptied: Vec<NodeIx> =
			candidates.iter().filter(|ix| !visible.contains(ix)).copied().collect();
		emptied.sort_unstable();
		for ix in emptied {
			let node = Node::new(kind, ix);
			let source = self.empty_source(node);
			set.insert(node, Decision::empty(source));
			if !was_empty.contains(&ix) {
				stats.pruned += 1;
			}
		}
		stats.restored = was_empty.iter().filter(|ix| visible.contains(ix)).count();
		stats
	}

	fn has_content(&self, node: Node) -> bool {
		let mut any = !self.children(node).is_empty() || self.counts_as_filled(node);
		if !any {
			self.visit_content(node, |_| any = true);
		}
		any
	}

	fn has_visible_content(&self, set: &ExclusionSet, node: Node) -> bool {
		if self.counts_as_filled(node) {
			return true;
		}
		let mut any = false;
		self.visit_content(node, |content| any |= !set.is_excluded(content));
		any
	}

	/// Gallery without image nodes whose catalog count says it has images
	fn counts_as_filled(&self, node: Node) -> bool {
		node.kind == EntityKind::Gallery
			&& self.options.gallery_count_fallback
			&& self.graph.gallery_images(node.ix).is_empty()
			&& self.graph.gallery(node.ix).is_some_and(|g| g.image_count > 0)
	}

	/// Smallest lost content entity or child
	fn empty_source(&self, node: Node) -> Option<Node> {
		let mut source = None;
		self.visit_content(node, |content| source = prefer_source(self.graph, source, content));
		for child in self.children(node) {
			source = prefer_source(self.graph, source, Node::new(node.kind, *child));
		}
		source
	}

	fn visit_content(&self, node: Node, mut visit: impl FnMut(Node)) {
		let g = self.graph;
		let mut all = |kind: EntityKind, ixs: &[NodeIx]| {
			for ix in ixs {
				visit(Node::new(kind, *ix));
			}
		};

		match node.kind {
			EntityKind::Gallery => all(EntityKind::Image, g.gallery_images(node.ix)),
			EntityKind::Group => all(EntityKind::Scene, g.group_scenes(node.ix)),
			EntityKind::Studio => {
				for kind in [EntityKind::Scene, EntityKind::Group, EntityKind::Gallery, EntityKind::Image] {
					all(kind, g.studio_owned(node.ix, kind));
				}
			}
			EntityKind::Performer => {
				for kind in [EntityKind::Scene, EntityKind::Gallery, EntityKind::Image] {
					all(kind, g.featuring(node.ix, kind));
				}
				if let Some(performer) = g.performer(node.ix) {
					all(EntityKind::Group, &performer.groups[..]);
				}
			}
			EntityKind::Tag => {
				for kind in EntityKind::ALL.into_iter().filter(|k| *k != EntityKind::Tag) {
					all(kind, g.tagged(node.ix, kind));
				}
			}
			EntityKind::Scene | EntityKind::Image => {}
		}
	}

	fn children(&self, node: Node) -> &'g [NodeIx] {
		match node.kind {
			EntityKind::Group => self.graph.group_children(node.ix),
			EntityKind::Studio => self.graph.studio_children(node.ix),
			EntityKind::Tag => self.graph.tag_children(node.ix),
			_ => &[],
		}
	}

	fn parents(&self, node: Node) -> &'g [NodeIx] {
		match node.kind {
			EntityKind::Group => self.graph.group_parents(node.ix),
			EntityKind::Studio => {
				self.graph.studio(node.ix).map(|s| s.parent.as_slice()).unwrap_or(&[])
			}
			EntityKind::Tag => self.graph.tag_parents(node.ix),
			_ => &[],
		}
	}

	/// Organizational entities counting `node` as content or as a child
	fn visit_containers(&self, node: Node, mut visit: impl FnMut(Node)) {
		let g = self.graph;
		for tag in g.tags_of(node) {
			visit(Node::new(EntityKind::Tag, *tag));
		}
		if let Some(studio) = g.studio_of(node) {
			visit(Node::new(EntityKind::Studio, studio));
		}
		for performer in g.performers_of(node) {
			visit(Node::new(EntityKind::Performer, *performer));
		}
		let mut all = |kind: EntityKind, ixs: &[NodeIx]| {
			for ix in ixs {
				visit(Node::new(kind, *ix));
			}
		};

		match node.kind {
			EntityKind::Scene => {
				if let Some(scene) = g.scene(node.ix) {
					all(EntityKind::Group, &scene.groups[..]);
				}
			}
			EntityKind::Image => {
				if let Some(image) = g.image(node.ix) {
					all(EntityKind::Gallery, &image.galleries[..]);
				}
			}
			EntityKind::Group => {
				all(EntityKind::Group, g.group_parents(node.ix));
				all(EntityKind::Performer, g.group_performers(node.ix));
			}
			EntityKind::Studio | EntityKind::Tag => all(node.kind, self.parents(node)),
			EntityKind::Gallery | EntityKind::Performer => {}
		}
	}
}


// vim: ts=4
