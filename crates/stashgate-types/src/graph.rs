//! Immutable, versioned catalog snapshot with prebuilt adjacency.
//!
//! A snapshot is assembled from plain records (string ids, as delivered by the
//! catalog sync) and resolved once into dense per-kind node indices. Every
//! reverse relationship the visibility engine walks is built here, once per
//! version, as a compressed adjacency list. Nothing is recomputed per query.
//!
//! Edges pointing at ids missing from the snapshot are dropped and counted.
//! Cycles in the tag, group and studio hierarchies are detected and reported,
//! the engine's traversals stay safe either way.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::prelude::*;

/// Dense index of an entity within its kind
pub type NodeIx = u32;

/// Entity handle inside one snapshot. Only meaningful together with that snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node {
	pub kind: EntityKind,
	pub ix: NodeIx,
}

impl Node {
	pub fn new(kind: EntityKind, ix: NodeIx) -> Self {
		Self { kind, ix }
	}
}

// Records //
//*********//

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneRecord {
	pub id: EntityId,
	pub studio: Option<EntityId>,
	pub performers: Vec<EntityId>,
	pub tags: Vec<EntityId>,
	pub groups: Vec<EntityId>,
	pub galleries: Vec<EntityId>,
}

impl SceneRecord {
	pub fn new(id: impl Into<EntityId>) -> Self {
		Self { id: id.into(), ..Default::default() }
	}

	pub fn studio(mut self, studio: impl Into<EntityId>) -> Self {
		self.studio = Some(studio.into());
		self
	}

	pub fn performers<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.performers = ids.into_iter().map(Into::into).collect();
		self
	}

	pub fn tags<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.tags = ids.into_iter().map(Into::into).collect();
		self
	}

	pub fn groups<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.groups = ids.into_iter().map(Into::into).collect();
		self
	}

	pub fn galleries<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.galleries = ids.into_iter().map(Into::into).collect();
		self
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformerRecord {
	pub id: EntityId,
	pub tags: Vec<EntityId>,
	/// Group memberships reported directly by the catalog, if any
	pub groups: Vec<EntityId>,
}

impl PerformerRecord {
	pub fn new(id: impl Into<EntityId>) -> Self {
		Self { id: id.into(), ..Default::default() }
	}

	pub fn tags<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.tags = ids.into_iter().map(Into::into).collect();
		self
	}

	pub fn groups<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.groups = ids.into_iter().map(Into::into).collect();
		self
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioRecord {
	pub id: EntityId,
	pub parent: Option<EntityId>,
	pub tags: Vec<EntityId>,
}

impl StudioRecord {
	pub fn new(id: impl Into<EntityId>) -> Self {
		Self { id: id.into(), ..Default::default() }
	}

	pub fn parent(mut self, parent: impl Into<EntityId>) -> Self {
		self.parent = Some(parent.into());
		self
	}

	pub fn tags<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.tags = ids.into_iter().map(Into::into).collect();
		self
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TagRecord {
	pub id: EntityId,
	pub parents: Vec<EntityId>,
}

impl TagRecord {
	pub fn new(id: impl Into<EntityId>) -> Self {
		Self { id: id.into(), ..Default::default() }
	}

	pub fn parents<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.parents = ids.into_iter().map(Into::into).collect();
		self
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupRecord {
	pub id: EntityId,
	pub studio: Option<EntityId>,
	pub parents: Vec<EntityId>,
	pub tags: Vec<EntityId>,
}

impl GroupRecord {
	pub fn new(id: impl Into<EntityId>) -> Self {
		Self { id: id.into(), ..Default::default() }
	}

	pub fn studio(mut self, studio: impl Into<EntityId>) -> Self {
		self.studio = Some(studio.into());
		self
	}

	pub fn parents<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.parents = ids.into_iter().map(Into::into).collect();
		self
	}

	pub fn tags<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.tags = ids.into_iter().map(Into::into).collect();
		self
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryRecord {
	pub id: EntityId,
	pub studio: Option<EntityId>,
	pub performers: Vec<EntityId>,
	pub tags: Vec<EntityId>,
	/// Total image count as reported by the catalog (not user visible count)
	pub image_count: u32,
}

impl GalleryRecord {
	pub fn new(id: impl Into<EntityId>) -> Self {
		Self { id: id.into(), ..Default::default() }
	}

	pub fn studio(mut self, studio: impl Into<EntityId>) -> Self {
		self.studio = Some(studio.into());
		self
	}

	pub fn performers<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.performers = ids.into_iter().map(Into::into).collect();
		self
	}

	pub fn tags<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.tags = ids.into_iter().map(Into::into).collect();
		self
	}

	pub fn image_count(mut self, count: u32) -> Self {
		self.image_count = count;
		self
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRecord {
	pub id: EntityId,
	pub studio: Option<EntityId>,
	pub galleries: Vec<EntityId>,
	pub performers: Vec<EntityId>,
	pub tags: Vec<EntityId>,
}

impl ImageRecord {
	pub fn new(id: impl Into<EntityId>) -> Self {
		Self { id: id.into(), ..Default::default() }
	}

	pub fn studio(mut self, studio: impl Into<EntityId>) -> Self {
		self.studio = Some(studio.into());
		self
	}

	pub fn galleries<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.galleries = ids.into_iter().map(Into::into).collect();
		self
	}

	pub fn performers<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.performers = ids.into_iter().map(Into::into).collect();
		self
	}

	pub fn tags<I: IntoIterator<Item = S>, S: Into<EntityId>>(mut self, ids: I) -> Self {
		self.tags = ids.into_iter().map(Into::into).collect();
		self
	}
}

/// Full catalog content as produced by a sync run
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSnapshot {
	pub scenes: Vec<SceneRecord>,
	pub performers: Vec<PerformerRecord>,
	pub studios: Vec<StudioRecord>,
	pub tags: Vec<TagRecord>,
	pub groups: Vec<GroupRecord>,
	pub galleries: Vec<GalleryRecord>,
	pub images: Vec<ImageRecord>,
}

// Resolved nodes //
//****************//

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Scene {
	pub studio: Option<NodeIx>,
	pub performers: Box<[NodeIx]>,
	pub tags: Box<[NodeIx]>,
	pub groups: Box<[NodeIx]>,
	pub galleries: Box<[NodeIx]>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Performer {
	pub tags: Box<[NodeIx]>,
	pub groups: Box<[NodeIx]>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Studio {
	pub parent: Option<NodeIx>,
	pub tags: Box<[NodeIx]>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Tag {
	pub parents: Box<[NodeIx]>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Group {
	pub studio: Option<NodeIx>,
	pub parents: Box<[NodeIx]>,
	pub tags: Box<[NodeIx]>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Gallery {
	pub studio: Option<NodeIx>,
	pub performers: Box<[NodeIx]>,
	pub tags: Box<[NodeIx]>,
	pub image_count: u32,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Image {
	pub studio: Option<NodeIx>,
	pub galleries: Box<[NodeIx]>,
	pub performers: Box<[NodeIx]>,
	pub tags: Box<[NodeIx]>,
}

// Adjacency //
//***********//

/// Compressed adjacency list: `targets[offsets[i]..offsets[i + 1]]` are the
/// neighbours of node `i`, sorted and deduplicated.
#[derive(Debug, Default)]
pub struct Adjacency {
	offsets: Vec<usize>,
	targets: Vec<NodeIx>,
}

impl Adjacency {
	fn build(len: usize, mut pairs: Vec<(NodeIx, NodeIx)>) -> Self {
		pairs.sort_unstable();
		pairs.dedup();

		let mut offsets = vec![0usize; len + 1];
		for &(from, _) in &pairs {
			offsets[from as usize + 1] += 1;
		}
		for i in 0..len {
			offsets[i + 1] += offsets[i];
		}
		let targets = pairs.into_iter().map(|(_, to)| to).collect();

		Self { offsets, targets }
	}

	pub fn get(&self, ix: NodeIx) -> &[NodeIx] {
		let ix = ix as usize;
		match (self.offsets.get(ix), self.offsets.get(ix + 1)) {
			(Some(&start), Some(&end)) => &self.targets[start..end],
			_ => &[],
		}
	}

	pub fn edge_count(&self) -> usize {
		self.targets.len()
	}
}

/// Reverse relationships, built once per snapshot
#[derive(Debug, Default)]
struct Reverse {
	tag_children: Adjacency,
	tag_scenes: Adjacency,
	tag_performers: Adjacency,
	tag_studios: Adjacency,
	tag_groups: Adjacency,
	tag_galleries: Adjacency,
	tag_images: Adjacency,

	studio_children: Adjacency,
	studio_scenes: Adjacency,
	studio_groups: Adjacency,
	studio_galleries: Adjacency,
	studio_images: Adjacency,

	performer_scenes: Adjacency,
	performer_galleries: Adjacency,
	performer_images: Adjacency,

	group_children: Adjacency,
	group_scenes: Adjacency,
	group_performers: Adjacency,

	gallery_scenes: Adjacency,
	gallery_images: Adjacency,
}

/// Snapshot level statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
	pub entities: [usize; 7],
	pub edges: usize,
	pub dangling_edges: usize,
	pub duplicate_ids: usize,
	pub cycles: usize,
}

// EntityGraph //
//*************//

/// Immutable catalog snapshot at one sync version
#[derive(Debug)]
pub struct EntityGraph {
	version: SyncVersion,
	fingerprint: u64,
	ids: [Vec<EntityId>; 7],
	lookup: [HashMap<EntityId, NodeIx>; 7],

	scenes: Vec<Scene>,
	performers: Vec<Performer>,
	studios: Vec<Studio>,
	tags: Vec<Tag>,
	groups: Vec<Group>,
	galleries: Vec<Gallery>,
	images: Vec<Image>,

	rev: Reverse,
	cycles: Vec<Node>,
	stats: GraphStats,
}

fn kind_slot(kind: EntityKind) -> usize {
	match kind {
		EntityKind::Scene => 0,
		EntityKind::Performer => 1,
		EntityKind::Studio => 2,
		EntityKind::Tag => 3,
		EntityKind::Group => 4,
		EntityKind::Gallery => 5,
		EntityKind::Image => 6,
	}
}

impl EntityGraph {
	/// Build a snapshot from catalog records
	pub fn build(version: SyncVersion, snapshot: CatalogSnapshot) -> Self {
		EntityGraphBuilder::from_snapshot(snapshot).build(version)
	}

	pub fn version(&self) -> SyncVersion {
		self.version
	}

	/// Content hash of the records the snapshot was built from
	pub fn fingerprint(&self) -> u64 {
		self.fingerprint
	}

	/// True when both snapshots resolve to the same nodes and edges, so node
	/// indices and every relation carry over. Versions are not compared; the
	/// fingerprint only rejects early.
	pub fn same_content(&self, other: &EntityGraph) -> bool {
		if std::ptr::eq(self, other) {
			return true;
		}
		self.fingerprint == other.fingerprint
			&& self.stats.entities == other.stats.entities
			&& self.stats.edges == other.stats.edges
			&& self.ids == other.ids
			&& self.scenes == other.scenes
			&& self.performers == other.performers
			&& self.studios == other.studios
			&& self.tags == other.tags
			&& self.groups == other.groups
			&& self.galleries == other.galleries
			&& self.images == other.images
	}

	pub fn stats(&self) -> &GraphStats {
		&self.stats
	}

	/// Entities where a hierarchy cycle was detected
	pub fn cycles(&self) -> &[Node] {
		&self.cycles
	}

	pub fn len(&self, kind: EntityKind) -> usize {
		self.ids[kind_slot(kind)].len()
	}

	pub fn is_empty(&self) -> bool {
		self.ids.iter().all(Vec::is_empty)
	}

	pub fn index_of(&self, kind: EntityKind, id: &str) -> Option<NodeIx> {
		self.lookup[kind_slot(kind)].get(id).copied()
	}

	pub fn node_of(&self, entity: &EntityRef) -> Option<Node> {
		self.index_of(entity.kind, &entity.id).map(|ix| Node::new(entity.kind, ix))
	}

	pub fn id_of(&self, node: Node) -> &str {
		self.ids[kind_slot(node.kind)].get(node.ix as usize).map_or("", |id| &**id)
	}

	pub fn entity_ref(&self, node: Node) -> EntityRef {
		EntityRef::new(node.kind, self.id_of(node))
	}

	/// All nodes of a kind, in index order
	pub fn nodes(&self, kind: EntityKind) -> impl Iterator<Item = Node> + '_ {
		let len = NodeIx::try_from(self.len(kind)).unwrap_or(NodeIx::MAX);
		(0..len).map(move |ix| Node::new(kind, ix))
	}

	pub fn scene(&self, ix: NodeIx) -> Option<&Scene> {
		self.scenes.get(ix as usize)
	}

	pub fn performer(&self, ix: NodeIx) -> Option<&Performer> {
		self.performers.get(ix as usize)
	}

	pub fn studio(&self, ix: NodeIx) -> Option<&Studio> {
		self.studios.get(ix as usize)
	}

	pub fn tag(&self, ix: NodeIx) -> Option<&Tag> {
		self.tags.get(ix as usize)
	}

	pub fn group(&self, ix: NodeIx) -> Option<&Group> {
		self.groups.get(ix as usize)
	}

	pub fn gallery(&self, ix: NodeIx) -> Option<&Gallery> {
		self.galleries.get(ix as usize)
	}

	pub fn image(&self, ix: NodeIx) -> Option<&Image> {
		self.images.get(ix as usize)
	}

	/// Directly assigned tags of any entity (tags themselves carry none)
	pub fn tags_of(&self, node: Node) -> &[NodeIx] {
		let tags = match node.kind {
			EntityKind::Scene => self.scene(node.ix).map(|n| &n.tags),
			EntityKind::Performer => self.performer(node.ix).map(|n| &n.tags),
			EntityKind::Studio => self.studio(node.ix).map(|n| &n.tags),
			EntityKind::Group => self.group(node.ix).map(|n| &n.tags),
			EntityKind::Gallery => self.gallery(node.ix).map(|n| &n.tags),
			EntityKind::Image => self.image(node.ix).map(|n| &n.tags),
			EntityKind::Tag => None,
		};
		tags.map(|t| t.as_ref()).unwrap_or(&[])
	}

	/// Owning studio of a scene, group, gallery or image
	pub fn studio_of(&self, node: Node) -> Option<NodeIx> {
		match node.kind {
			EntityKind::Scene => self.scene(node.ix).and_then(|n| n.studio),
			EntityKind::Group => self.group(node.ix).and_then(|n| n.studio),
			EntityKind::Gallery => self.gallery(node.ix).and_then(|n| n.studio),
			EntityKind::Image => self.image(node.ix).and_then(|n| n.studio),
			_ => None,
		}
	}

	/// Performers featured in a scene, gallery or image
	pub fn performers_of(&self, node: Node) -> &[NodeIx] {
		let performers = match node.kind {
			EntityKind::Scene => self.scene(node.ix).map(|n| &n.performers),
			EntityKind::Gallery => self.gallery(node.ix).map(|n| &n.performers),
			EntityKind::Image => self.image(node.ix).map(|n| &n.performers),
			_ => None,
		};
		performers.map(|p| p.as_ref()).unwrap_or(&[])
	}

	/// Entities of `kind` that directly carry `tag`
	pub fn tagged(&self, tag: NodeIx, kind: EntityKind) -> &[NodeIx] {
		match kind {
			EntityKind::Scene => self.rev.tag_scenes.get(tag),
			EntityKind::Performer => self.rev.tag_performers.get(tag),
			EntityKind::Studio => self.rev.tag_studios.get(tag),
			EntityKind::Group => self.rev.tag_groups.get(tag),
			EntityKind::Gallery => self.rev.tag_galleries.get(tag),
			EntityKind::Image => self.rev.tag_images.get(tag),
			EntityKind::Tag => &[],
		}
	}

	pub fn tag_children(&self, tag: NodeIx) -> &[NodeIx] {
		self.rev.tag_children.get(tag)
	}

	pub fn tag_parents(&self, tag: NodeIx) -> &[NodeIx] {
		self.tag(tag).map(|t| t.parents.as_ref()).unwrap_or(&[])
	}

	/// Entities of `kind` owned by `studio` (scene, group, gallery, image)
	pub fn studio_owned(&self, studio: NodeIx, kind: EntityKind) -> &[NodeIx] {
		match kind {
			EntityKind::Scene => self.rev.studio_scenes.get(studio),
			EntityKind::Group => self.rev.studio_groups.get(studio),
			EntityKind::Gallery => self.rev.studio_galleries.get(studio),
			EntityKind::Image => self.rev.studio_images.get(studio),
			EntityKind::Studio => self.rev.studio_children.get(studio),
			_ => &[],
		}
	}

	pub fn studio_children(&self, studio: NodeIx) -> &[NodeIx] {
		self.rev.studio_children.get(studio)
	}

	/// Content of `kind` featuring `performer` (scene, gallery, image)
	pub fn featuring(&self, performer: NodeIx, kind: EntityKind) -> &[NodeIx] {
		match kind {
			EntityKind::Scene => self.rev.performer_scenes.get(performer),
			EntityKind::Gallery => self.rev.performer_galleries.get(performer),
			EntityKind::Image => self.rev.performer_images.get(performer),
			_ => &[],
		}
	}

	pub fn group_children(&self, group: NodeIx) -> &[NodeIx] {
		self.rev.group_children.get(group)
	}

	pub fn group_parents(&self, group: NodeIx) -> &[NodeIx] {
		self.group(group).map(|g| g.parents.as_ref()).unwrap_or(&[])
	}

	pub fn group_scenes(&self, group: NodeIx) -> &[NodeIx] {
		self.rev.group_scenes.get(group)
	}

	pub fn group_performers(&self, group: NodeIx) -> &[NodeIx] {
		self.rev.group_performers.get(group)
	}

	pub fn gallery_scenes(&self, gallery: NodeIx) -> &[NodeIx] {
		self.rev.gallery_scenes.get(gallery)
	}

	pub fn gallery_images(&self, gallery: NodeIx) -> &[NodeIx] {
		self.rev.gallery_images.get(gallery)
	}
}

// Builder //
//*********//

#[derive(Debug, Default)]
pub struct EntityGraphBuilder {
	snapshot: CatalogSnapshot,
}

struct Interner {
	ids: Vec<EntityId>,
	lookup: HashMap<EntityId, NodeIx>,
	/// Record positions that were kept (first occurrence of their id)
	kept: Vec<bool>,
	duplicates: usize,
}

impl Interner {
	fn new<'a>(ids: impl Iterator<Item = &'a EntityId>) -> Self {
		let mut interner =
			Self { ids: Vec::new(), lookup: HashMap::new(), kept: Vec::new(), duplicates: 0 };
		for id in ids {
			if interner.lookup.contains_key(id) {
				interner.duplicates += 1;
				interner.kept.push(false);
				continue;
			}
			interner.kept.push(true);
			let ix = NodeIx::try_from(interner.ids.len()).unwrap_or(NodeIx::MAX);
			interner.lookup.insert(id.clone(), ix);
			interner.ids.push(id.clone());
		}
		interner
	}

	fn is_first(&self, position: usize) -> bool {
		self.kept.get(position).copied().unwrap_or(false)
	}
}

struct Resolver<'a> {
	interners: &'a [Interner; 7],
	dangling: usize,
}

impl Resolver<'_> {
	fn one(&mut self, kind: EntityKind, id: Option<&EntityId>) -> Option<NodeIx> {
		let id = id?;
		let res = self.interners[kind_slot(kind)].lookup.get(id).copied();
		if res.is_none() {
			self.dangling += 1;
		}
		res
	}

	fn many(&mut self, kind: EntityKind, ids: &[EntityId]) -> Box<[NodeIx]> {
		let mut out: Vec<NodeIx> = ids.iter().filter_map(|id| self.one(kind, Some(id))).collect();
		out.sort_unstable();
		out.dedup();
		out.into_boxed_slice()
	}
}

/// Reverse edge pairs `(target, source)` for every source node
fn reverse<T>(nodes: &[T], edges: impl Fn(&T) -> &[NodeIx]) -> Vec<(NodeIx, NodeIx)> {
	let mut pairs = Vec::new();
	for (ix, node) in nodes.iter().enumerate() {
		let ix = NodeIx::try_from(ix).unwrap_or(NodeIx::MAX);
		pairs.extend(edges(node).iter().map(|&to| (to, ix)));
	}
	pairs
}

fn reverse_one<T>(nodes: &[T], edge: impl Fn(&T) -> Option<NodeIx>) -> Vec<(NodeIx, NodeIx)> {
	let mut pairs = Vec::new();
	for (ix, node) in nodes.iter().enumerate() {
		if let Some(to) = edge(node) {
			pairs.push((to, NodeIx::try_from(ix).unwrap_or(NodeIx::MAX)));
		}
	}
	pairs
}

/// Iterative three-colour DFS over `parents` edges. Returns the nodes at which a
/// back edge (cycle) was found.
fn detect_cycles(len: usize, parents: impl Fn(NodeIx) -> Vec<NodeIx>) -> Vec<NodeIx> {
	const WHITE: u8 = 0;
	const GREY: u8 = 1;
	const BLACK: u8 = 2;

	let mut colour = vec![WHITE; len];
	let mut found = Vec::new();

	for root in 0..len {
		if colour[root] != WHITE {
			continue;
		}
		let root = NodeIx::try_from(root).unwrap_or(NodeIx::MAX);
		let mut stack: Vec<(NodeIx, Vec<NodeIx>)> = vec![(root, parents(root))];
		colour[root as usize] = GREY;

		while let Some((node, pending)) = stack.last_mut() {
			let node = *node;
			if let Some(next) = pending.pop() {
				match colour.get(next as usize).copied() {
					Some(WHITE) => {
						colour[next as usize] = GREY;
						let next_parents = parents(next);
						stack.push((next, next_parents));
					}
					Some(GREY) => found.push(next),
					_ => {}
				}
			} else {
				colour[node as usize] = BLACK;
				stack.pop();
			}
		}
	}

	found.sort_unstable();
	found.dedup();
	found
}

impl EntityGraphBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
		Self { snapshot }
	}

	pub fn scene(mut self, record: SceneRecord) -> Self {
		self.snapshot.scenes.push(record);
		self
	}

	pub fn performer(mut self, record: PerformerRecord) -> Self {
		self.snapshot.performers.push(record);
		self
	}

	pub fn studio(mut self, record: StudioRecord) -> Self {
		self.snapshot.studios.push(record);
		self
	}

	pub fn tag(mut self, record: TagRecord) -> Self {
		self.snapshot.tags.push(record);
		self
	}

	pub fn group(mut self, record: GroupRecord) -> Self {
		self.snapshot.groups.push(record);
		self
	}

	pub fn gallery(mut self, record: GalleryRecord) -> Self {
		self.snapshot.galleries.push(record);
		self
	}

	pub fn image(mut self, record: ImageRecord) -> Self {
		self.snapshot.images.push(record);
		self
	}

	pub fn build(self, version: SyncVersion) -> EntityGraph {
		let snap = self.snapshot;

		let mut hasher = DefaultHasher::new();
		snap.hash(&mut hasher);
		let fingerprint = hasher.finish();

		let interners = [
			Interner::new(snap.scenes.iter().map(|r| &r.id)),
			Interner::new(snap.performers.iter().map(|r| &r.id)),
			Interner::new(snap.studios.iter().map(|r| &r.id)),
			Interner::new(snap.tags.iter().map(|r| &r.id)),
			Interner::new(snap.groups.iter().map(|r| &r.id)),
			Interner::new(snap.galleries.iter().map(|r| &r.id)),
			Interner::new(snap.images.iter().map(|r| &r.id)),
		];
		let duplicate_ids: usize = interners.iter().map(|i| i.duplicates).sum();
		if duplicate_ids > 0 {
			warn!("Snapshot {}: {} duplicate entity ids ignored", version, duplicate_ids);
		}

		let mut res = Resolver { interners: &interners, dangling: 0 };
		let slot = |kind| &interners[kind_slot(kind)];

		let scenes: Vec<Scene> = snap
			.scenes
			.iter()
			.enumerate()
			.filter(|(pos, _)| slot(EntityKind::Scene).is_first(*pos))
			.map(|(_, r)| Scene {
				studio: res.one(EntityKind::Studio, r.studio.as_ref()),
				performers: res.many(EntityKind::Performer, &r.performers),
				tags: res.many(EntityKind::Tag, &r.tags),
				groups: res.many(EntityKind::Group, &r.groups),
				galleries: res.many(EntityKind::Gallery, &r.galleries),
			})
			.collect();

		let performers: Vec<Performer> = snap
			.performers
			.iter()
			.enumerate()
			.filter(|(pos, _)| slot(EntityKind::Performer).is_first(*pos))
			.map(|(_, r)| Performer {
				tags: res.many(EntityKind::Tag, &r.tags),
				groups: res.many(EntityKind::Group, &r.groups),
			})
			.collect();

		let studios: Vec<Studio> = snap
			.studios
			.iter()
			.enumerate()
			.filter(|(pos, _)| slot(EntityKind::Studio).is_first(*pos))
			.map(|(_, r)| Studio {
				parent: res.one(EntityKind::Studio, r.parent.as_ref()),
				tags: res.many(EntityKind::Tag, &r.tags),
			})
			.collect();

		let tags: Vec<Tag> = snap
			.tags
			.iter()
			.enumerate()
			.filter(|(pos, _)| slot(EntityKind::Tag).is_first(*pos))
			.map(|(_, r)| Tag { parents: res.many(EntityKind::Tag, &r.parents) })
			.collect();

		let groups: Vec<Group> = snap
			.groups
			.iter()
			.enumerate()
			.filter(|(pos, _)| slot(EntityKind::Group).is_first(*pos))
			.map(|(_, r)| Group {
				studio: res.one(EntityKind::Studio, r.studio.as_ref()),
				parents: res.many(EntityKind::Group, &r.parents),
				tags: res.many(EntityKind::Tag, &r.tags),
			})
			.collect();

		let galleries: Vec<Gallery> = snap
			.galleries
			.iter()
			.enumerate()
			.filter(|(pos, _)| slot(EntityKind::Gallery).is_first(*pos))
			.map(|(_, r)| Gallery {
				studio: res.one(EntityKind::Studio, r.studio.as_ref()),
				performers: res.many(EntityKind::Performer, &r.performers),
				tags: res.many(EntityKind::Tag, &r.tags),
				image_count: r.image_count,
			})
			.collect();

		let images: Vec<Image> = snap
			.images
			.iter()
			.enumerate()
			.filter(|(pos, _)| slot(EntityKind::Image).is_first(*pos))
			.map(|(_, r)| Image {
				studio: res.one(EntityKind::Studio, r.studio.as_ref()),
				galleries: res.many(EntityKind::Gallery, &r.galleries),
				performers: res.many(EntityKind::Performer, &r.performers),
				tags: res.many(EntityKind::Tag, &r.tags),
			})
			.collect();

		let dangling_edges = res.dangling;
		if dangling_edges > 0 {
			warn!("Snapshot {}: {} edges point at unknown entities", version, dangling_edges);
		}

		let n_tags = tags.len();
		let n_studios = studios.len();
		let n_performers = performers.len();
		let n_groups = groups.len();
		let n_galleries = galleries.len();

		let rev = Reverse {
			tag_children: Adjacency::build(n_tags, reverse(&tags, |t| &t.parents)),
			tag_scenes: Adjacency::build(n_tags, reverse(&scenes, |n| &n.tags)),
			tag_performers: Adjacency::build(n_tags, reverse(&performers, |n| &n.tags)),
			tag_studios: Adjacency::build(n_tags, reverse(&studios, |n| &n.tags)),
			tag_groups: Adjacency::build(n_tags, reverse(&groups, |n| &n.tags)),
			tag_galleries: Adjacency::build(n_tags, reverse(&galleries, |n| &n.tags)),
			tag_images: Adjacency::build(n_tags, reverse(&images, |n| &n.tags)),

			studio_children: Adjacency::build(n_studios, reverse_one(&studios, |s| s.parent)),
			studio_scenes: Adjacency::build(n_studios, reverse_one(&scenes, |n| n.studio)),
			studio_groups: Adjacency::build(n_studios, reverse_one(&groups, |n| n.studio)),
			studio_galleries: Adjacency::build(n_studios, reverse_one(&galleries, |n| n.studio)),
			studio_images: Adjacency::build(n_studios, reverse_one(&images, |n| n.studio)),

			performer_scenes: Adjacency::build(n_performers, reverse(&scenes, |n| &n.performers)),
			performer_galleries: Adjacency::build(
				n_performers,
				reverse(&galleries, |n| &n.performers),
			),
			performer_images: Adjacency::build(n_performers, reverse(&images, |n| &n.performers)),

			group_children: Adjacency::build(n_groups, reverse(&groups, |g| &g.parents)),
			group_scenes: Adjacency::build(n_groups, reverse(&scenes, |n| &n.groups)),
			group_performers: Adjacency::build(n_groups, reverse(&performers, |n| &n.groups)),

			gallery_scenes: Adjacency::build(n_galleries, reverse(&scenes, |n| &n.galleries)),
			gallery_images: Adjacency::build(n_galleries, reverse(&images, |n| &n.galleries)),
		};

		let mut cycles: Vec<Node> = Vec::new();
		for ix in detect_cycles(n_tags, |t| tags[t as usize].parents.to_vec()) {
			cycles.push(Node::new(EntityKind::Tag, ix));
		}
		for ix in detect_cycles(n_groups, |g| groups[g as usize].parents.to_vec()) {
			cycles.push(Node::new(EntityKind::Group, ix));
		}
		for ix in detect_cycles(n_studios, |s| studios[s as usize].parent.into_iter().collect()) {
			cycles.push(Node::new(EntityKind::Studio, ix));
		}

		let [scene_ids, performer_ids, studio_ids, tag_ids, group_ids, gallery_ids, image_ids] =
			interners;
		let ids = [
			scene_ids.ids,
			performer_ids.ids,
			studio_ids.ids,
			tag_ids.ids,
			group_ids.ids,
			gallery_ids.ids,
			image_ids.ids,
		];
		let lookup = [
			scene_ids.lookup,
			performer_ids.lookup,
			studio_ids.lookup,
			tag_ids.lookup,
			group_ids.lookup,
			gallery_ids.lookup,
			image_ids.lookup,
		];

		for node in &cycles {
			let err = Error::CyclicGraphDetected {
				kind: node.kind,
				id: ids[kind_slot(node.kind)][node.ix as usize].clone(),
			};
			warn!("Snapshot {}: {}", version, err);
		}

		let edges = [
			&rev.tag_children,
			&rev.tag_scenes,
			&rev.tag_performers,
			&rev.tag_studios,
			&rev.tag_groups,
			&rev.tag_galleries,
			&rev.tag_images,
			&rev.studio_children,
			&rev.studio_scenes,
			&rev.studio_groups,
			&rev.studio_galleries,
			&rev.studio_images,
			&rev.performer_scenes,
			&rev.performer_galleries,
			&rev.performer_images,
			&rev.group_children,
			&rev.group_scenes,
			&rev.group_performers,
			&rev.gallery_scenes,
			&rev.gallery_images,
		]
		.iter()
		.map(|a| a.edge_count())
		.sum();

		let stats = GraphStats {
			entities: [
				scenes.len(),
				performers.len(),
				studios.len(),
				tags.len(),
				groups.len(),
				galleries.len(),
				images.len(),
			],
			edges,
			dangling_edges,
			duplicate_ids,
			cycles: cycles.len(),
		};

		debug!(
			"Snapshot {} built: {:?} entities, {} edges, fingerprint {:x}",
			version, stats.entities, stats.edges, fingerprint
		);

		EntityGraph {
			version,
			fingerprint,
			ids,
			lookup,
			scenes,
			performers,
			studios,
			tags,
			groups,
			galleries,
			images,
			rev,
			cycles,
			stats,
		}
	}
}


// vim: ts=4
