//! Versioned snapshot store

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast};

use stashgate::event::InvalidationEvent;
use stashgate::graph::{CatalogSnapshot, EntityGraph};
use stashgate::graph_adapter::GraphAdapter;
use stashgate::prelude::*;

use crate::MemoryCatalogConfig;

#[derive(Debug, Default)]
struct Snapshots {
	graphs: BTreeMap<SyncVersion, Arc<EntityGraph>>,
	/// Records of the latest publish, for change detection
	latest: Option<CatalogSnapshot>,
}

#[derive(Debug)]
pub struct MemoryCatalog {
	snapshots: RwLock<Snapshots>,
	events: broadcast::Sender<InvalidationEvent>,
	available: AtomicBool,
	config: MemoryCatalogConfig,
}

impl MemoryCatalog {
	pub fn new(config: MemoryCatalogConfig) -> Self {
		let (events, _) = broadcast::channel(config.broadcast_capacity.max(1));
		Self {
			snapshots: RwLock::new(Snapshots::default()),
			events,
			available: AtomicBool::new(true),
			config,
		}
	}

	/// Publishes the result of a sync run as the next version and announces it.
	///
	/// Snapshots older than the retention window are dropped. Sets already
	/// computed against them stay valid until the next query.
	pub async fn publish(&self, snapshot: CatalogSnapshot) -> SyncVersion {
		let (old, new, changed_kinds) = {
			let mut snapshots = self.snapshots.write().await;
			let old = snapshots.graphs.keys().next_back().copied().unwrap_or_default();
			let new = old.next();

			let changed_kinds = match &snapshots.latest {
				Some(latest) => changed_kinds(latest, &snapshot),
				None => EntityKind::ALL.into_iter().collect(),
			};
			let graph = Arc::new(EntityGraph::build(new, snapshot.clone()));
			if !graph.cycles().is_empty() {
				warn!("Snapshot {} contains {} entities on hierarchy cycles", new, graph.cycles().len());
			}

			snapshots.graphs.insert(new, graph);
			snapshots.latest = Some(snapshot);
			while snapshots.graphs.len() > self.config.retain_versions.max(1) {
				snapshots.graphs.pop_first();
			}
			info!("Published catalog snapshot {} (changed: {:?})", new, changed_kinds);
			(old, new, changed_kinds)
		};

		// No receivers is fine: nothing to invalidate
		let _ignore = self.events.send(InvalidationEvent::SyncVersionBumped { old, new, changed_kinds });
		new
	}

	/// Receiver for invalidation events of this catalog
	pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
		self.events.subscribe()
	}

	/// Sender for invalidation events, to share the channel with a rule store
	pub fn sender(&self) -> broadcast::Sender<InvalidationEvent> {
		self.events.clone()
	}

	/// Simulates an outage of the catalog backend
	pub fn set_available(&self, available: bool) {
		self.available.store(available, Ordering::Relaxed);
	}

	pub async fn retained_versions(&self) -> Vec<SyncVersion> {
		self.snapshots.read().await.graphs.keys().copied().collect()
	}
}

impl Default for MemoryCatalog {
	fn default() -> Self {
		Self::new(MemoryCatalogConfig::default())
	}
}

fn changed_kinds(old: &CatalogSnapshot, new: &CatalogSnapshot) -> BTreeSet<EntityKind> {
	let mut kinds = BTreeSet::new();
	if old.scenes != new.scenes {
		kinds.insert(EntityKind::Scene);
	}
	if old.performers != new.performers {
		kinds.insert(EntityKind::Performer);
	}
	if old.studios != new.studios {
		kinds.insert(EntityKind::Studio);
	}
	if old.tags != new.tags {
		kinds.insert(EntityKind::Tag);
	}
	if old.groups != new.groups {
		kinds.insert(EntityKind::Group);
	}
	if old.galleries != new.galleries {
		kinds.insert(EntityKind::Gallery);
	}
	if old.images != new.images {
		kinds.insert(EntityKind::Image);
	}
	kinds
}

#[async_trait]
impl GraphAdapter for MemoryCatalog {
	async fn graph_view(&self, version: Option<SyncVersion>) -> ClResult<Arc<EntityGraph>> {
		if !self.available.load(Ordering::Relaxed) {
			return Err(Error::SnapshotUnavailable("catalog offline".into()));
		}
		let snapshots = self.snapshots.read().await;
		let graph = match version {
			Some(version) => snapshots.graphs.get(&version),
			None => snapshots.graphs.values().next_back(),
		};
		match (graph, version) {
			(Some(graph), _) => Ok(Arc::clone(graph)),
			(None, Some(version)) => {
				Err(Error::SnapshotUnavailable(format!("snapshot {} not retained", version)))
			}
			(None, None) => Err(Error::SnapshotUnavailable("no snapshot published".into())),
		}
	}

	async fn current_version(&self) -> ClResult<SyncVersion> {
		if !self.available.load(Ordering::Relaxed) {
			return Err(Error::SnapshotUnavailable("catalog offline".into()));
		}
		Ok(self.snapshots.read().await.graphs.keys().next_back().copied().unwrap_or_default())
	}
}

// vim: ts=4
