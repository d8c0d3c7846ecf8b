//! Adapter for the catalog side: publishes immutable, versioned snapshots.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::graph::EntityGraph;
use crate::prelude::*;

#[async_trait]
pub trait GraphAdapter: Debug + Send + Sync {
	/// Returns the current snapshot, or the snapshot at `version` while it is
	/// still retained. Fails with `SnapshotUnavailable` otherwise.
	async fn graph_view(&self, version: Option<SyncVersion>) -> ClResult<Arc<EntityGraph>>;

	/// Latest published sync version
	async fn current_version(&self) -> ClResult<SyncVersion>;
}

// vim: ts=4
