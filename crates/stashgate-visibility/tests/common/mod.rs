//! Shared fixtures for the visibility integration tests

#![allow(dead_code)]

use std::sync::Arc;

use stashgate_catalog_adapter_memory::{MemoryCatalog, MemoryRuleStore};
use stashgate_types::graph::{
	CatalogSnapshot, EntityGraph, GalleryRecord, GroupRecord, ImageRecord, PerformerRecord,
	SceneRecord, StudioRecord, TagRecord,
};
use stashgate_types::prelude::*;
use stashgate_types::rule::{HiddenEntity, RestrictionRule};
use stashgate_visibility::{
	ExclusionComputer, ExclusionReason, ExclusionSet, RetryPolicy, RuleSet, VisibilityConfig,
	VisibilityQueryService,
};

pub const USER: UserId = UserId(5);

pub fn init_tracing() {
	let _ignore = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub fn test_config() -> VisibilityConfig {
	VisibilityConfig {
		retry: RetryPolicy::none(),
		query_wait_ms: 2000,
		eager_recompute_on_sync: false,
		..VisibilityConfig::default()
	}
}

pub struct Engine {
	pub catalog: Arc<MemoryCatalog>,
	pub rules: Arc<MemoryRuleStore>,
	pub service: Arc<VisibilityQueryService>,
}

pub async fn engine(snapshot: CatalogSnapshot) -> Engine {
	engine_with(snapshot, test_config()).await
}

/// Memory catalog publishing `snapshot` as v1, an empty rule store announcing
/// on the catalog's channel, and an initialized service
pub async fn engine_with(snapshot: CatalogSnapshot, config: VisibilityConfig) -> Engine {
	init_tracing();
	let catalog = Arc::new(MemoryCatalog::default());
	catalog.publish(snapshot).await;
	let rules = Arc::new(MemoryRuleStore::new().with_events(catalog.sender()));
	let service =
		Arc::new(VisibilityQueryService::new(Arc::clone(&catalog) as _, Arc::clone(&rules) as _, config));
	service.init().await.expect("init");
	Engine { catalog, rules, service }
}

// Catalogs //
//**********//

/// Studio s9 carries tag t123; scene sc1 of s9 is the only scene of
/// performer p1. Studio s2 with scene sc2 is unrelated.
pub fn studio_chain() -> CatalogSnapshot {
	CatalogSnapshot {
		tags: vec![TagRecord::new("t123"), TagRecord::new("t2")],
		studios: vec![StudioRecord::new("s9").tags(["t123"]), StudioRecord::new("s2")],
		performers: vec![PerformerRecord::new("p1"), PerformerRecord::new("p2")],
		scenes: vec![
			SceneRecord::new("sc1").studio("s9").performers(["p1"]),
			SceneRecord::new("sc2").studio("s2").performers(["p2"]).tags(["t2"]),
		],
		..CatalogSnapshot::default()
	}
}

/// A small library touching every relationship kind
pub fn library() -> CatalogSnapshot {
	CatalogSnapshot {
		tags: vec![
			TagRecord::new("t_root"),
			TagRecord::new("t_a").parents(["t_root"]),
			TagRecord::new("t_b").parents(["t_root"]),
			TagRecord::new("t_c"),
			TagRecord::new("t_d").parents(["t_a", "t_b"]),
		],
		studios: vec![
			StudioRecord::new("st_parent"),
			StudioRecord::new("st_child").parent("st_parent").tags(["t_c"]),
			StudioRecord::new("st_other"),
		],
		performers: vec![
			PerformerRecord::new("pa").tags(["t_a"]),
			PerformerRecord::new("pb"),
			PerformerRecord::new("pc").groups(["gr2"]),
			PerformerRecord::new("pd").tags(["t_d"]),
		],
		groups: vec![
			GroupRecord::new("gr1").studio("st_child").tags(["t_b"]),
			GroupRecord::new("gr2").parents(["gr1"]),
			GroupRecord::new("gr3").studio("st_other"),
		],
		galleries: vec![
			GalleryRecord::new("ga1").studio("st_other").performers(["pb"]),
			GalleryRecord::new("ga2").studio("st_parent").image_count(3),
			GalleryRecord::new("ga3").tags(["t_c"]).image_count(0),
		],
		scenes: vec![
			SceneRecord::new("sc1").studio("st_child").performers(["pa"]).tags(["t_a"]).groups(["gr1"]),
			SceneRecord::new("sc2").studio("st_other").performers(["pb"]).groups(["gr2"]).galleries(["ga1"]),
			SceneRecord::new("sc3").studio("st_parent").performers(["pc"]).tags(["t_b"]),
			SceneRecord::new("sc4").studio("st_other").groups(["gr3"]),
			SceneRecord::new("sc5").performers(["pd", "pb"]),
		],
		images: vec![
			ImageRecord::new("im1").studio("st_other").galleries(["ga1"]).performers(["pb"]),
			ImageRecord::new("im2").studio("st_child").tags(["t_c"]),
			ImageRecord::new("im3").galleries(["ga3"]).tags(["t_d"]),
		],
	}
}

pub fn graph(snapshot: CatalogSnapshot) -> Arc<EntityGraph> {
	Arc::new(EntityGraph::build(SyncVersion(1), snapshot))
}

// Rules //
//*******//

pub fn exclude(kind: EntityKind, ids: &[&str]) -> RestrictionRule {
	RestrictionRule::exclude(USER, kind, ids.iter().copied()).expect("valid rule")
}

pub fn include(kind: EntityKind, ids: &[&str]) -> RestrictionRule {
	RestrictionRule::include(USER, kind, ids.iter().copied()).expect("valid rule")
}

pub fn rule_set(rules: Vec<RestrictionRule>, hidden: &[EntityRef]) -> Arc<RuleSet> {
	let hidden = hidden.iter().map(|entity| HiddenEntity::new(USER, entity.clone()));
	Arc::new(RuleSet::from_records(USER, rules, hidden))
}

pub fn compute(graph: &Arc<EntityGraph>, rules: Arc<RuleSet>) -> ExclusionSet {
	ExclusionComputer::full(USER, Arc::clone(graph), rules, test_config().prune_options())
}

// Assertions //
//************//

/// Reason and source of an exclusion, `None` when visible
pub fn reason_of(set: &ExclusionSet, entity: &EntityRef) -> Option<(ExclusionReason, Option<EntityRef>)> {
	set.decision_of(entity)
		.map(|decision| (decision.reason, decision.source.map(|source| set.graph().entity_ref(source))))
}

/// Every visible entity of the set
pub fn visible(set: &ExclusionSet) -> Vec<EntityRef> {
	let graph = set.graph();
	EntityKind::ALL
		.into_iter()
		.flat_map(|kind| graph.nodes(kind))
		.filter(|node| !set.is_excluded(*node))
		.map(|node| graph.entity_ref(node))
		.collect()
}

// vim: ts=4
