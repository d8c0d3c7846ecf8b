//! End-to-end exclusion scenarios over small catalogs

mod common;

use common::*;
use stashgate_types::graph::{
	CatalogSnapshot, GalleryRecord, GroupRecord, PerformerRecord, SceneRecord, StudioRecord, TagRecord,
};
use stashgate_types::prelude::*;
use stashgate_types::rule_adapter::RuleAdapter;
use stashgate_visibility::{ExclusionReason, UpdateMode, VisibilityConfig};

use ExclusionReason::{Cascade, Empty, Hidden, Restricted};

#[tokio::test]
async fn test_excluded_tag_chain_back_to_source() {
	let engine = engine(studio_chain()).await;
	engine.rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");

	let set = engine.service.exclusion_set(USER).await.expect("exclusion set");
	assert_eq!(reason_of(&set, &EntityRef::tag("t123")), Some((Restricted, None)));
	assert_eq!(reason_of(&set, &EntityRef::studio("s9")), Some((Restricted, Some(EntityRef::tag("t123")))));
	assert_eq!(reason_of(&set, &EntityRef::scene("sc1")), Some((Restricted, Some(EntityRef::tag("t123")))));
	assert_eq!(reason_of(&set, &EntityRef::performer("p1")), Some((Empty, Some(EntityRef::scene("sc1")))));

	for entity in [EntityRef::studio("s2"), EntityRef::scene("sc2"), EntityRef::performer("p2"), EntityRef::tag("t2")] {
		assert_eq!(reason_of(&set, &entity), None, "{} should stay visible", entity);
	}

	// External records carry the same chain
	let records = set.records();
	let p1 = records.iter().find(|r| r.kind == EntityKind::Performer).expect("p1 record");
	assert_eq!(p1.source(), Some(EntityRef::scene("sc1")));
	assert_eq!(p1.computed_at_version, SyncVersion(1));
	assert_eq!(p1.user_id, USER);

	assert!(!engine.service.is_visible(USER, EntityKind::Scene, "sc1").await);
	assert!(engine.service.is_visible(USER, EntityKind::Scene, "sc2").await);
	assert_eq!(engine.service.visible_count(USER, EntityKind::Studio).await, 1);
	// Other users are not affected
	assert!(engine.service.is_visible(UserId(6), EntityKind::Scene, "sc1").await);
}

#[tokio::test]
async fn test_unhide_rechecks_remaining_rules() {
	let snapshot = CatalogSnapshot {
		tags: vec![TagRecord::new("t1")],
		studios: vec![StudioRecord::new("s1")],
		performers: vec![PerformerRecord::new("p1")],
		scenes: vec![
			SceneRecord::new("sc1").studio("s1").performers(["p1"]).tags(["t1"]),
			SceneRecord::new("sc2").studio("s1"),
		],
		..CatalogSnapshot::default()
	};
	let engine = engine(snapshot).await;
	let service = &engine.service;
	let p1 = EntityRef::performer("p1");

	assert!(service.exclusion_set(USER).await.expect("exclusion set").is_empty());

	engine.rules.hide(USER, &p1).await.expect("hide");
	let mode = service.on_hide_toggled(USER, &p1, true).await.expect("hide applied");
	assert_eq!(mode, UpdateMode::Incremental);
	let set = service.exclusion_set(USER).await.expect("exclusion set");
	assert_eq!(reason_of(&set, &p1), Some((Hidden, None)));
	assert_eq!(reason_of(&set, &EntityRef::scene("sc1")), Some((Cascade, Some(p1.clone()))));

	engine.rules.put_rule(&exclude(EntityKind::Tag, &["t1"])).await.expect("put rule");
	assert_eq!(service.on_rule_changed(USER).await.expect("rule applied"), UpdateMode::Incremental);
	let set = service.exclusion_set(USER).await.expect("exclusion set");
	assert_eq!(reason_of(&set, &EntityRef::scene("sc1")), Some((Restricted, Some(EntityRef::tag("t1")))));

	engine.rules.unhide(USER, &p1).await.expect("unhide");
	service.on_hide_toggled(USER, &p1, false).await.expect("unhide applied");
	let set = service.exclusion_set(USER).await.expect("exclusion set");
	assert_eq!(reason_of(&set, &EntityRef::scene("sc1")), Some((Restricted, Some(EntityRef::tag("t1")))));
	// No longer hidden, but its only scene is still excluded
	assert_eq!(reason_of(&set, &p1), Some((Empty, Some(EntityRef::scene("sc1")))));
	assert!(service.is_visible(USER, EntityKind::Scene, "sc2").await);
	assert!(service.is_visible(USER, EntityKind::Studio, "s1").await);

	let full = compute(set.graph(), std::sync::Arc::clone(set.rules()));
	assert_eq!(set.records(), full.records());
}

/// studio_chain plus organizational entities nothing refers to
fn with_unused_entities() -> CatalogSnapshot {
	let mut snapshot = studio_chain();
	snapshot.studios.push(StudioRecord::new("s_empty"));
	snapshot.groups.push(GroupRecord::new("g_empty"));
	snapshot.tags.push(TagRecord::new("t_orphan"));
	snapshot.performers.push(PerformerRecord::new("p_idle"));
	snapshot.galleries.push(GalleryRecord::new("ga_empty"));
	snapshot
}

#[tokio::test]
async fn test_entities_without_content_are_not_visible() {
	let engine = engine(with_unused_entities()).await;
	let set = engine.service.exclusion_set(USER).await.expect("exclusion set");

	for entity in [
		EntityRef::studio("s_empty"),
		EntityRef::group("g_empty"),
		EntityRef::tag("t_orphan"),
		EntityRef::performer("p_idle"),
		EntityRef::gallery("ga_empty"),
	] {
		assert_eq!(reason_of(&set, &entity), Some((Empty, None)), "{} should be empty", entity);
	}
	assert!(!engine.service.is_visible(USER, EntityKind::Studio, "s_empty").await);
	assert!(engine.service.is_visible(USER, EntityKind::Studio, "s9").await);
	assert_eq!(engine.service.visible_count(USER, EntityKind::Tag).await, 2);

	// A rule change keeps them empty incrementally
	engine.rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");
	engine.service.on_rule_changed(USER).await.expect("rule applied");
	let set = engine.service.exclusion_set(USER).await.expect("exclusion set");
	assert_eq!(reason_of(&set, &EntityRef::group("g_empty")), Some((Empty, None)));
	assert_eq!(set.records(), compute(set.graph(), std::sync::Arc::clone(set.rules())).records());

	let config = VisibilityConfig { keep_never_filled: true, ..test_config() };
	let engine = engine_with(with_unused_entities(), config).await;
	assert!(engine.service.exclusion_set(USER).await.expect("exclusion set").is_empty());
	assert!(engine.service.is_visible(USER, EntityKind::Group, "g_empty").await);
}

#[tokio::test]
async fn test_include_then_exclude() {
	let snapshot = CatalogSnapshot {
		tags: vec![TagRecord::new("t1")],
		studios: vec![StudioRecord::new("s1"), StudioRecord::new("s2")],
		scenes: vec![
			SceneRecord::new("sc1").studio("s1").tags(["t1"]),
			SceneRecord::new("sc2").studio("s1"),
			SceneRecord::new("sc3").studio("s2"),
		],
		..CatalogSnapshot::default()
	};
	let graph = graph(snapshot);
	let set = compute(
		&graph,
		rule_set(vec![include(EntityKind::Studio, &["s1"]), exclude(EntityKind::Tag, &["t1"])], &[]),
	);

	assert_eq!(reason_of(&set, &EntityRef::scene("sc1")), Some((Restricted, Some(EntityRef::tag("t1")))));
	assert_eq!(reason_of(&set, &EntityRef::scene("sc2")), None);
	assert_eq!(reason_of(&set, &EntityRef::scene("sc3")), Some((Restricted, None)));
	assert_eq!(reason_of(&set, &EntityRef::studio("s2")), Some((Restricted, None)));
	assert_eq!(reason_of(&set, &EntityRef::studio("s1")), None);
}

#[tokio::test]
async fn test_studio_with_all_scenes_excluded_disappears() {
	let ids: Vec<String> = (0..100).map(|n| format!("sc{:03}", n)).collect();
	let snapshot = CatalogSnapshot {
		studios: vec![StudioRecord::new("big"), StudioRecord::new("other")],
		scenes: ids
			.iter()
			.map(|id| SceneRecord::new(id.as_str()).studio("big"))
			.chain([SceneRecord::new("elsewhere").studio("other")])
			.collect(),
		..CatalogSnapshot::default()
	};
	let graph = graph(snapshot);
	let hidden: Vec<EntityRef> = ids.iter().map(|id| EntityRef::scene(id.as_str())).collect();

	// 99 of 100 hidden: one visible scene keeps the studio
	let set = compute(&graph, rule_set(vec![], &hidden[1..]));
	assert_eq!(reason_of(&set, &EntityRef::studio("big")), None);
	assert_eq!(set.visible_count(EntityKind::Scene), 2);

	let set = compute(&graph, rule_set(vec![], &hidden));
	assert_eq!(reason_of(&set, &EntityRef::studio("big")), Some((Empty, Some(EntityRef::scene("sc000")))));
	assert_eq!(reason_of(&set, &EntityRef::studio("other")), None);
	assert_eq!(set.excluded_count(EntityKind::Scene), 100);
}

#[tokio::test]
async fn test_tag_with_one_visible_path_stays() {
	let snapshot = CatalogSnapshot {
		tags: vec![
			TagRecord::new("t_p1"),
			TagRecord::new("t_p2"),
			TagRecord::new("t_c").parents(["t_p1", "t_p2"]),
			TagRecord::new("t_d").parents(["t_p2"]),
		],
		scenes: vec![SceneRecord::new("sc1").tags(["t_c"]), SceneRecord::new("sc2").tags(["t_d"])],
		..CatalogSnapshot::default()
	};
	let graph = graph(snapshot);

	let set = compute(&graph, rule_set(vec![], &[EntityRef::scene("sc2")]));
	assert_eq!(reason_of(&set, &EntityRef::tag("t_d")), Some((Empty, Some(EntityRef::scene("sc2")))));
	// One of two children still leads to visible content
	assert_eq!(reason_of(&set, &EntityRef::tag("t_p2")), None);
	assert_eq!(reason_of(&set, &EntityRef::tag("t_c")), None);
	assert_eq!(reason_of(&set, &EntityRef::tag("t_p1")), None);

	let set = compute(&graph, rule_set(vec![], &[EntityRef::scene("sc1"), EntityRef::scene("sc2")]));
	for tag in ["t_p1", "t_p2", "t_c", "t_d"] {
		assert!(matches!(reason_of(&set, &EntityRef::tag(tag)), Some((Empty, _))), "{} should be empty", tag);
	}
}

#[tokio::test]
async fn test_group_cycle_terminates() {
	let snapshot = CatalogSnapshot {
		groups: vec![GroupRecord::new("ga").parents(["gb"]), GroupRecord::new("gb").parents(["ga"])],
		scenes: vec![SceneRecord::new("sc1").groups(["ga"]), SceneRecord::new("sc2")],
		..CatalogSnapshot::default()
	};
	let graph = graph(snapshot);
	assert!(!graph.cycles().is_empty());

	let set = compute(&graph, rule_set(vec![], &[]));
	assert!(set.is_empty());

	let set = compute(&graph, rule_set(vec![], &[EntityRef::scene("sc1")]));
	assert_eq!(reason_of(&set, &EntityRef::group("ga")).map(|(r, _)| r), Some(Empty));
	assert_eq!(reason_of(&set, &EntityRef::group("gb")).map(|(r, _)| r), Some(Empty));
	assert_eq!(reason_of(&set, &EntityRef::scene("sc2")), None);

	// Deterministic across runs
	let again = compute(&graph, rule_set(vec![], &[EntityRef::scene("sc1")]));
	assert_eq!(set.records(), again.records());
}

#[tokio::test]
async fn test_library_exclude_group_and_gallery() {
	let graph = graph(library());
	let set = compute(
		&graph,
		rule_set(vec![exclude(EntityKind::Group, &["gr1"]), exclude(EntityKind::Gallery, &["ga1"])], &[]),
	);

	// Direct members only: gr2 is a child group, not a reference of gr1
	assert_eq!(reason_of(&set, &EntityRef::scene("sc1")), Some((Restricted, Some(EntityRef::group("gr1")))));
	assert_eq!(reason_of(&set, &EntityRef::scene("sc2")), Some((Restricted, Some(EntityRef::gallery("ga1")))));
	assert_eq!(reason_of(&set, &EntityRef::image("im1")), Some((Restricted, Some(EntityRef::gallery("ga1")))));
	assert_eq!(reason_of(&set, &EntityRef::group("gr2")).map(|(r, _)| r), Some(Empty));
	// pa only appears in sc1
	assert_eq!(reason_of(&set, &EntityRef::performer("pa")), Some((Empty, Some(EntityRef::scene("sc1")))));
	// pb still has sc5
	assert_eq!(reason_of(&set, &EntityRef::performer("pb")), None);
	// st_child keeps im2, t_a keeps pd through t_d
	assert_eq!(reason_of(&set, &EntityRef::studio("st_child")), None);
	assert_eq!(reason_of(&set, &EntityRef::tag("t_a")), None);
	// ga2 has no image nodes but a positive count
	assert_eq!(reason_of(&set, &EntityRef::gallery("ga2")), None);
}

// vim: ts=4
