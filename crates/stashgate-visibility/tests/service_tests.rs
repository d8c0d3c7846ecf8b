//! Query service: caching, invalidation, and fail-closed behavior

mod common;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use common::*;
use stashgate_catalog_adapter_memory::{MemoryCatalog, MemoryRuleStore};
use stashgate_rule_adapter_sqlite::RuleAdapterSqlite;
use stashgate_types::graph::{CatalogSnapshot, SceneRecord};
use stashgate_types::prelude::*;
use stashgate_types::rule::{HiddenEntity, RestrictionRule};
use stashgate_types::rule_adapter::RuleAdapter;
use stashgate_types::worker::Priority;
use stashgate_visibility::{ExcludedIds, ExclusionReason, VisibilityConfig, VisibilityQueryService};

/// Holds the next fetch once armed, until released
#[derive(Debug, Default)]
struct Gate {
	armed: AtomicBool,
	entered: Notify,
	release: Notify,
}

impl Gate {
	fn arm(&self) {
		self.armed.store(true, Ordering::SeqCst);
	}

	async fn pass(&self) {
		if self.armed.swap(false, Ordering::SeqCst) {
			self.entered.notify_one();
			self.release.notified().await;
		}
	}
}

/// Rule store wrapper that answers slowly, fails for one user, or holds a
/// fetch at its gate
#[derive(Debug)]
struct TestRules {
	inner: MemoryRuleStore,
	delay: Duration,
	broken: Option<UserId>,
	gate: Gate,
}

impl TestRules {
	fn new(inner: MemoryRuleStore) -> Self {
		Self { inner, delay: Duration::ZERO, broken: None, gate: Gate::default() }
	}

	async fn check(&self, user_id: UserId) -> ClResult<()> {
		self.gate.pass().await;
		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}
		if self.broken == Some(user_id) {
			return Err(Error::DbError);
		}
		Ok(())
	}
}

#[async_trait]
impl RuleAdapter for TestRules {
	async fn list_rules(&self, user_id: UserId) -> ClResult<Vec<RestrictionRule>> {
		self.check(user_id).await?;
		self.inner.list_rules(user_id).await
	}

	async fn put_rule(&self, rule: &RestrictionRule) -> ClResult<()> {
		self.inner.put_rule(rule).await
	}

	async fn delete_rule(&self, user_id: UserId, kind: EntityKind) -> ClResult<()> {
		self.inner.delete_rule(user_id, kind).await
	}

	async fn list_hidden(&self, user_id: UserId) -> ClResult<Vec<HiddenEntity>> {
		self.check(user_id).await?;
		self.inner.list_hidden(user_id).await
	}

	async fn hide(&self, user_id: UserId, entity: &EntityRef) -> ClResult<()> {
		self.inner.hide(user_id, entity).await
	}

	async fn unhide(&self, user_id: UserId, entity: &EntityRef) -> ClResult<()> {
		self.inner.unhide(user_id, entity).await
	}

	async fn list_users(&self) -> ClResult<Vec<UserId>> {
		self.inner.list_users().await
	}
}

async fn service_with(rules: TestRules, config: VisibilityConfig) -> (Arc<MemoryCatalog>, VisibilityQueryService) {
	init_tracing();
	let catalog = Arc::new(MemoryCatalog::default());
	catalog.publish(studio_chain()).await;
	let service = VisibilityQueryService::new(Arc::clone(&catalog) as _, Arc::new(rules) as _, config);
	service.init().await.expect("init");
	(catalog, service)
}

/// Service over a rule store whose next fetch can be held at its gate
async fn gated_service() -> (Arc<MemoryCatalog>, Arc<TestRules>, Arc<VisibilityQueryService>) {
	init_tracing();
	let catalog = Arc::new(MemoryCatalog::default());
	catalog.publish(studio_chain()).await;
	let rules = Arc::new(TestRules::new(MemoryRuleStore::new()));
	let service = Arc::new(VisibilityQueryService::new(
		Arc::clone(&catalog) as _,
		Arc::clone(&rules) as _,
		test_config(),
	));
	service.init().await.expect("init");
	(catalog, rules, service)
}

/// studio_chain plus a third scene of studio s9
fn studio_chain_v2() -> CatalogSnapshot {
	let mut snapshot = studio_chain();
	snapshot.scenes.push(SceneRecord::new("sc3").studio("s9"));
	snapshot
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
	for _ in 0..200 {
		if check() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	false
}

// Caching and versions //
//**********************//

#[tokio::test]
async fn test_cache_hit_returns_same_set() {
	let engine = engine(studio_chain()).await;
	let first = engine.service.exclusion_set(USER).await.expect("set");
	let second = engine.service.exclusion_set(USER).await.expect("set");
	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(engine.service.cache().len(), 1);
}

#[tokio::test]
async fn test_stale_result_is_discarded() {
	let engine = engine(studio_chain()).await;
	engine.rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");
	let old_graph = engine.service.computer().load_graph(None).await.expect("v1 graph");

	let v2 = engine.catalog.publish(studio_chain_v2()).await;
	engine.service.on_sync_version_bumped(SyncVersion(1), v2, &BTreeSet::from([EntityKind::Scene])).await;

	// Computation for v1 finishing after the bump
	let late = engine.service.computer().recompute(USER, old_graph, Priority::Batch).await.expect("set");
	assert!(matches!(
		engine.service.cache().store(Arc::new(late)),
		Err(Error::StaleVersionDiscarded { .. })
	));
	assert!(engine.service.cache().get(USER).is_none());

	let set = engine.service.exclusion_set(USER).await.expect("set");
	assert_eq!(set.version(), v2);
	assert!(!engine.service.is_visible(USER, EntityKind::Scene, "sc3").await);
}

#[tokio::test]
async fn test_sync_without_changes_retags() {
	let engine = engine(studio_chain()).await;
	engine.rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");
	let before = engine.service.exclusion_set(USER).await.expect("set");

	let v2 = engine.catalog.publish(studio_chain()).await;
	engine.service.on_sync_version_bumped(SyncVersion(1), v2, &BTreeSet::new()).await;

	let after = engine.service.cache().get(USER).expect("retagged without recompute");
	assert_eq!(after.version(), v2);
	assert_eq!(after.len(), before.len());
	assert_eq!(
		reason_of(&after, &EntityRef::scene("sc1")),
		Some((ExclusionReason::Restricted, Some(EntityRef::tag("t123"))))
	);
}

#[tokio::test]
async fn test_sync_with_changes_recomputes_eagerly() {
	let config = VisibilityConfig { eager_recompute_on_sync: true, ..test_config() };
	let engine = engine_with(studio_chain(), config).await;
	engine.rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");
	engine.service.exclusion_set(USER).await.expect("set");

	let v2 = engine.catalog.publish(studio_chain_v2()).await;
	engine.service.on_sync_version_bumped(SyncVersion(1), v2, &BTreeSet::from([EntityKind::Scene])).await;

	let set = engine.service.cache().get(USER).expect("recomputed after the bump");
	assert_eq!(set.version(), v2);
	assert_eq!(
		reason_of(&set, &EntityRef::scene("sc3")),
		Some((ExclusionReason::Restricted, Some(EntityRef::tag("t123"))))
	);
}

#[tokio::test]
async fn test_sync_with_changes_is_lazy_when_configured() {
	let engine = engine(studio_chain()).await;
	engine.service.exclusion_set(USER).await.expect("set");

	let v2 = engine.catalog.publish(studio_chain_v2()).await;
	engine.service.on_sync_version_bumped(SyncVersion(1), v2, &BTreeSet::from([EntityKind::Scene])).await;
	assert!(engine.service.cache().get(USER).is_none());
	assert_eq!(engine.service.cache().stale_users(), vec![USER]);

	assert_eq!(engine.service.visible_count(USER, EntityKind::Scene).await, 3);
}

// Updates racing sync bumps //
//***************************//

#[tokio::test]
async fn test_sync_during_rule_update_drops_old_rules() {
	let (catalog, rules, service) = gated_service().await;
	assert!(service.is_visible(USER, EntityKind::Scene, "sc1").await);

	rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");
	rules.gate.arm();
	let update = tokio::spawn({
		let service = Arc::clone(&service);
		async move { service.on_rule_changed(USER).await }
	});
	rules.gate.entered.notified().await;

	// Identical content while the update waits for the rule store
	let v2 = catalog.publish(studio_chain()).await;
	service.on_sync_version_bumped(SyncVersion(1), v2, &BTreeSet::new()).await;
	rules.gate.release.notify_one();

	let res = update.await.expect("update task");
	assert!(matches!(
		res,
		Err(Error::StaleVersionDiscarded { computed: SyncVersion(1), current: SyncVersion(2) })
	));
	// Neither the pre-change set nor a retagged copy of it survives
	assert!(service.cache().peek(USER).is_none());
	assert!(!service.is_visible(USER, EntityKind::Scene, "sc1").await);
	assert_eq!(service.exclusion_set(USER).await.expect("set").version(), v2);
}

#[tokio::test]
async fn test_sync_during_hide_toggle_drops_old_hides() {
	let (catalog, rules, service) = gated_service().await;
	let sc2 = EntityRef::scene("sc2");
	assert!(service.is_visible(USER, EntityKind::Scene, "sc2").await);

	rules.hide(USER, &sc2).await.expect("hide");
	rules.gate.arm();
	let update = tokio::spawn({
		let service = Arc::clone(&service);
		let sc2 = sc2.clone();
		async move { service.on_hide_toggled(USER, &sc2, true).await }
	});
	rules.gate.entered.notified().await;

	let v2 = catalog.publish(studio_chain()).await;
	service.on_sync_version_bumped(SyncVersion(1), v2, &BTreeSet::new()).await;
	rules.gate.release.notify_one();

	assert!(matches!(update.await.expect("update task"), Err(Error::StaleVersionDiscarded { .. })));
	assert!(service.cache().peek(USER).is_none());
	assert!(!service.is_visible(USER, EntityKind::Scene, "sc2").await);
	assert!(service.is_visible(USER, EntityKind::Scene, "sc1").await);
}

#[tokio::test]
async fn test_sync_retags_users_without_pending_updates() {
	let (catalog, rules, service) = gated_service().await;
	let other = UserId(6);
	service.exclusion_set(USER).await.expect("set");
	service.exclusion_set(other).await.expect("set");

	rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");
	rules.gate.arm();
	let update = tokio::spawn({
		let service = Arc::clone(&service);
		async move { service.on_rule_changed(USER).await }
	});
	rules.gate.entered.notified().await;

	let v2 = catalog.publish(studio_chain()).await;
	service.on_sync_version_bumped(SyncVersion(1), v2, &BTreeSet::new()).await;
	// Only the idle user is carried over
	assert_eq!(service.cache().get(other).map(|set| set.version()), Some(v2));
	assert!(service.cache().get(USER).is_none());

	rules.gate.release.notify_one();
	assert!(update.await.expect("update task").is_err());
	assert!(service.is_visible(other, EntityKind::Scene, "sc1").await);
	assert!(!service.is_visible(USER, EntityKind::Scene, "sc1").await);
}

// Fail closed //
//*************//

#[tokio::test]
async fn test_rule_store_outage_fails_closed() {
	let engine = engine(studio_chain()).await;
	engine.rules.set_available(false);

	assert!(matches!(engine.service.exclusion_set(USER).await, Err(Error::RuleStoreUnavailable(_))));
	assert!(!engine.service.is_visible(USER, EntityKind::Scene, "sc2").await);
	let excluded = engine.service.excluded_ids(USER, EntityKind::Scene).await;
	assert!(excluded.is_all());
	assert!(excluded.contains("sc2"));
	assert_eq!(engine.service.visible_count(USER, EntityKind::Scene).await, 0);

	engine.rules.set_available(true);
	assert!(engine.service.is_visible(USER, EntityKind::Scene, "sc2").await);
	let excluded = engine.service.excluded_ids(USER, EntityKind::Scene).await;
	assert_eq!(excluded, ExcludedIds::Set(Arc::new(BTreeSet::new())));
}

#[tokio::test]
async fn test_catalog_outage_fails_closed() {
	let engine = engine(studio_chain()).await;
	engine.catalog.set_available(false);

	assert!(matches!(engine.service.exclusion_set(USER).await, Err(Error::SnapshotUnavailable(_))));
	assert!(!engine.service.is_visible(USER, EntityKind::Studio, "s2").await);
}

#[tokio::test]
async fn test_failed_rule_update_drops_cached_set() {
	let engine = engine(studio_chain()).await;
	assert!(engine.service.is_visible(USER, EntityKind::Scene, "sc1").await);

	engine.rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");
	engine.rules.set_available(false);
	assert!(engine.service.on_rule_changed(USER).await.is_err());
	// The outdated, more permissive set must not be served
	assert!(engine.service.cache().get(USER).is_none());
	assert!(!engine.service.is_visible(USER, EntityKind::Scene, "sc1").await);

	engine.rules.set_available(true);
	assert!(!engine.service.is_visible(USER, EntityKind::Scene, "sc1").await);
	assert!(engine.service.is_visible(USER, EntityKind::Scene, "sc2").await);
}

#[tokio::test]
async fn test_slow_rule_store_times_out() {
	let rules = TestRules { delay: Duration::from_millis(500), ..TestRules::new(MemoryRuleStore::new()) };
	let config = VisibilityConfig { query_wait_ms: 50, ..test_config() };
	let (_catalog, service) = service_with(rules, config).await;

	assert!(matches!(service.exclusion_set(USER).await, Err(Error::Timeout)));
	assert!(!service.is_visible(USER, EntityKind::Scene, "sc2").await);
}

// Maintenance //
//*************//

#[tokio::test]
async fn test_recompute_all_isolates_failures() {
	let store = MemoryRuleStore::new();
	for user in [UserId(1), UserId(2), UserId(3)] {
		store.hide(user, &EntityRef::scene("sc2")).await.expect("hide");
	}
	let rules = TestRules { broken: Some(UserId(2)), ..TestRules::new(store) };
	let (_catalog, service) = service_with(rules, test_config()).await;
	// Cached user without any rules is recomputed too
	service.exclusion_set(UserId(7)).await.expect("set");

	let report = service.recompute_all().await.expect("report");
	assert_eq!(report.version, SyncVersion(1));
	assert_eq!(report.succeeded, vec![UserId(1), UserId(3), UserId(7)]);
	assert_eq!(report.failed.len(), 1);
	assert_eq!(report.failed[0].0, UserId(2));
	assert!(report.discarded.is_empty());

	assert!(service.cache().get(UserId(1)).is_some());
	assert!(service.cache().get(UserId(2)).is_none());
	assert!(!service.is_visible(UserId(3), EntityKind::Scene, "sc2").await);
	assert!(!service.is_visible(UserId(2), EntityKind::Scene, "sc1").await);
}

#[tokio::test]
async fn test_exclusion_stats() {
	let engine = engine(studio_chain()).await;
	engine.rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");
	engine.service.exclusion_set(USER).await.expect("set");
	engine.service.exclusion_set(UserId(6)).await.expect("set");

	let stats = engine.service.exclusion_stats();
	assert_eq!(stats.version, SyncVersion(1));
	assert_eq!(stats.cached_users, 2);
	assert_eq!(stats.stale_users, 0);
	assert_eq!(stats.by_kind.get(&EntityKind::Scene), Some(&1));
	assert_eq!(stats.by_kind.get(&EntityKind::Performer), Some(&1));
	assert_eq!(stats.by_kind.get(&EntityKind::Group), Some(&0));
	assert_eq!(stats.by_reason.get(&ExclusionReason::Restricted), Some(&3));
	assert_eq!(stats.by_reason.get(&ExclusionReason::Empty), Some(&1));
	assert_eq!(stats.by_reason.get(&ExclusionReason::Hidden), None);
}

// Event loop //
//************//

#[tokio::test]
async fn test_listener_applies_events() {
	let engine = engine(studio_chain()).await;
	let handle = engine.service.start(engine.catalog.subscribe());
	engine.service.exclusion_set(USER).await.expect("set");

	engine.rules.hide(USER, &EntityRef::scene("sc2")).await.expect("hide");
	let service = Arc::clone(&engine.service);
	assert!(
		eventually(|| {
			service.cache().get(USER).is_some_and(|set| !set.is_visible(EntityKind::Scene, "sc2"))
		})
		.await
	);

	let v2 = engine.catalog.publish(studio_chain_v2()).await;
	assert!(eventually(|| service.cache().current_version() == v2).await);
	assert_eq!(service.visible_count(USER, EntityKind::Scene).await, 2);

	handle.abort();
}

#[tokio::test]
async fn test_sqlite_rule_store_end_to_end() {
	init_tracing();
	let temp_dir = tempfile::TempDir::new().expect("temp dir");
	let rules = Arc::new(RuleAdapterSqlite::new(temp_dir.path()).await.expect("rule store"));
	let catalog = Arc::new(MemoryCatalog::default());
	catalog.publish(studio_chain()).await;
	let service = VisibilityQueryService::new(Arc::clone(&catalog) as _, Arc::clone(&rules) as _, test_config());
	service.init().await.expect("init");

	rules.put_rule(&exclude(EntityKind::Tag, &["t123"])).await.expect("put rule");
	assert!(!service.is_visible(USER, EntityKind::Scene, "sc1").await);
	assert!(!service.is_visible(USER, EntityKind::Performer, "p1").await);

	rules.hide(USER, &EntityRef::scene("sc2")).await.expect("hide");
	service.on_hide_toggled(USER, &EntityRef::scene("sc2"), true).await.expect("hide applied");
	assert_eq!(service.visible_count(USER, EntityKind::Scene).await, 0);
	assert_eq!(service.visible_count(USER, EntityKind::Studio).await, 0);
	assert_eq!(
		service.excluded_ids(USER, EntityKind::Tag).await,
		ExcludedIds::Set(Arc::new(BTreeSet::from(["t123".into(), "t2".into()])))
	);
}

// vim: ts=4
