//! Rule and hide list store

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast};

use stashgate::event::InvalidationEvent;
use stashgate::prelude::*;
use stashgate::rule::{HiddenEntity, RestrictionRule};
use stashgate::rule_adapter::RuleAdapter;

#[derive(Debug, Default)]
struct Records {
	rules: BTreeMap<(UserId, EntityKind), RestrictionRule>,
	hidden: BTreeMap<UserId, BTreeMap<EntityRef, HiddenEntity>>,
}

#[derive(Debug)]
pub struct MemoryRuleStore {
	records: RwLock<Records>,
	events: Option<broadcast::Sender<InvalidationEvent>>,
	available: AtomicBool,
}

impl MemoryRuleStore {
	pub fn new() -> Self {
		Self { records: RwLock::new(Records::default()), events: None, available: AtomicBool::new(true) }
	}

	/// Announces every rule change and hide toggle on `events`
	pub fn with_events(mut self, events: broadcast::Sender<InvalidationEvent>) -> Self {
		self.events = Some(events);
		self
	}

	/// Simulates an outage of the rule store
	pub fn set_available(&self, available: bool) {
		self.available.store(available, Ordering::Relaxed);
	}

	fn check_available(&self) -> ClResult<()> {
		if self.available.load(Ordering::Relaxed) {
			Ok(())
		} else {
			Err(Error::RuleStoreUnavailable("rule store offline".into()))
		}
	}

	fn announce(&self, event: InvalidationEvent) {
		if let Some(events) = &self.events {
			let _ignore = events.send(event);
		}
	}
}

impl Default for MemoryRuleStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl RuleAdapter for MemoryRuleStore {
	async fn list_rules(&self, user_id: UserId) -> ClResult<Vec<RestrictionRule>> {
		self.check_available()?;
		let records = self.records.read().await;
		Ok(records
			.rules
			.range((user_id, EntityKind::Scene)..=(user_id, EntityKind::Image))
			.map(|(_, rule)| rule.clone())
			.collect())
	}

	async fn put_rule(&self, rule: &RestrictionRule) -> ClResult<()> {
		self.check_available()?;
		if !rule.kind.is_rule_kind() {
			return Err(Error::ValidationError(format!("restriction rules cannot target kind {}", rule.kind)));
		}
		self.records.write().await.rules.insert((rule.user_id, rule.kind), rule.clone());
		debug!("Stored {} {} rule of user {} ({} ids)", rule.mode.as_str(), rule.kind, rule.user_id, rule.ids.len());
		self.announce(InvalidationEvent::RuleChanged { user_id: rule.user_id });
		Ok(())
	}

	async fn delete_rule(&self, user_id: UserId, kind: EntityKind) -> ClResult<()> {
		self.check_available()?;
		let removed = self.records.write().await.rules.remove(&(user_id, kind));
		if removed.is_some() {
			self.announce(InvalidationEvent::RuleChanged { user_id });
		}
		Ok(())
	}

	async fn list_hidden(&self, user_id: UserId) -> ClResult<Vec<HiddenEntity>> {
		self.check_available()?;
		let records = self.records.read().await;
		Ok(records.hidden.get(&user_id).map(|h| h.values().cloned().collect()).unwrap_or_default())
	}

	async fn hide(&self, user_id: UserId, entity: &EntityRef) -> ClResult<()> {
		self.check_available()?;
		let inserted = {
			let mut records = self.records.write().await;
			let hidden = records.hidden.entry(user_id).or_default();
			if hidden.contains_key(entity) {
				false
			} else {
				hidden.insert(entity.clone(), HiddenEntity::new(user_id, entity.clone()));
				true
			}
		};
		if inserted {
			self.announce(InvalidationEvent::HideToggled { user_id, entity: entity.clone(), hidden: true });
		}
		Ok(())
	}

	async fn unhide(&self, user_id: UserId, entity: &EntityRef) -> ClResult<()> {
		self.check_available()?;
		let removed = {
			let mut records = self.records.write().await;
			let removed = records.hidden.get_mut(&user_id).and_then(|h| h.remove(entity));
			if records.hidden.get(&user_id).is_some_and(BTreeMap::is_empty) {
				records.hidden.remove(&user_id);
			}
			removed
		};
		if removed.is_some() {
			self.announce(InvalidationEvent::HideToggled { user_id, entity: entity.clone(), hidden: false });
		}
		Ok(())
	}

	async fn list_users(&self) -> ClResult<Vec<UserId>> {
		self.check_available()?;
		let records = self.records.read().await;
		let users: BTreeSet<UserId> =
			records.rules.keys().map(|(user_id, _)| *user_id).chain(records.hidden.keys().copied()).collect();
		Ok(users.into_iter().collect())
	}
}

// vim: ts=4
