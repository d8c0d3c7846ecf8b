//! Adapter for admin restriction rules and user hide lists.
//!
//! These records are the source of truth. Read failures must surface as
//! `RuleStoreUnavailable` so the engine can fail closed.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;
use crate::rule::{HiddenEntity, RestrictionRule};

#[async_trait]
pub trait RuleAdapter: Debug + Send + Sync {
	/// # Rules
	async fn list_rules(&self, user_id: UserId) -> ClResult<Vec<RestrictionRule>>;
	/// Stores a rule, replacing any existing rule for the same `(user, kind)`
	async fn put_rule(&self, rule: &RestrictionRule) -> ClResult<()>;
	async fn delete_rule(&self, user_id: UserId, kind: EntityKind) -> ClResult<()>;

	/// # Hidden entities
	async fn list_hidden(&self, user_id: UserId) -> ClResult<Vec<HiddenEntity>>;
	async fn hide(&self, user_id: UserId, entity: &EntityRef) -> ClResult<()>;
	async fn unhide(&self, user_id: UserId, entity: &EntityRef) -> ClResult<()>;

	/// Users having at least one rule or hidden entity
	async fn list_users(&self) -> ClResult<Vec<UserId>>;
}

// vim: ts=4
