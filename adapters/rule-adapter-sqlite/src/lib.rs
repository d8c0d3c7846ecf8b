//! SQLite-backed rule store for the Stashgate visibility engine.
//!
//! Holds the source-of-truth admin restriction rules and user hide lists.

#![forbid(unsafe_code)]

mod hidden;
mod rule;
mod schema;
mod utils;

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool};
use std::path::Path;

use stashgate::prelude::*;
use stashgate::rule::{HiddenEntity, RestrictionRule};
use stashgate::rule_adapter::RuleAdapter;

use crate::utils::inspect;

pub const DB_FILE: &str = "rules.db";
pub const DEFAULT_POOL_SIZE: u32 = 5;

#[derive(Debug)]
pub struct RuleAdapterSqlite {
	db: SqlitePool,
}

impl RuleAdapterSqlite {
	/// Opens (or creates) the rule database in the `dir` directory
	pub async fn new(dir: impl AsRef<Path>) -> ClResult<Self> {
		Self::with_pool_size(dir, DEFAULT_POOL_SIZE).await
	}

	pub async fn with_pool_size(dir: impl AsRef<Path>, max_connections: u32) -> ClResult<Self> {
		tokio::fs::create_dir_all(dir.as_ref()).await?;
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(dir.as_ref().join(DB_FILE))
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(max_connections.max(1))
			.connect_with(opts)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		schema::init_db(&db).await.inspect_err(inspect).or(Err(Error::DbError))?;
		info!("Rule store opened at {}", dir.as_ref().display());

		Ok(Self { db })
	}
}

#[async_trait]
impl RuleAdapter for RuleAdapterSqlite {
	// Rules
	//*******
	async fn list_rules(&self, user_id: UserId) -> ClResult<Vec<RestrictionRule>> {
		rule::list(&self.db, user_id).await
	}

	async fn put_rule(&self, rule: &RestrictionRule) -> ClResult<()> {
		rule::put(&self.db, rule).await
	}

	async fn delete_rule(&self, user_id: UserId, kind: EntityKind) -> ClResult<()> {
		rule::delete(&self.db, user_id, kind).await
	}

	// Hidden entities
	//*****************
	async fn list_hidden(&self, user_id: UserId) -> ClResult<Vec<HiddenEntity>> {
		hidden::list(&self.db, user_id).await
	}

	async fn hide(&self, user_id: UserId, entity: &EntityRef) -> ClResult<()> {
		hidden::hide(&self.db, user_id, entity).await
	}

	async fn unhide(&self, user_id: UserId, entity: &EntityRef) -> ClResult<()> {
		hidden::unhide(&self.db, user_id, entity).await
	}

	async fn list_users(&self) -> ClResult<Vec<UserId>> {
		rule::list_users(&self.db).await
	}
}

// vim: ts=4
