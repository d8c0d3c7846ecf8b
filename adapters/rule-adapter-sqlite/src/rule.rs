//! Admin restriction rules
//!
//! One row per `(user_id, kind)`. The id set is stored as a JSON array and
//! replaced as a whole.

use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;

use stashgate::prelude::*;
use stashgate::rule::{RestrictionRule, RuleMode};

use crate::utils::{db_err, entity_kind, user_id};

pub(crate) async fn list(db: &SqlitePool, user_id: UserId) -> ClResult<Vec<RestrictionRule>> {
	let rows = sqlx::query(
		"SELECT user_id, kind, mode, ids FROM restriction_rules WHERE user_id = ? ORDER BY kind",
	)
	.bind(user_id.0)
	.fetch_all(db)
	.await
	.map_err(db_err)?;

	rows.iter()
		.map(|row| {
			let mode: &str = row.try_get("mode").map_err(db_err)?;
			let ids: &str = row.try_get("ids").map_err(db_err)?;
			let ids: BTreeSet<EntityId> = serde_json::from_str(ids)
				.inspect_err(|err| warn!("DB: bad rule id list: {}", err))
				.map_err(|_| Error::DbError)?;
			Ok(RestrictionRule {
				user_id: crate::utils::user_id(row)?,
				kind: entity_kind(row)?,
				mode: mode.parse::<RuleMode>().map_err(|_| Error::DbError)?,
				ids,
			})
		})
		.collect()
}

pub(crate) async fn put(db: &SqlitePool, rule: &RestrictionRule) -> ClResult<()> {
	if !rule.kind.is_rule_kind() {
		return Err(Error::ValidationError(format!(
			"restriction rules cannot target kind {}",
			rule.kind
		)));
	}
	let ids = serde_json::to_string(&rule.ids).map_err(|_| Error::Parse)?;

	sqlx::query(
		"INSERT INTO restriction_rules (user_id, kind, mode, ids, updated_at)
		VALUES (?1, ?2, ?3, ?4, unixepoch())
		ON CONFLICT(user_id, kind) DO UPDATE SET mode=?3, ids=?4, updated_at=unixepoch()",
	)
	.bind(rule.user_id.0)
	.bind(rule.kind.as_str())
	.bind(rule.mode.as_str())
	.bind(ids)
	.execute(db)
	.await
	.map_err(db_err)?;

	debug!("Stored {} {} rule of user {}", rule.mode.as_str(), rule.kind, rule.user_id);
	Ok(())
}

pub(crate) async fn delete(db: &SqlitePool, user_id: UserId, kind: EntityKind) -> ClResult<()> {
	sqlx::query("DELETE FROM restriction_rules WHERE user_id = ? AND kind = ?")
		.bind(user_id.0)
		.bind(kind.as_str())
		.execute(db)
		.await
		.map_err(db_err)?;
	Ok(())
}

/// Users having rules or hidden entities
pub(crate) async fn list_users(db: &SqlitePool) -> ClResult<Vec<UserId>> {
	let rows = sqlx::query(
		"SELECT user_id FROM restriction_rules
		UNION SELECT user_id FROM hidden_entities
		ORDER BY user_id",
	)
	.fetch_all(db)
	.await
	.map_err(db_err)?;

	rows.iter().map(user_id).collect()
}

// vim: ts=4
