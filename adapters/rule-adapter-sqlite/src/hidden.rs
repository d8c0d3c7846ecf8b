//! Per-user hide lists

use sqlx::{Row, SqlitePool};

use stashgate::prelude::*;
use stashgate::rule::HiddenEntity;

use crate::utils::{db_err, entity_kind};

pub(crate) async fn list(db: &SqlitePool, user_id: UserId) -> ClResult<Vec<HiddenEntity>> {
	let rows = sqlx::query(
		"SELECT user_id, kind, entity_id, hidden_at FROM hidden_entities
		WHERE user_id = ? ORDER BY kind, entity_id",
	)
	.bind(user_id.0)
	.fetch_all(db)
	.await
	.map_err(db_err)?;

	rows.iter()
		.map(|row| {
			let id: &str = row.try_get("entity_id").map_err(db_err)?;
			let hidden_at: i64 = row.try_get("hidden_at").map_err(db_err)?;
			Ok(HiddenEntity {
				user_id: crate::utils::user_id(row)?,
				entity: EntityRef::new(entity_kind(row)?, id),
				hidden_at: Timestamp(hidden_at),
			})
		})
		.collect()
}

pub(crate) async fn hide(db: &SqlitePool, user_id: UserId, entity: &EntityRef) -> ClResult<()> {
	sqlx::query(
		"INSERT INTO hidden_entities (user_id, kind, entity_id, hidden_at)
		VALUES (?, ?, ?, ?)
		ON CONFLICT(user_id, kind, entity_id) DO NOTHING",
	)
	.bind(user_id.0)
	.bind(entity.kind.as_str())
	.bind(&*entity.id)
	.bind(Timestamp::now().0)
	.execute(db)
	.await
	.map_err(db_err)?;
	Ok(())
}

pub(crate) async fn unhide(db: &SqlitePool, user_id: UserId, entity: &EntityRef) -> ClResult<()> {
	sqlx::query("DELETE FROM hidden_entities WHERE user_id = ? AND kind = ? AND entity_id = ?")
		.bind(user_id.0)
		.bind(entity.kind.as_str())
		.bind(&*entity.id)
		.execute(db)
		.await
		.map_err(db_err)?;
	Ok(())
}

// vim: ts=4
