//! Database schema initialization

use sqlx::SqlitePool;

/// Creates the rule and hide list tables and their indexes
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Restriction rules
	//*******************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS restriction_rules (
		user_id integer NOT NULL,
		kind text NOT NULL,
		mode text NOT NULL,
		ids json NOT NULL,
		updated_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(user_id, kind)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Hidden entities
	//*****************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS hidden_entities (
		user_id integer NOT NULL,
		kind text NOT NULL,
		entity_id text NOT NULL,
		hidden_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(user_id, kind, entity_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_hidden_entities_entity ON hidden_entities(kind, entity_id)")
		.execute(&mut *tx)
		.await?;

	tx.commit().await?;
	Ok(())
}

// vim: ts=4
