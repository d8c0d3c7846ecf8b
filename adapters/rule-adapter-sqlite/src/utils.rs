//! Row decoding and error mapping helpers

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use stashgate::prelude::*;

pub(crate) fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

pub(crate) fn db_err(err: sqlx::Error) -> Error {
	inspect(&err);
	Error::DbError
}

pub(crate) fn user_id(row: &SqliteRow) -> ClResult<UserId> {
	let id: i64 = row.try_get("user_id").map_err(db_err)?;
	u32::try_from(id).map(UserId).map_err(|_| Error::DbError)
}

pub(crate) fn entity_kind(row: &SqliteRow) -> ClResult<EntityKind> {
	let kind: &str = row.try_get("kind").map_err(db_err)?;
	kind.parse().inspect_err(|err| warn!("DB: bad entity kind: {}", err)).map_err(|_| Error::DbError)
}

// vim: ts=4
