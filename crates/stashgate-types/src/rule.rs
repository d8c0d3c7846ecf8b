//! Admin restriction rules and user hide records.
//!
//! Both are source-of-truth records owned by their respective actors. The engine
//! only ever reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleMode {
	/// Whitelist: only entities related to the listed ids survive
	Include,
	/// Blacklist: entities related to the listed ids are removed
	Exclude,
}

impl RuleMode {
	pub fn as_str(self) -> &'static str {
		match self {
			RuleMode::Include => "INCLUDE",
			RuleMode::Exclude => "EXCLUDE",
		}
	}
}

impl FromStr for RuleMode {
	type Err = Error;

	fn from_str(s: &str) -> ClResult<Self> {
		match s {
			"INCLUDE" => Ok(RuleMode::Include),
			"EXCLUDE" => Ok(RuleMode::Exclude),
			_ => Err(Error::ValidationError(format!("unknown rule mode: {}", s))),
		}
	}
}

/// Per-user admin rule. At most one per `(user_id, kind)`; the id set is replaced
/// as a whole on update, never mutated in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionRule {
	pub user_id: UserId,
	pub kind: EntityKind,
	pub mode: RuleMode,
	pub ids: BTreeSet<EntityId>,
}

impl RestrictionRule {
	pub fn new<I, S>(user_id: UserId, kind: EntityKind, mode: RuleMode, ids: I) -> ClResult<Self>
	where
		I: IntoIterator<Item = S>,
		S: Into<EntityId>,
	{
		if !kind.is_rule_kind() {
			return Err(Error::ValidationError(format!(
				"restriction rules cannot target kind {}",
				kind
			)));
		}
		Ok(Self { user_id, kind, mode, ids: ids.into_iter().map(Into::into).collect() })
	}

	pub fn exclude<I, S>(user_id: UserId, kind: EntityKind, ids: I) -> ClResult<Self>
	where
		I: IntoIterator<Item = S>,
		S: Into<EntityId>,
	{
		Self::new(user_id, kind, RuleMode::Exclude, ids)
	}

	pub fn include<I, S>(user_id: UserId, kind: EntityKind, ids: I) -> ClResult<Self>
	where
		I: IntoIterator<Item = S>,
		S: Into<EntityId>,
	{
		Self::new(user_id, kind, RuleMode::Include, ids)
	}
}

/// Entity individually hidden by a user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenEntity {
	pub user_id: UserId,
	pub entity: EntityRef,
	pub hidden_at: Timestamp,
}

impl HiddenEntity {
	pub fn new(user_id: UserId, entity: EntityRef) -> Self {
		Self { user_id, entity, hidden_at: Timestamp::now() }
	}
}


// vim: ts=4
