//! Invalidation events delivered to the visibility engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InvalidationEvent {
	/// A catalog sync published a new snapshot
	#[serde(rename_all = "camelCase")]
	SyncVersionBumped { old: SyncVersion, new: SyncVersion, changed_kinds: BTreeSet<EntityKind> },
	/// An admin replaced or removed one of the user's rules
	#[serde(rename_all = "camelCase")]
	RuleChanged { user_id: UserId },
	/// The user hid or unhid one entity
	#[serde(rename_all = "camelCase")]
	HideToggled { user_id: UserId, entity: EntityRef, hidden: bool },
}

impl InvalidationEvent {
	/// User affected by the event, `None` for catalog wide events
	pub fn user_id(&self) -> Option<UserId> {
		match self {
			InvalidationEvent::SyncVersionBumped { .. } => None,
			InvalidationEvent::RuleChanged { user_id }
			| InvalidationEvent::HideToggled { user_id, .. } => Some(*user_id),
		}
	}
}

// vim: ts=4
