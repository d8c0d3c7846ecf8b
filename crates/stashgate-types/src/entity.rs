//! Entity kinds and identity.
//!
//! Identifiers are catalog scoped and unique only within their kind, so identity
//! is always the `(kind, id)` pair carried by [`EntityRef`].

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ClResult, Error};

pub type EntityId = Box<str>;

/// Library entity kinds. Declaration order is the canonical ordinal order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
	Scene,
	Performer,
	Studio,
	Tag,
	Group,
	Gallery,
	Image,
}

impl EntityKind {
	pub const ALL: [EntityKind; 7] = [
		EntityKind::Scene,
		EntityKind::Performer,
		EntityKind::Studio,
		EntityKind::Tag,
		EntityKind::Group,
		EntityKind::Gallery,
		EntityKind::Image,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			EntityKind::Scene => "scene",
			EntityKind::Performer => "performer",
			EntityKind::Studio => "studio",
			EntityKind::Tag => "tag",
			EntityKind::Group => "group",
			EntityKind::Gallery => "gallery",
			EntityKind::Image => "image",
		}
	}

	/// Position in [`EntityKind::ALL`], for per-kind arrays
	pub fn index(self) -> usize {
		self as usize
	}

	/// Kinds an admin restriction rule may target
	pub fn is_rule_kind(self) -> bool {
		matches!(self, EntityKind::Tag | EntityKind::Studio | EntityKind::Group | EntityKind::Gallery)
	}

	/// Content kinds are never pruned as empty; organizational kinds are
	pub fn is_content(self) -> bool {
		matches!(self, EntityKind::Scene | EntityKind::Image)
	}
}

impl std::fmt::Display for EntityKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EntityKind {
	type Err = Error;

	fn from_str(s: &str) -> ClResult<Self> {
		match s {
			"scene" => Ok(EntityKind::Scene),
			"performer" => Ok(EntityKind::Performer),
			"studio" => Ok(EntityKind::Studio),
			"tag" => Ok(EntityKind::Tag),
			"group" => Ok(EntityKind::Group),
			"gallery" => Ok(EntityKind::Gallery),
			"image" => Ok(EntityKind::Image),
			_ => Err(Error::ValidationError(format!("unknown entity kind: {}", s))),
		}
	}
}

/// Fully qualified entity identity. Orders by kind ordinal, then id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
	pub kind: EntityKind,
	pub id: EntityId,
}

impl EntityRef {
	pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
		Self { kind, id: id.into() }
	}

	pub fn scene(id: impl Into<EntityId>) -> Self {
		Self::new(EntityKind::Scene, id)
	}

	pub fn performer(id: impl Into<EntityId>) -> Self {
		Self::new(EntityKind::Performer, id)
	}

	pub fn studio(id: impl Into<EntityId>) -> Self {
		Self::new(EntityKind::Studio, id)
	}

	pub fn tag(id: impl Into<EntityId>) -> Self {
		Self::new(EntityKind::Tag, id)
	}

	pub fn group(id: impl Into<EntityId>) -> Self {
		Self::new(EntityKind::Group, id)
	}

	pub fn gallery(id: impl Into<EntityId>) -> Self {
		Self::new(EntityKind::Gallery, id)
	}

	pub fn image(id: impl Into<EntityId>) -> Self {
		Self::new(EntityKind::Image, id)
	}
}

impl std::fmt::Display for EntityRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.kind, self.id)
	}
}


// vim: ts=4
