//! Error type shared by the engine and its adapters.

use std::fmt;

use crate::entity::{EntityId, EntityKind};
use crate::types::SyncVersion;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Catalog snapshot could not be fetched (fatal for the computation, retried)
	SnapshotUnavailable(String),
	/// Rule store could not be read (fatal for the computation, retried)
	RuleStoreUnavailable(String),
	/// Hierarchy traversal met a cycle; traversal was truncated
	CyclicGraphDetected { kind: EntityKind, id: EntityId },
	/// A result computed against an older sync version was dropped
	StaleVersionDiscarded { computed: SyncVersion, current: SyncVersion },
	/// Incremental update found a record that should not exist
	InconsistentExclusionState(String),
	ValidationError(String),
	NotFound,
	Parse,
	DbError,
	Timeout,
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl Error {
	/// Transient failures worth retrying with backoff
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Error::SnapshotUnavailable(_) | Error::RuleStoreUnavailable(_) | Error::Timeout
		)
	}

	/// Message safe to show to end users. Never leaks internal detail.
	pub fn public_message(&self) -> &'static str {
		match self {
			Error::NotFound => "not found",
			Error::ValidationError(_) | Error::Parse => "invalid request",
			_ => "content temporarily unavailable",
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::SnapshotUnavailable(msg) => write!(f, "catalog snapshot unavailable: {}", msg),
			Error::RuleStoreUnavailable(msg) => write!(f, "rule store unavailable: {}", msg),
			Error::CyclicGraphDetected { kind, id } => {
				write!(f, "cyclic {} hierarchy detected at {}", kind, id)
			}
			Error::StaleVersionDiscarded { computed, current } => {
				write!(f, "stale result for version {} discarded (current {})", computed, current)
			}
			Error::InconsistentExclusionState(msg) => {
				write!(f, "inconsistent exclusion state: {}", msg)
			}
			Error::ValidationError(msg) => write!(f, "validation error: {}", msg),
			Error::NotFound => write!(f, "not found"),
			Error::Parse => write!(f, "parse error"),
			Error::DbError => write!(f, "database error"),
			Error::Timeout => write!(f, "timeout"),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(_err: serde_json::Error) -> Self {
		Self::Parse
	}
}


// vim: ts=4
