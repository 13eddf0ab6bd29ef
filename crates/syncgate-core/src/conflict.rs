//! Conflict records
//!
//! A conflict record marks a delivery the server accepted against a stale
//! base version. The gateway only records it; reconciliation happens outside.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http::Method;
use crate::operation::OperationId;

/// Conflict record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(pub Uuid);

impl ConflictId {
    /// Build a v4 id from caller-supplied randomness
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Parse the hyphenated form
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// Whether someone has reconciled the conflict yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Awaiting reconciliation
    Unresolved,
    /// Reconciled by an external action
    Resolved,
}

/// A delivery that succeeded against a stale base state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Record id
    pub id: ConflictId,
    /// Queued operation whose delivery produced the conflict, if it was queued
    pub operation_id: Option<OperationId>,
    /// Kind of entity the request touched
    pub entity_type: String,
    /// Version the client based its change on
    pub local_version: Option<String>,
    /// Version the server holds
    pub server_version: Option<String>,
    /// Reconciliation state
    pub status: ConflictStatus,
    /// Detection time, ms since epoch
    pub detected_at: u64,
    /// Reconciliation time
    #[serde(default)]
    pub resolved_at: Option<u64>,
    /// Method of the conflicting request
    pub method: Method,
    /// Path of the conflicting request
    pub url: String,
}

impl ConflictRecord {
    /// Mark as reconciled. Returns false if it already was.
    pub fn resolve(&mut self, now_ms: u64) -> bool {
        if self.status == ConflictStatus::Resolved {
            return false;
        }
        self.status = ConflictStatus::Resolved;
        self.resolved_at = Some(now_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_id_is_v4() {
        let id = ConflictId::from_random_bytes([7; 16]);
        assert_eq!(id.0.get_version_num(), 4);
        assert_eq!(ConflictId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn test_resolve_once() {
        let mut record = ConflictRecord {
            id: ConflictId::from_random_bytes([1; 16]),
            operation_id: None,
            entity_type: "care-plans".to_string(),
            local_version: Some("3".to_string()),
            server_version: Some("4".to_string()),
            status: ConflictStatus::Unresolved,
            detected_at: 100,
            resolved_at: None,
            method: Method::Put,
            url: "/api/care-plans/9".to_string(),
        };
        assert!(record.resolve(200));
        assert_eq!(record.resolved_at, Some(200));
        assert!(!record.resolve(300));
        assert_eq!(record.resolved_at, Some(200));
    }
}
