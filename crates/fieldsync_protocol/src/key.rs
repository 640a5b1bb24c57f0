//! Entity identity and sync priority.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite identity of an entity: its type plus a locally assigned id.
///
/// The two components are carried as separate fields everywhere (SQL columns,
/// wire messages, in-memory maps). They are never joined into a single
/// delimited string, so ids containing arbitrary characters are safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type, e.g. `"shift"` or `"employee"`.
    pub entity_type: String,
    /// Local id, stable across sync.
    pub local_id: String,
}

impl EntityKey {
    /// Creates a new entity key.
    pub fn new(entity_type: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            local_id: local_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display only; never parsed back.
        write!(f, "{}({})", self.entity_type, self.local_id)
    }
}

/// Upload priority of an entity's pending changes.
///
/// The change queue drains in `(priority ascending, enqueue-time ascending)`
/// order, so `High` work goes out before bulk `Low` traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPriority {
    /// Drained first (e.g. safety-critical status changes).
    High,
    /// Default priority.
    Normal,
    /// Bulk, non-urgent data.
    Low,
}

impl SyncPriority {
    /// Converts to the ordinal stored in the database.
    pub fn to_code(self) -> u8 {
        match self {
            SyncPriority::High => 0,
            SyncPriority::Normal => 1,
            SyncPriority::Low => 2,
        }
    }

    /// Converts from a stored ordinal.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SyncPriority::High),
            1 => Some(SyncPriority::Normal),
            2 => Some(SyncPriority::Low),
            _ => None,
        }
    }
}

impl Default for SyncPriority {
    fn default() -> Self {
        SyncPriority::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_components_stay_separate() {
        // Ids containing would-be separator characters are fine.
        let key = EntityKey::new("shift", "site:7/slot_42");
        assert_eq!(key.entity_type, "shift");
        assert_eq!(key.local_id, "site:7/slot_42");
    }

    #[test]
    fn priority_codes() {
        assert_eq!(SyncPriority::High.to_code(), 0);
        assert_eq!(SyncPriority::Normal.to_code(), 1);
        assert_eq!(SyncPriority::Low.to_code(), 2);

        assert_eq!(SyncPriority::from_code(0), Some(SyncPriority::High));
        assert_eq!(SyncPriority::from_code(2), Some(SyncPriority::Low));
        assert_eq!(SyncPriority::from_code(9), None);
    }

    #[test]
    fn priority_ordering_matches_drain_order() {
        assert!(SyncPriority::High < SyncPriority::Normal);
        assert!(SyncPriority::Normal < SyncPriority::Low);
    }

    #[test]
    fn key_serde_roundtrip() {
        let key = EntityKey::new("employee", "e-1001");
        let json = serde_json::to_string(&key).unwrap();
        let back: EntityKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
