//! Per-entity-type sync checkpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque cursor marking delta-pull progress for one entity type.
///
/// The server issues the cursor (a timestamp, a token, whatever it likes);
/// the client never interprets it. Monotonicity is a server guarantee: the
/// client only stores cursors handed back by a fully applied delta page, and
/// only moves backward on an explicit reset for a full resync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(String);

impl Checkpoint {
    /// The initial checkpoint: pull everything.
    pub fn origin() -> Self {
        Self(String::new())
    }

    /// Wraps a server-issued cursor.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw cursor token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if no delta page has ever been applied.
    pub fn is_origin(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::origin()
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_origin() {
            f.write_str("<origin>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_empty() {
        assert!(Checkpoint::origin().is_origin());
        assert!(!Checkpoint::new("1700000000").is_origin());
    }

    #[test]
    fn serde_is_transparent() {
        let cp = Checkpoint::new("tok-123");
        assert_eq!(serde_json::to_string(&cp).unwrap(), "\"tok-123\"");
        let back: Checkpoint = serde_json::from_str("\"tok-123\"").unwrap();
        assert_eq!(back, cp);
    }
}
