//! Conflict policies and resolutions.

use serde::{Deserialize, Serialize};

/// Policy for resolving a version conflict reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Server payload overwrites the local entity.
    ServerWins,
    /// Local payload is re-pushed until the server accepts it.
    ClientWins,
    /// The later of the two modification timestamps wins; ties go to the
    /// server (the server is the tie-break authority to avoid oscillation).
    TimestampWins,
    /// No automatic mutation; the conflict is persisted for an explicit
    /// resolution call.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy resolves conflicts without operator input.
    pub fn auto_resolves(self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Decides a resolution for a conflict under this policy.
    ///
    /// `client_modified` and `server_modified` are millisecond timestamps of
    /// the competing versions; they are only consulted by `TimestampWins`.
    pub fn decide(self, client_modified: i64, server_modified: i64) -> ConflictResolution {
        match self {
            ConflictPolicy::ServerWins => ConflictResolution::AcceptServer,
            ConflictPolicy::ClientWins => ConflictResolution::KeepClient,
            ConflictPolicy::TimestampWins => {
                if client_modified > server_modified {
                    ConflictResolution::KeepClient
                } else {
                    // Equal timestamps resolve to the server.
                    ConflictResolution::AcceptServer
                }
            }
            ConflictPolicy::Manual => ConflictResolution::Defer,
        }
    }

    /// Converts to a stored code.
    pub fn to_code(self) -> u8 {
        match self {
            ConflictPolicy::ServerWins => 1,
            ConflictPolicy::ClientWins => 2,
            ConflictPolicy::TimestampWins => 3,
            ConflictPolicy::Manual => 4,
        }
    }

    /// Converts from a stored code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictPolicy::ServerWins),
            2 => Some(ConflictPolicy::ClientWins),
            3 => Some(ConflictPolicy::TimestampWins),
            4 => Some(ConflictPolicy::Manual),
            _ => None,
        }
    }
}

/// The action taken (or deferred) for a single conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Apply the server payload locally and complete the queue item.
    AcceptServer,
    /// Re-enqueue the local payload with a reset retry count.
    KeepClient,
    /// Leave the conflict pending for manual disposition.
    Defer,
}

/// Audit outcome recorded for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictOutcome {
    /// Awaiting resolution.
    Pending,
    /// Resolved in favour of the client payload.
    ResolvedClient,
    /// Resolved in favour of the server payload.
    ResolvedServer,
    /// Resolved with a caller-supplied payload.
    ResolvedCustom,
}

impl ConflictOutcome {
    /// Returns true if the conflict no longer needs attention.
    pub fn is_resolved(self) -> bool {
        !matches!(self, ConflictOutcome::Pending)
    }

    /// Converts to a stored code.
    pub fn to_code(self) -> u8 {
        match self {
            ConflictOutcome::Pending => 0,
            ConflictOutcome::ResolvedClient => 1,
            ConflictOutcome::ResolvedServer => 2,
            ConflictOutcome::ResolvedCustom => 3,
        }
    }

    /// Converts from a stored code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ConflictOutcome::Pending),
            1 => Some(ConflictOutcome::ResolvedClient),
            2 => Some(ConflictOutcome::ResolvedServer),
            3 => Some(ConflictOutcome::ResolvedCustom),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fixed_policies_ignore_timestamps() {
        assert_eq!(
            ConflictPolicy::ServerWins.decide(100, 1),
            ConflictResolution::AcceptServer
        );
        assert_eq!(
            ConflictPolicy::ClientWins.decide(1, 100),
            ConflictResolution::KeepClient
        );
    }

    #[test]
    fn timestamp_wins_picks_later() {
        assert_eq!(
            ConflictPolicy::TimestampWins.decide(200, 100),
            ConflictResolution::KeepClient
        );
        assert_eq!(
            ConflictPolicy::TimestampWins.decide(100, 200),
            ConflictResolution::AcceptServer
        );
    }

    #[test]
    fn timestamp_tie_goes_to_server() {
        assert_eq!(
            ConflictPolicy::TimestampWins.decide(100, 100),
            ConflictResolution::AcceptServer
        );
    }

    #[test]
    fn manual_defers() {
        assert_eq!(ConflictPolicy::Manual.decide(0, 0), ConflictResolution::Defer);
        assert!(!ConflictPolicy::Manual.auto_resolves());
        assert!(ConflictPolicy::TimestampWins.auto_resolves());
    }

    #[test]
    fn code_roundtrips() {
        for code in 1..=4 {
            let policy = ConflictPolicy::from_code(code).unwrap();
            assert_eq!(policy.to_code(), code);
        }
        assert_eq!(ConflictPolicy::from_code(0), None);

        for code in 0..=3 {
            let outcome = ConflictOutcome::from_code(code).unwrap();
            assert_eq!(outcome.to_code(), code);
        }
        assert_eq!(ConflictOutcome::from_code(9), None);
    }

    proptest! {
        #[test]
        fn timestamp_wins_is_deterministic(client in any::<i64>(), server in any::<i64>()) {
            let first = ConflictPolicy::TimestampWins.decide(client, server);
            let second = ConflictPolicy::TimestampWins.decide(client, server);
            prop_assert_eq!(first, second);
            if client <= server {
                prop_assert_eq!(first, ConflictResolution::AcceptServer);
            } else {
                prop_assert_eq!(first, ConflictResolution::KeepClient);
            }
        }
    }
}
