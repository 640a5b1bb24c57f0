//! Conflict detection bookkeeping and resolution.
//!
//! Every conflict the server reports gets a persisted record, including the
//! ones a policy resolves on the spot, so support can always answer "what
//! happened to this entity". Only `Manual`-policy conflicts wait for an
//! explicit resolution call.

use crate::error::{SyncError, SyncResult};
use fieldsync_protocol::{
    ConflictOutcome, ConflictPolicy, ConflictResolution, PushOutcome,
};
use fieldsync_store::{EntityStore, NewConflict, PutOptions, QueueItem};
use std::sync::Arc;

/// Applies conflict policies and manual resolutions against the store.
pub struct ConflictResolver {
    store: Arc<EntityStore>,
}

/// What [`ConflictResolver::on_push_conflict`] did with a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDisposition {
    /// Id of the persisted conflict record.
    pub conflict_id: String,
    /// True if the policy resolved the conflict without operator input.
    pub auto_resolved: bool,
}

impl ConflictResolver {
    /// Creates a resolver over the given store.
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self { store }
    }

    /// Handles a version conflict the server reported for an in-flight item.
    ///
    /// Records the conflict, then applies the policy decision:
    /// - accept server: the server payload overwrites the local entity and
    ///   the queue item completes;
    /// - keep client: the item is requeued with a fresh retry budget and
    ///   pushed again next cycle;
    /// - defer: the item is parked as FAILED until a manual resolution.
    pub fn on_push_conflict(
        &self,
        policy: ConflictPolicy,
        item: &QueueItem,
        outcome: &PushOutcome,
    ) -> SyncResult<ConflictDisposition> {
        let server_modified_at = outcome.server_modified_at.unwrap_or(0);
        let decision = policy.decide(item.modified_at, server_modified_at);
        let recorded_outcome = match decision {
            ConflictResolution::AcceptServer => ConflictOutcome::ResolvedServer,
            ConflictResolution::KeepClient => ConflictOutcome::ResolvedClient,
            ConflictResolution::Defer => ConflictOutcome::Pending,
        };

        let conflict_id = self.store.record_conflict(NewConflict {
            key: &item.key,
            queue_item_id: Some(&item.id),
            client_payload: item.payload.as_deref(),
            server_payload: outcome.server_payload.as_deref(),
            client_modified_at: item.modified_at,
            server_modified_at,
            reason: "version mismatch on push",
            outcome: recorded_outcome,
        })?;

        tracing::info!(
            key = %item.key,
            conflict_id,
            ?policy,
            ?decision,
            "conflict detected"
        );

        match decision {
            ConflictResolution::AcceptServer => {
                self.store.accept_server_copy(
                    &item.key,
                    outcome.server_payload.as_deref(),
                    server_modified_at,
                )?;
                self.store.complete_item(&item.id)?;
            }
            ConflictResolution::KeepClient => {
                self.store.requeue_item(&item.id)?;
            }
            ConflictResolution::Defer => {
                self.store.fail_item(&item.id, "unresolved conflict")?;
            }
        }

        Ok(ConflictDisposition {
            conflict_id,
            auto_resolved: decision != ConflictResolution::Defer,
        })
    }

    /// Resolves a pending conflict by id.
    ///
    /// `custom_payload` supplies a merged payload; when set, `resolution`
    /// must be `KeepClient` and the merge is written as a fresh local edit.
    /// Returns false if the conflict was already resolved, so double calls
    /// are harmless.
    pub fn resolve(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
        custom_payload: Option<Vec<u8>>,
    ) -> SyncResult<bool> {
        let Some(record) = self.store.conflict(conflict_id)? else {
            return Err(SyncError::Store(
                fieldsync_store::StoreError::invalid_input(format!(
                    "unknown conflict {conflict_id}"
                )),
            ));
        };
        if record.outcome.is_resolved() {
            return Ok(false);
        }

        let recorded_outcome = match (resolution, &custom_payload) {
            (ConflictResolution::Defer, _) => {
                return Err(SyncError::Store(
                    fieldsync_store::StoreError::invalid_input(
                        "defer is not a resolution",
                    ),
                ));
            }
            (ConflictResolution::KeepClient, Some(payload)) => {
                // A merged payload becomes a new local edit; enqueueing it
                // coalesces into the parked item and revives it.
                self.store
                    .put(&record.key, payload, &PutOptions::new())?;
                ConflictOutcome::ResolvedCustom
            }
            (ConflictResolution::KeepClient, None) => {
                if let Some(item_id) = &record.queue_item_id {
                    self.store.requeue_item(item_id)?;
                }
                ConflictOutcome::ResolvedClient
            }
            (ConflictResolution::AcceptServer, _) => {
                self.store.accept_server_copy(
                    &record.key,
                    record.server_payload.as_deref(),
                    record.server_modified_at,
                )?;
                if let Some(item_id) = &record.queue_item_id {
                    self.store.complete_item(item_id)?;
                }
                ConflictOutcome::ResolvedServer
            }
        };

        let resolved = self
            .store
            .mark_conflict_resolved(conflict_id, recorded_outcome)?;
        tracing::info!(conflict_id, ?recorded_outcome, "conflict resolved");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::EntityKey;
    use fieldsync_store::{QueueStatus, StoreConfig};

    fn setup() -> (Arc<EntityStore>, ConflictResolver) {
        let store = Arc::new(EntityStore::open_in_memory(StoreConfig::new()).unwrap());
        let resolver = ConflictResolver::new(store.clone());
        (store, resolver)
    }

    fn conflicted_item(store: &EntityStore) -> QueueItem {
        store
            .put(
                &EntityKey::new("shift", "s1"),
                br#"{"status":"local"}"#,
                &PutOptions::new(),
            )
            .unwrap();
        let item = store.pending_changes(1).unwrap().remove(0);
        store.mark_items_syncing(&[item.id.clone()]).unwrap();
        item
    }

    #[test]
    fn server_wins_overwrites_and_completes() {
        let (store, resolver) = setup();
        let item = conflicted_item(&store);
        let outcome = PushOutcome::conflict(Some(br#"{"status":"server"}"#.to_vec()), 900);

        let disposition = resolver
            .on_push_conflict(ConflictPolicy::ServerWins, &item, &outcome)
            .unwrap();
        assert!(disposition.auto_resolved);

        let record = store.get(&item.key).unwrap();
        assert_eq!(record.payload, br#"{"status":"server"}"#);
        assert!(record.synced);
        assert_eq!(
            store.queue_item(&item.id).unwrap().unwrap().status,
            QueueStatus::Completed
        );
        assert!(store.pending_conflicts().unwrap().is_empty());
    }

    #[test]
    fn client_wins_requeues_the_item() {
        let (store, resolver) = setup();
        let item = conflicted_item(&store);
        let outcome = PushOutcome::conflict(Some(br#"{"status":"server"}"#.to_vec()), 900);

        resolver
            .on_push_conflict(ConflictPolicy::ClientWins, &item, &outcome)
            .unwrap();

        let requeued = store.queue_item(&item.id).unwrap().unwrap();
        assert_eq!(requeued.status, QueueStatus::Pending);
        assert_eq!(requeued.retry_count, 0);
        // Local payload untouched.
        assert_eq!(store.get(&item.key).unwrap().payload, br#"{"status":"local"}"#);
    }

    #[test]
    fn timestamp_wins_consults_both_sides() {
        let (store, resolver) = setup();
        let item = conflicted_item(&store);
        // Server timestamp far in the future: server wins.
        let outcome = PushOutcome::conflict(Some(b"s".to_vec()), i64::MAX);

        resolver
            .on_push_conflict(ConflictPolicy::TimestampWins, &item, &outcome)
            .unwrap();
        assert_eq!(store.get(&item.key).unwrap().payload, b"s");
    }

    #[test]
    fn manual_policy_parks_item_and_records_pending() {
        let (store, resolver) = setup();
        let item = conflicted_item(&store);
        let outcome = PushOutcome::conflict(Some(b"s".to_vec()), 900);

        let disposition = resolver
            .on_push_conflict(ConflictPolicy::Manual, &item, &outcome)
            .unwrap();
        assert!(!disposition.auto_resolved);
        assert_eq!(
            store.queue_item(&item.id).unwrap().unwrap().status,
            QueueStatus::Failed
        );
        assert_eq!(store.pending_conflicts().unwrap().len(), 1);
    }

    #[test]
    fn manual_resolution_accept_server() {
        let (store, resolver) = setup();
        let item = conflicted_item(&store);
        let outcome = PushOutcome::conflict(Some(br#"{"status":"server"}"#.to_vec()), 900);
        let disposition = resolver
            .on_push_conflict(ConflictPolicy::Manual, &item, &outcome)
            .unwrap();

        let resolved = resolver
            .resolve(&disposition.conflict_id, ConflictResolution::AcceptServer, None)
            .unwrap();
        assert!(resolved);
        assert_eq!(store.get(&item.key).unwrap().payload, br#"{"status":"server"}"#);

        // Resolving twice is a no-op.
        let again = resolver
            .resolve(&disposition.conflict_id, ConflictResolution::KeepClient, None)
            .unwrap();
        assert!(!again);
        assert_eq!(store.get(&item.key).unwrap().payload, br#"{"status":"server"}"#);
    }

    #[test]
    fn manual_resolution_keep_client_revives_item() {
        let (store, resolver) = setup();
        let item = conflicted_item(&store);
        let outcome = PushOutcome::conflict(Some(b"s".to_vec()), 900);
        let disposition = resolver
            .on_push_conflict(ConflictPolicy::Manual, &item, &outcome)
            .unwrap();

        resolver
            .resolve(&disposition.conflict_id, ConflictResolution::KeepClient, None)
            .unwrap();
        assert_eq!(
            store.queue_item(&item.id).unwrap().unwrap().status,
            QueueStatus::Pending
        );
    }

    #[test]
    fn manual_resolution_with_merged_payload() {
        let (store, resolver) = setup();
        let item = conflicted_item(&store);
        let outcome = PushOutcome::conflict(Some(b"s".to_vec()), 900);
        let disposition = resolver
            .on_push_conflict(ConflictPolicy::Manual, &item, &outcome)
            .unwrap();

        resolver
            .resolve(
                &disposition.conflict_id,
                ConflictResolution::KeepClient,
                Some(br#"{"status":"merged"}"#.to_vec()),
            )
            .unwrap();

        assert_eq!(store.get(&item.key).unwrap().payload, br#"{"status":"merged"}"#);
        // The merge coalesced into the parked item and revived it.
        let pending = store.pending_changes(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].payload.as_deref(),
            Some(br#"{"status":"merged"}"#.as_slice())
        );

        let record = store.conflict(&disposition.conflict_id).unwrap().unwrap();
        assert_eq!(record.outcome, ConflictOutcome::ResolvedCustom);
    }

    #[test]
    fn defer_is_not_a_resolution() {
        let (store, resolver) = setup();
        let item = conflicted_item(&store);
        let outcome = PushOutcome::conflict(Some(b"s".to_vec()), 900);
        let disposition = resolver
            .on_push_conflict(ConflictPolicy::Manual, &item, &outcome)
            .unwrap();

        assert!(resolver
            .resolve(&disposition.conflict_id, ConflictResolution::Defer, None)
            .is_err());
        assert!(resolver
            .resolve("missing", ConflictResolution::AcceptServer, None)
            .is_err());
        let _ = store;
    }
}
