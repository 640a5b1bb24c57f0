//! Full sync cycle orchestration.
//!
//! A cycle is push-then-pull: local changes drain first so the server sees
//! our edits before we overwrite stale local copies, then each tracked type
//! pulls its outstanding delta pages. Queue state transitions are durable,
//! so a cycle interrupted anywhere resumes cleanly on the next run.

use crate::config::SyncConfig;
use crate::conflict::ConflictResolver;
use crate::delta::DeltaSyncClient;
use crate::error::{SyncError, SyncResult};
use crate::events::{SyncEvent, SyncEventFeed};
use crate::transport::SyncTransport;
use fieldsync_protocol::{BatchPushRequest, PushItem, PushOutcome};
use fieldsync_store::{EntityStore, QueueItem};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Completed items older than this are purged at the end of a cycle.
const COMPLETED_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Outcome of one full sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// True if the cycle finished without any phase-level error.
    pub success: bool,
    /// Queue items acknowledged by the server.
    pub synced: usize,
    /// Queue items that failed an attempt this cycle.
    pub failed: usize,
    /// Conflicts detected this cycle.
    pub conflicts: usize,
    /// Server changes applied locally.
    pub pulled: usize,
    /// Phase-level error messages, in occurrence order.
    pub errors: Vec<String>,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
    /// Payload bytes moved in either direction.
    pub bytes_transferred: usize,
}

/// Drives full sync cycles against one store and one transport.
pub struct SyncOrchestrator {
    store: Arc<EntityStore>,
    transport: Arc<dyn SyncTransport>,
    config: SyncConfig,
    events: Arc<SyncEventFeed>,
    resolver: ConflictResolver,
    delta: DeltaSyncClient,
    cancelled: AtomicBool,
    // Cycles never overlap: a second caller waits for the first to finish.
    cycle_lock: Mutex<()>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        store: Arc<EntityStore>,
        transport: Arc<dyn SyncTransport>,
        config: SyncConfig,
        events: Arc<SyncEventFeed>,
    ) -> Self {
        let resolver = ConflictResolver::new(store.clone());
        let delta = DeltaSyncClient::new(store.clone(), transport.clone(), config.pull_batch_size);
        Self {
            store,
            transport,
            config,
            events,
            resolver,
            delta,
            cancelled: AtomicBool::new(false),
            cycle_lock: Mutex::new(()),
        }
    }

    /// The resolver, for manual conflict resolution calls.
    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// The configuration this orchestrator runs with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The event feed this orchestrator publishes to.
    pub fn events(&self) -> &Arc<SyncEventFeed> {
        &self.events
    }

    /// Requests cancellation of the running cycle. The cycle stops at the
    /// next batch boundary; in-flight items are recovered at the next cycle
    /// start.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Runs one full push-then-pull cycle.
    ///
    /// Phase-level failures (a batch the server never answered, a pull that
    /// died mid-type) are reported in the returned [`SyncReport`] rather
    /// than as an `Err`; `Err` is reserved for not-connected, cancellation,
    /// and store corruption.
    pub fn perform_full_sync(&self) -> SyncResult<SyncReport> {
        let _cycle = self.cycle_lock.lock();
        self.cancelled.store(false, Ordering::SeqCst);

        if !self.transport.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let started = Instant::now();
        let mut report = SyncReport::default();

        // A cancelled or crashed previous cycle may have left items marked
        // in-flight.
        self.store.reset_stuck_syncing()?;

        let pending = self.store.queue_counts()?.pending;
        self.events.publish(SyncEvent::CycleStarted { pending });
        tracing::info!(pending, "sync cycle started");

        self.push_phase(&mut report)?;
        self.pull_phase(&mut report);

        if let Err(err) = self.store.purge_completed(COMPLETED_RETENTION) {
            report.errors.push(format!("purge failed: {err}"));
        }

        report.success = report.errors.is_empty();
        report.duration = started.elapsed();
        self.events.publish(SyncEvent::CycleCompleted {
            success: report.success,
            synced: report.synced,
            failed: report.failed,
            conflicts: report.conflicts,
        });
        tracing::info!(
            success = report.success,
            synced = report.synced,
            failed = report.failed,
            conflicts = report.conflicts,
            pulled = report.pulled,
            duration_ms = report.duration.as_millis() as u64,
            "sync cycle finished"
        );
        Ok(report)
    }

    fn push_phase(&self, report: &mut SyncReport) -> SyncResult<()> {
        // Items touched this cycle are not retried within it, even when a
        // conflict resolution requeues them; they wait for the next cycle.
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled);
            }

            let batch = self.next_due_batch(&attempted)?;
            if batch.is_empty() {
                return Ok(());
            }
            attempted.extend(batch.iter().map(|item| item.id.clone()));

            let ids: Vec<String> = batch.iter().map(|item| item.id.clone()).collect();
            self.store.mark_items_syncing(&ids)?;

            let request = BatchPushRequest::new(batch.iter().map(to_push_item).collect());
            report.bytes_transferred += request.payload_bytes();

            match self.transport.push_batch(&request) {
                Ok(response) if response.items.len() == batch.len() => {
                    for (item, outcome) in batch.iter().zip(response.items.iter()) {
                        self.settle_item(item, outcome, report)?;
                    }
                }
                Ok(response) => {
                    // Misaligned response: nothing can be trusted, the whole
                    // batch retries.
                    let message = format!(
                        "push response had {} outcomes for {} items",
                        response.items.len(),
                        batch.len()
                    );
                    self.fail_whole_batch(&batch, &message, true, report)?;
                    report.errors.push(message);
                    return Ok(());
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    let message = err.to_string();
                    self.fail_whole_batch(&batch, &message, retryable, report)?;
                    report.errors.push(format!("push batch failed: {message}"));
                    return Ok(());
                }
            }

            self.events.publish(SyncEvent::Progress {
                synced: report.synced,
                failed: report.failed,
            });
        }
    }

    /// Next batch of due PENDING items, skipping ones already attempted this
    /// cycle. Pages through the whole queue so a run of backoff-deferred
    /// items ahead in drain order cannot hide due items behind them.
    fn next_due_batch(&self, attempted: &HashSet<String>) -> SyncResult<Vec<QueueItem>> {
        let now = now_millis();
        let chunk = self.config.push_batch_size.max(64);
        let mut batch = Vec::with_capacity(self.config.push_batch_size);
        let mut offset = 0;
        loop {
            let candidates = self.store.pending_changes_page(chunk, offset)?;
            let fetched = candidates.len();
            for item in candidates {
                if attempted.contains(&item.id)
                    || !self
                        .config
                        .retry
                        .is_due(item.retry_count, item.last_attempt_at, now)
                {
                    continue;
                }
                batch.push(item);
                if batch.len() == self.config.push_batch_size {
                    return Ok(batch);
                }
            }
            if fetched < chunk {
                return Ok(batch);
            }
            offset += chunk;
        }
    }

    fn settle_item(
        &self,
        item: &QueueItem,
        outcome: &PushOutcome,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        if outcome.success {
            self.store.complete_item(&item.id)?;
            report.synced += 1;
            return Ok(());
        }

        if outcome.conflict {
            let disposition =
                self.resolver
                    .on_push_conflict(self.config.policy, item, outcome)?;
            report.conflicts += 1;
            self.events.publish(SyncEvent::ConflictDetected {
                key: item.key.clone(),
                conflict_id: disposition.conflict_id,
                auto_resolved: disposition.auto_resolved,
            });
            return Ok(());
        }

        let message = outcome
            .error
            .clone()
            .unwrap_or_else(|| "unspecified server error".to_string());

        if outcome.rejected {
            // Validation rejection: retrying the same bytes cannot succeed.
            self.store.fail_item(&item.id, &message)?;
            report.failed += 1;
            self.events.publish(SyncEvent::ItemFailed {
                key: item.key.clone(),
                error: message,
                retry_count: item.retry_count,
                terminal: true,
            });
            return Ok(());
        }

        self.retry_or_fail(item, &message, report)
    }

    fn retry_or_fail(
        &self,
        item: &QueueItem,
        message: &str,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let retry_count = self.store.record_item_retry(&item.id, message)?;
        let terminal = retry_count >= self.config.retry.max_attempts;
        if terminal {
            self.store
                .fail_item(&item.id, &format!("retries exhausted: {message}"))?;
        }
        report.failed += 1;
        self.events.publish(SyncEvent::ItemFailed {
            key: item.key.clone(),
            error: message.to_string(),
            retry_count,
            terminal,
        });
        Ok(())
    }

    /// Applies one failure identically to every item of a batch the server
    /// never (usably) answered.
    fn fail_whole_batch(
        &self,
        batch: &[QueueItem],
        message: &str,
        retryable: bool,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        for item in batch {
            if retryable {
                self.retry_or_fail(item, message, report)?;
            } else {
                self.store.fail_item(&item.id, message)?;
                report.failed += 1;
                self.events.publish(SyncEvent::ItemFailed {
                    key: item.key.clone(),
                    error: message.to_string(),
                    retry_count: item.retry_count,
                    terminal: true,
                });
            }
        }
        Ok(())
    }

    fn pull_phase(&self, report: &mut SyncReport) {
        if self.cancelled.load(Ordering::SeqCst) {
            report.errors.push("pull skipped: cancelled".to_string());
            return;
        }
        for entity_type in &self.config.tracked_types {
            match self.delta.pull_type(entity_type) {
                Ok(summary) => {
                    report.pulled += summary.applied;
                    report.bytes_transferred += summary.bytes;
                }
                Err(err) => {
                    tracing::warn!(entity_type, %err, "delta pull failed");
                    report.errors.push(format!("pull {entity_type}: {err}"));
                    if !err.is_retryable() {
                        continue;
                    }
                    // A dead transport will fail every remaining type too.
                    return;
                }
            }
        }
    }
}

fn to_push_item(item: &QueueItem) -> PushItem {
    PushItem {
        id: item.id.clone(),
        key: item.key.clone(),
        operation: item.operation,
        payload: item.payload.clone(),
        hash: item.hash.clone(),
        base_version: item.base_version,
        modified_at: item.modified_at,
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
