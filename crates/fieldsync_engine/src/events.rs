//! Sync progress events.
//!
//! UI layers subscribe to a feed and receive events as a cycle runs.
//! Delivery is best-effort: a subscriber that hangs up is dropped from the
//! feed on the next publish.

use fieldsync_protocol::EntityKey;
use parking_lot::Mutex;
use std::sync::mpsc::{channel, Receiver, Sender};

/// An observable moment in a sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A cycle began with this many pending queue items.
    CycleStarted {
        /// Queue items pending at cycle start.
        pending: usize,
    },
    /// Progress after a settled batch: counts are cycle running totals.
    Progress {
        /// Items acknowledged so far this cycle.
        synced: usize,
        /// Items failed so far this cycle.
        failed: usize,
    },
    /// One item failed an attempt.
    ItemFailed {
        /// Identity of the entity whose change failed.
        key: EntityKey,
        /// Failure message.
        error: String,
        /// Attempts made so far.
        retry_count: u32,
        /// True if the item will not be retried automatically.
        terminal: bool,
    },
    /// The server reported a version conflict.
    ConflictDetected {
        /// Identity of the contested entity.
        key: EntityKey,
        /// Id of the persisted conflict record.
        conflict_id: String,
        /// True if the configured policy resolved it immediately.
        auto_resolved: bool,
    },
    /// The cycle finished.
    CycleCompleted {
        /// True if the cycle ran to completion without a cycle-level error.
        success: bool,
        /// Items acknowledged this cycle.
        synced: usize,
        /// Items failed this cycle.
        failed: usize,
        /// Conflicts detected this cycle.
        conflicts: usize,
    },
    /// Connectivity changed.
    NetworkChanged {
        /// The new state.
        online: bool,
    },
}

/// Fan-out feed of [`SyncEvent`]s.
#[derive(Default)]
pub struct SyncEventFeed {
    senders: Mutex<Vec<Sender<SyncEvent>>>,
}

impl SyncEventFeed {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the feed. Events published after this call are
    /// delivered to the returned receiver.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = channel();
        self.senders.lock().push(tx);
        rx
    }

    /// Publishes an event to all live subscribers.
    pub fn publish(&self, event: SyncEvent) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_all_subscribers() {
        let feed = SyncEventFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        feed.publish(SyncEvent::CycleStarted { pending: 3 });

        assert_eq!(rx1.recv().unwrap(), SyncEvent::CycleStarted { pending: 3 });
        assert_eq!(rx2.recv().unwrap(), SyncEvent::CycleStarted { pending: 3 });
    }

    #[test]
    fn hung_up_subscribers_are_dropped() {
        let feed = SyncEventFeed::new();
        let rx = feed.subscribe();
        drop(feed.subscribe());

        feed.publish(SyncEvent::Progress {
            synced: 1,
            failed: 0,
        });
        assert_eq!(feed.subscriber_count(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn no_subscribers_is_fine() {
        let feed = SyncEventFeed::new();
        feed.publish(SyncEvent::NetworkChanged { online: true });
        assert_eq!(feed.subscriber_count(), 0);
    }
}
