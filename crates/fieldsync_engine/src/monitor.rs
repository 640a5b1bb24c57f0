//! Network connectivity monitoring.
//!
//! The monitor is a level, not an edge: platform integrations (reachability
//! callbacks, netlink, polling) report the current state and subscribers
//! observe transitions through a watch channel.

use tokio::sync::watch;

/// Publishes online/offline state to any number of subscribers.
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Reports the current connectivity state. Subscribers are only woken
    /// when the state actually changes.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "network state changed");
        }
    }

    /// The current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Waits until the channel reports online. Returns false if the monitor was
/// dropped first.
pub async fn wait_for_online(rx: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *rx.borrow_and_update() {
            return true;
        }
        if rx.changed().await.is_err() {
            return false;
        }
    }
}
