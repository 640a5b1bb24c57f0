//! Background sync service.
//!
//! Runs sync cycles off the caller's thread: on demand, on an
//! offline-to-online transition, and optionally on a fixed interval while
//! online. Cycles themselves are blocking SQLite work, so they run on the
//! blocking pool; the service keeps selecting while a cycle is in flight,
//! which is what lets a connectivity-loss event cancel it.

use crate::events::SyncEvent;
use crate::monitor::NetworkMonitor;
use crate::orchestrator::SyncOrchestrator;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Handle to the background sync task.
pub struct SyncService {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncService {
    /// Spawns the service. Must be called within a tokio runtime. The
    /// periodic interval, if any, comes from the orchestrator's
    /// `sync_interval` configuration.
    pub fn start(orchestrator: Arc<SyncOrchestrator>, monitor: &NetworkMonitor) -> Self {
        let interval = orchestrator.config().sync_interval;
        let trigger = Arc::new(Notify::new());
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let mut network_rx = monitor.subscribe();
        let task_trigger = trigger.clone();

        let handle = tokio::spawn(async move {
            let mut was_online = *network_rx.borrow_and_update();
            let mut ticker = interval.map(|period| {
                let mut t = tokio::time::interval(period);
                t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                t
            });
            // At most one cycle runs at a time; a request landing while one
            // is in flight runs another as soon as it finishes.
            let mut running: Option<JoinHandle<()>> = None;
            let mut rerun = false;

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    changed = network_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *network_rx.borrow_and_update();
                        orchestrator
                            .events()
                            .publish(SyncEvent::NetworkChanged { online });
                        if online && !was_online {
                            start_or_defer(&orchestrator, &mut running, &mut rerun);
                        } else if !online {
                            // Interrupts the in-flight cycle at its next
                            // batch boundary; queue state recovers on the
                            // next run.
                            orchestrator.cancel();
                            rerun = false;
                        }
                        was_online = online;
                    }
                    _ = task_trigger.notified() => {
                        if *network_rx.borrow() {
                            start_or_defer(&orchestrator, &mut running, &mut rerun);
                        } else {
                            tracing::debug!("sync requested while offline, deferred");
                        }
                    }
                    _ = tick(&mut ticker) => {
                        if *network_rx.borrow() {
                            start_or_defer(&orchestrator, &mut running, &mut rerun);
                        }
                    }
                    _ = finished(&mut running) => {
                        running = None;
                        if rerun && *network_rx.borrow() {
                            rerun = false;
                            running = Some(spawn_cycle(&orchestrator));
                        }
                    }
                }
            }
            if let Some(handle) = running {
                let _ = handle.await;
            }
            tracing::debug!("sync service stopped");
        });

        Self {
            trigger,
            shutdown,
            handle,
        }
    }

    /// Requests a sync cycle as soon as the device is online.
    pub fn request_sync(&self) {
        self.trigger.notify_one();
    }

    /// Stops the service and waits for the task to exit. A cycle already
    /// running on the blocking pool finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

fn start_or_defer(
    orchestrator: &Arc<SyncOrchestrator>,
    running: &mut Option<JoinHandle<()>>,
    rerun: &mut bool,
) {
    if running.is_none() {
        *running = Some(spawn_cycle(orchestrator));
    } else {
        *rerun = true;
    }
}

fn spawn_cycle(orchestrator: &Arc<SyncOrchestrator>) -> JoinHandle<()> {
    let orchestrator = orchestrator.clone();
    tokio::spawn(async move { run_cycle(&orchestrator).await })
}

async fn finished(running: &mut Option<JoinHandle<()>>) {
    match running {
        Some(handle) => {
            let _ = handle.await;
        }
        None => std::future::pending().await,
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_cycle(orchestrator: &Arc<SyncOrchestrator>) {
    let orchestrator = orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || orchestrator.perform_full_sync()).await;
    match result {
        Ok(Ok(report)) => {
            if !report.success {
                tracing::warn!(errors = ?report.errors, "sync cycle completed with errors");
            }
        }
        Ok(Err(err)) => tracing::warn!(%err, "sync cycle failed"),
        Err(err) => tracing::error!(%err, "sync cycle panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::error::SyncResult;
    use crate::events::SyncEventFeed;
    use crate::transport::{MockTransport, SyncTransport};
    use fieldsync_protocol::{
        BatchPushRequest, BatchPushResponse, DeltaRequest, DeltaResponse, EntityKey,
    };
    use fieldsync_store::{EntityStore, PutOptions, StoreConfig};
    use std::time::Duration;

    /// Holds every push on the wire for a fixed delay before answering.
    struct SlowTransport {
        inner: MockTransport,
        delay: Duration,
    }

    impl SyncTransport for SlowTransport {
        fn push_batch(&self, request: &BatchPushRequest) -> SyncResult<BatchPushResponse> {
            std::thread::sleep(self.delay);
            self.inner.push_batch(request)
        }

        fn pull_delta(&self, request: &DeltaRequest) -> SyncResult<DeltaResponse> {
            self.inner.pull_delta(request)
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        fn close(&self) -> SyncResult<()> {
            self.inner.close()
        }
    }

    fn orchestrator_with(
        store: Arc<EntityStore>,
        transport: Arc<dyn SyncTransport>,
        config: SyncConfig,
    ) -> Arc<SyncOrchestrator> {
        Arc::new(SyncOrchestrator::new(
            store,
            transport,
            config,
            Arc::new(SyncEventFeed::new()),
        ))
    }

    fn orchestrator(
        store: Arc<EntityStore>,
        transport: Arc<MockTransport>,
    ) -> Arc<SyncOrchestrator> {
        orchestrator_with(
            store,
            transport,
            SyncConfig::new("https://sync.example.com", "device-1"),
        )
    }

    async fn wait_for_drain(store: &EntityStore) {
        for _ in 0..200 {
            if store.queue_counts().unwrap().pending == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test]
    async fn requested_sync_runs_when_online() {
        let store = Arc::new(EntityStore::open_in_memory(StoreConfig::new()).unwrap());
        let transport = Arc::new(MockTransport::new());
        let monitor = NetworkMonitor::new(true);
        let service = SyncService::start(orchestrator(store.clone(), transport), &monitor);

        store
            .put(&EntityKey::new("shift", "s1"), b"{}", &PutOptions::new())
            .unwrap();
        service.request_sync();

        wait_for_drain(&store).await;
        service.shutdown().await;
    }

    #[tokio::test]
    async fn coming_online_triggers_a_cycle() {
        let store = Arc::new(EntityStore::open_in_memory(StoreConfig::new()).unwrap());
        let transport = Arc::new(MockTransport::new());
        let monitor = NetworkMonitor::new(false);
        let service = SyncService::start(orchestrator(store.clone(), transport), &monitor);

        store
            .put(&EntityKey::new("shift", "s1"), b"{}", &PutOptions::new())
            .unwrap();
        // Offline: nothing drains.
        service.request_sync();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.queue_counts().unwrap().pending, 1);

        monitor.set_online(true);
        wait_for_drain(&store).await;
        service.shutdown().await;
    }

    #[tokio::test]
    async fn interval_syncs_while_online() {
        let store = Arc::new(EntityStore::open_in_memory(StoreConfig::new()).unwrap());
        let transport = Arc::new(MockTransport::new());
        let monitor = NetworkMonitor::new(true);
        let config = SyncConfig::new("https://sync.example.com", "device-1")
            .with_sync_interval(Duration::from_millis(20));
        let service =
            SyncService::start(orchestrator_with(store.clone(), transport, config), &monitor);

        store
            .put(&EntityKey::new("shift", "s1"), b"{}", &PutOptions::new())
            .unwrap();
        wait_for_drain(&store).await;
        service.shutdown().await;
    }

    #[tokio::test]
    async fn going_offline_cancels_the_running_cycle() {
        let store = Arc::new(EntityStore::open_in_memory(StoreConfig::new()).unwrap());
        let transport = Arc::new(SlowTransport {
            inner: MockTransport::new(),
            delay: Duration::from_millis(300),
        });
        let config =
            SyncConfig::new("https://sync.example.com", "device-1").with_push_batch_size(1);
        let monitor = NetworkMonitor::new(true);
        let service = SyncService::start(
            orchestrator_with(store.clone(), transport.clone(), config),
            &monitor,
        );

        store
            .put(&EntityKey::new("shift", "s1"), b"{}", &PutOptions::new())
            .unwrap();
        store
            .put(&EntityKey::new("shift", "s2"), b"{}", &PutOptions::new())
            .unwrap();
        service.request_sync();

        // Cut the link while the first one-item batch is on the wire.
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.set_online(false);

        // Long enough for both batches had the cycle kept going.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(transport.inner.pushed_batches().len(), 1);
        assert_eq!(store.queue_counts().unwrap().pending, 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_clean() {
        let store = Arc::new(EntityStore::open_in_memory(StoreConfig::new()).unwrap());
        let transport = Arc::new(MockTransport::new());
        let monitor = NetworkMonitor::new(true);
        let service = SyncService::start(orchestrator(store, transport), &monitor);
        service.shutdown().await;
    }
}
