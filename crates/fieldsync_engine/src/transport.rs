//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use fieldsync_protocol::{BatchPushRequest, BatchPushResponse, DeltaRequest, DeltaResponse};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport handles network communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, mock for testing, etc.).
pub trait SyncTransport: Send + Sync {
    /// Pushes a batch of local changes to the server.
    fn push_batch(&self, request: &BatchPushRequest) -> SyncResult<BatchPushResponse>;

    /// Pulls one page of server changes since a checkpoint.
    fn pull_delta(&self, request: &DeltaRequest) -> SyncResult<DeltaResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A mock transport for testing.
///
/// Responses are scripted per call; with no script the mock acknowledges
/// every pushed item and returns empty delta pages.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    pushed: Mutex<Vec<BatchPushRequest>>,
    push_script: Mutex<VecDeque<SyncResult<BatchPushResponse>>>,
    pull_scripts: Mutex<HashMap<String, VecDeque<SyncResult<DeltaResponse>>>>,
}

impl MockTransport {
    /// Creates a new connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            pushed: Mutex::new(Vec::new()),
            push_script: Mutex::new(VecDeque::new()),
            pull_scripts: Mutex::new(HashMap::new()),
        }
    }

    /// Queues the response for the next push.
    pub fn script_push(&self, response: SyncResult<BatchPushResponse>) {
        self.push_script.lock().push_back(response);
    }

    /// Queues the response for the next pull of `entity_type`.
    pub fn script_pull(&self, entity_type: &str, response: SyncResult<DeltaResponse>) {
        self.pull_scripts
            .lock()
            .entry(entity_type.to_string())
            .or_default()
            .push_back(response);
    }

    /// Batches pushed so far, in call order.
    pub fn pushed_batches(&self) -> Vec<BatchPushRequest> {
        self.pushed.lock().clone()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl SyncTransport for MockTransport {
    fn push_batch(&self, request: &BatchPushRequest) -> SyncResult<BatchPushResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.pushed.lock().push(request.clone());
        match self.push_script.lock().pop_front() {
            Some(response) => response,
            None => Ok(BatchPushResponse::all_success(request.items.len())),
        }
    }

    fn pull_delta(&self, request: &DeltaRequest) -> SyncResult<DeltaResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let scripted = self
            .pull_scripts
            .lock()
            .get_mut(&request.entity_type)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(response) => response,
            None => Ok(DeltaResponse::empty(request.since.clone())),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
