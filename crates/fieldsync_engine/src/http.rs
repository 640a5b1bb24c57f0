//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so different libraries
//! (reqwest, ureq, hyper) can supply the wire; this module owns the JSON
//! bodies and endpoint layout.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use fieldsync_protocol::{BatchPushRequest, BatchPushResponse, DeltaRequest, DeltaResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
///
/// Uses JSON request/response bodies on `POST {base}/sync/push` and
/// `POST {base}/sync/delta`.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn post_json<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, endpoint);
        let response_body = self.client.post(&url, body).map_err(|e| {
            *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = Some(e.clone());
            self.connected.store(false, Ordering::SeqCst);
            SyncError::transport_retryable(e)
        })?;

        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = None;

        serde_json::from_slice(&response_body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push_batch(&self, request: &BatchPushRequest) -> SyncResult<BatchPushResponse> {
        self.post_json("/sync/push", request)
    }

    fn pull_delta(&self, request: &DeltaRequest) -> SyncResult<DeltaResponse> {
        self.post_json("/sync/delta", request)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::Checkpoint;

    struct TestClient {
        response: RwLock<Option<Vec<u8>>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                healthy: AtomicBool::new(true),
            }
        }

        fn set_response(&self, resp: Vec<u8>) {
            *self.response.write().unwrap() = Some(resp);
        }
    }

    impl HttpClient for TestClient {
        fn post(&self, _url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            self.response
                .read()
                .unwrap()
                .clone()
                .ok_or_else(|| "no response set".into())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn transport_disconnect() {
        let transport = HttpTransport::new("https://sync.example.com", TestClient::new());
        assert_eq!(transport.base_url(), "https://sync.example.com");
        assert!(transport.is_connected());

        transport.close().unwrap();
        assert!(!transport.is_connected());

        let result = transport.push_batch(&BatchPushRequest::new(vec![]));
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn unhealthy_client_reads_as_disconnected() {
        let client = TestClient::new();
        client.healthy.store(false, Ordering::SeqCst);
        let transport = HttpTransport::new("https://sync.example.com", client);
        assert!(!transport.is_connected());
    }

    #[test]
    fn pull_decodes_json_page() {
        let client = TestClient::new();
        let page = DeltaResponse::empty(Checkpoint::new("c7"));
        client.set_response(serde_json::to_vec(&page).unwrap());

        let transport = HttpTransport::new("https://sync.example.com", client);
        let request = DeltaRequest {
            entity_type: "shift".into(),
            since: Checkpoint::origin(),
            limit: 100,
        };
        let got = transport.pull_delta(&request).unwrap();
        assert_eq!(got.new_checkpoint.as_str(), "c7");
        assert!(transport.last_error().is_none());
    }

    #[test]
    fn client_failure_is_retryable_and_recorded() {
        let transport = HttpTransport::new("https://sync.example.com", TestClient::new());
        let err = transport
            .push_batch(&BatchPushRequest::new(vec![]))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("no response set"));
        // A transport-level failure drops the connection.
        assert!(!transport.is_connected());
    }

    #[test]
    fn garbage_response_is_a_protocol_error() {
        let client = TestClient::new();
        client.set_response(b"not json".to_vec());
        let transport = HttpTransport::new("https://sync.example.com", client);

        let err = transport
            .push_batch(&BatchPushRequest::new(vec![]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(!err.is_retryable());
    }
}
