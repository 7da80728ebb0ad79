//! Transports to the sequencing service.
//!
//! [`HttpLedgerClient`] talks to a `gamesync-server` over HTTP.
//! [`LocalLedgerTransport`] drives an in-process [`Ledger`] and is what the
//! tests and single-process setups use.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::ledger::{Ledger, LedgerError};
use crate::protocol::{
    LedgerInfo, PROTOCOL_VERSION, PurgeRequest, PurgeResponse, SyncRequest, SyncResponse,
};

#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// One push-then-pull round trip.
    async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), TransportError>;

    async fn purge(&self, request: &PurgeRequest) -> Result<PurgeResponse, TransportError>;

    async fn info(&self) -> Result<LedgerInfo, TransportError>;
}

/// HTTP client for a remote sequencing service.
pub struct HttpLedgerClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpLedgerClient {
    /// Create a client targeting `base_url` (e.g. `http://ledger:8480`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, TransportError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(TransportError::Rejected(format!("{} ({}): {}", what, status, body)))
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", url, e)))?;
        let resp = Self::check(resp, &format!("POST {}", path)).await?;
        resp.json()
            .await
            .map_err(|e| TransportError::Decode(format!("{} response: {}", path, e)))
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", url, e)))?;
        Self::check(resp, &format!("GET {}", path)).await
    }
}

#[async_trait]
impl LedgerTransport for HttpLedgerClient {
    async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        self.post("/sync", request).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.get("/ping").await.map(|_| ())
    }

    async fn purge(&self, request: &PurgeRequest) -> Result<PurgeResponse, TransportError> {
        self.post("/purge", request).await
    }

    async fn info(&self) -> Result<LedgerInfo, TransportError> {
        self.get("/info")
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Decode(format!("/info response: {}", e)))
    }
}

/// In-process transport over a shared [`Ledger`]. Can be switched offline to
/// simulate an unreachable service.
#[derive(Clone)]
pub struct LocalLedgerTransport {
    ledger: Arc<Mutex<Ledger>>,
    secret: Option<String>,
    online: Arc<AtomicBool>,
}

impl LocalLedgerTransport {
    pub fn new(ledger: Arc<Mutex<Ledger>>, secret: Option<String>) -> Self {
        Self {
            ledger,
            secret,
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn ledger(&self) -> &Arc<Mutex<Ledger>> {
        &self.ledger
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn reachable(&self) -> Result<(), TransportError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Connect("sequencing service offline".to_string()))
        }
    }
}

impl From<LedgerError> for TransportError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Journal(e) => TransportError::Status {
                status: 500,
                body: e.to_string(),
            },
            other => TransportError::Rejected(other.to_string()),
        }
    }
}

#[async_trait]
impl LedgerTransport for LocalLedgerTransport {
    async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        self.reachable()?;
        Ok(self.ledger.lock().await.exchange(request)?)
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.reachable()
    }

    async fn purge(&self, request: &PurgeRequest) -> Result<PurgeResponse, TransportError> {
        self.reachable()?;
        let Some(secret) = &self.secret else {
            return Err(TransportError::Rejected("purge is not enabled".to_string()));
        };
        Ok(self.ledger.lock().await.purge(request, secret)?)
    }

    async fn info(&self) -> Result<LedgerInfo, TransportError> {
        self.reachable()?;
        let ledger = self.ledger.lock().await;
        Ok(LedgerInfo {
            protocol_version: PROTOCOL_VERSION,
            head_seq: ledger.head_seq(),
            installations: ledger.installations(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_transport_offline() {
        let transport = LocalLedgerTransport::new(Arc::new(Mutex::new(Ledger::in_memory())), None);
        transport.ping().await.unwrap();
        assert_eq!(transport.info().await.unwrap().head_seq, 0);

        transport.set_online(false);
        assert!(matches!(
            transport.ping().await,
            Err(TransportError::Connect(_))
        ));
        let request = SyncRequest {
            protocol_version: PROTOCOL_VERSION,
            installation_id: "dev".to_string(),
            entries: Vec::new(),
            last_known_cloud_seq: 0,
        };
        assert!(transport.exchange(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_local_transport_purge_requires_secret() {
        let transport = LocalLedgerTransport::new(Arc::new(Mutex::new(Ledger::in_memory())), None);
        let request = PurgeRequest::signed("alice", "s");
        assert!(matches!(
            transport.purge(&request).await,
            Err(TransportError::Rejected(_))
        ));
    }

    #[test]
    fn test_http_client_trims_base_url() {
        let client = HttpLedgerClient::new("http://ledger:8480/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://ledger:8480");
    }
}
