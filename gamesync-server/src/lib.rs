//! HTTP endpoint handlers for the gamesync sequencing service.
//!
//! Endpoints:
//!   POST /sync   → sequence pending entries, return foreign ones
//!   POST /purge  → erase one person from the ledger (signed)
//!   GET  /ping   → liveness check
//!   GET  /info   → protocol version & ledger head

use bytes::Bytes;
use gamesync_core::{
    Ledger, LedgerError, LedgerInfo, PROTOCOL_VERSION, PurgeRequest, SyncRequest,
};
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Ledger file inside the server data directory.
pub const LEDGER_FILE: &str = "ledger.log";

/// Maximum accepted request body.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Shared server state.
pub struct LedgerService {
    ledger: Mutex<Ledger>,
    secret: Option<String>,
}

impl LedgerService {
    pub fn new(ledger: Ledger, secret: Option<String>) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            secret,
        }
    }

    /// Open the file-backed ledger under `data_dir`.
    pub fn open(data_dir: &Path, secret: Option<String>) -> Result<Self, LedgerError> {
        let ledger = Ledger::open(&data_dir.join(LEDGER_FILE))?;
        Ok(Self::new(ledger, secret))
    }

    pub async fn info(&self) -> LedgerInfo {
        let ledger = self.ledger.lock().await;
        LedgerInfo {
            protocol_version: PROTOCOL_VERSION,
            head_seq: ledger.head_seq(),
            installations: ledger.installations(),
        }
    }
}

// ─────────────────────────────────────────────────────
// Public dispatch
// ─────────────────────────────────────────────────────

/// Route a request to the appropriate handler.
pub async fn handle_request(
    path: &str,
    method: &str,
    body: &[u8],
    service: &LedgerService,
) -> Response<Full<Bytes>> {
    match (method, path) {
        ("POST", "/sync") => handle_sync(service, body).await,
        ("POST", "/purge") => handle_purge(service, body).await,
        ("GET", "/ping") => text_ok("pong"),
        ("GET", "/info") => json_ok(&service.info().await),
        _ => json_error(404, &format!("Unknown endpoint: {} {}", method, path)),
    }
}

// ─────────────────────────────────────────────────────
// POST /sync
// ─────────────────────────────────────────────────────

async fn handle_sync(service: &LedgerService, body: &[u8]) -> Response<Full<Bytes>> {
    let request: SyncRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return json_error(400, &format!("Invalid sync request: {}", e)),
    };
    if request.protocol_version != PROTOCOL_VERSION {
        return json_error(
            400,
            &format!(
                "Unsupported protocol version {} (server speaks {})",
                request.protocol_version, PROTOCOL_VERSION
            ),
        );
    }

    let result = service.ledger.lock().await.exchange(&request);
    match result {
        Ok(response) => json_ok(&response),
        Err(e) => ledger_error(e),
    }
}

// ─────────────────────────────────────────────────────
// POST /purge
// ─────────────────────────────────────────────────────

async fn handle_purge(service: &LedgerService, body: &[u8]) -> Response<Full<Bytes>> {
    let Some(secret) = service.secret.as_deref() else {
        return json_error(403, "Purge is disabled (no secret configured)");
    };
    let request: PurgeRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return json_error(400, &format!("Invalid purge request: {}", e)),
    };

    let result = service.ledger.lock().await.purge(&request, secret);
    match result {
        Ok(response) => {
            info!(
                "Purge of {} rewrote {} entries",
                response.handle, response.entries_rewritten
            );
            json_ok(&response)
        }
        Err(e) => ledger_error(e),
    }
}

fn ledger_error(err: LedgerError) -> Response<Full<Bytes>> {
    let status = match &err {
        LedgerError::BadSignature => 401,
        LedgerError::NonceReused => 409,
        LedgerError::Journal(_) => 500,
        _ => 400,
    };
    warn!("Request rejected ({}): {}", status, err);
    json_error(status, &err.to_string())
}

// ─────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────

fn respond(status: u16, content_type: &'static str, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text_ok(text: &str) -> Response<Full<Bytes>> {
    respond(200, "text/plain", text.as_bytes().to_vec())
}

pub fn json_ok<T: serde::Serialize>(data: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(data).unwrap_or_default();
    respond(200, "application/json", body)
}

pub fn json_error(status: u16, message: &str) -> Response<Full<Bytes>> {
    #[derive(serde::Serialize)]
    struct ErrorBody {
        error: String,
    }
    let body = serde_json::to_vec(&ErrorBody {
        error: message.to_string(),
    })
    .unwrap_or_default();
    respond(status, "application/json", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_status() {
        let resp = json_error(409, "nonce");
        assert_eq!(resp.status(), 409);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_open_creates_nothing_until_write() {
        let tmp = tempfile::TempDir::new().unwrap();
        let service = LedgerService::open(tmp.path(), None).unwrap();
        assert!(service.secret.is_none());
        assert!(!tmp.path().join(LEDGER_FILE).exists());
    }
}
