//! Wire protocol between devices and the sequencing service.
//!
//! Endpoints (JSON bodies):
//!   POST /sync   SyncRequest  -> SyncResponse
//!   POST /purge  PurgeRequest -> PurgeResponse
//!   GET  /ping                -> "pong"
//!   GET  /info                -> LedgerInfo

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::entry::JournalEntry;
use crate::error::EntryError;
use crate::model::{EntityType, OperationType};

/// Current sync API protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

type HmacSha256 = Hmac<Sha256>;

/// Journal entry as carried on the wire: an untyped attribute list that is
/// validated against the schema table when decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntry {
    pub installation_id: String,
    pub local_seq: u64,
    pub cloud_seq: u64,
    pub entity_type: EntityType,
    pub operation_type: OperationType,
    pub entity_id: String,
    pub attributes: Vec<(String, String)>,
}

impl From<&JournalEntry> for WireEntry {
    fn from(entry: &JournalEntry) -> Self {
        Self {
            installation_id: entry.installation_id.clone(),
            local_seq: entry.local_seq,
            cloud_seq: entry.cloud_seq,
            entity_type: entry.entity_type(),
            operation_type: entry.operation_type(),
            entity_id: entry.entity_id.clone(),
            attributes: entry.attributes(),
        }
    }
}

impl WireEntry {
    pub fn decode(&self) -> Result<JournalEntry, EntryError> {
        JournalEntry::from_parts(
            &self.installation_id,
            self.local_seq,
            self.cloud_seq,
            self.entity_type,
            self.operation_type,
            &self.entity_id,
            &self.attributes,
        )
    }
}

/// One push-then-pull round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub protocol_version: u32,
    pub installation_id: String,
    /// Pending entries in local append order.
    pub entries: Vec<WireEntry>,
    pub last_known_cloud_seq: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Assigned cloud sequence numbers, 1:1 with the submitted entries.
    pub assigned: Vec<u64>,
    /// Entries sequenced elsewhere with cloud sequence above the request's
    /// `last_known_cloud_seq`, ascending.
    pub foreign: Vec<WireEntry>,
}

/// Privileged request to erase one person from the canonical ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeRequest {
    pub handle: String,
    pub nonce: String,
    /// Hex HMAC-SHA256 over `handle + nonce` keyed with the shared secret.
    pub signature: String,
}

fn mac_for(secret: &str, handle: &str, nonce: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(handle.as_bytes());
    mac.update(nonce.as_bytes());
    Some(mac)
}

impl PurgeRequest {
    /// Build a signed request with a fresh nonce.
    pub fn signed(handle: &str, secret: &str) -> Self {
        let nonce = uuid::Uuid::new_v4().to_string();
        let signature = mac_for(secret, handle, &nonce)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        Self {
            handle: handle.to_string(),
            nonce,
            signature,
        }
    }

    /// Constant-time check of the signature.
    pub fn verify(&self, secret: &str) -> bool {
        let Ok(expected) = hex::decode(&self.signature) else {
            return false;
        };
        match mac_for(secret, &self.handle, &self.nonce) {
            Some(mac) => mac.verify_slice(&expected).is_ok(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub handle: String,
    /// Ledger entries rewritten; 0 when the handle was already erased.
    pub entries_rewritten: usize,
}

/// Summary returned by GET /info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerInfo {
    pub protocol_version: u32,
    pub head_seq: u64,
    pub installations: usize,
}
