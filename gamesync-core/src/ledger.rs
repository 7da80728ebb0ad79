//! Canonical ledger kept by the sequencing service.
//!
//! The ledger assigns consecutive cloud sequence numbers starting at 1 and
//! serves every entry above a client's high watermark. A resubmitted entry
//! (same installation id and local sequence) gets its original number back,
//! so a lost response never duplicates work. Purging a person rewrites the
//! ledger in place.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::entry::JournalEntry;
use crate::error::{EntryError, JournalError};
use crate::model::DELETED_HANDLE;
use crate::protocol::{PurgeRequest, PurgeResponse, SyncRequest, SyncResponse, WireEntry};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Malformed entry #{index}: {source}")]
    Malformed { index: usize, source: EntryError },

    #[error("Entry #{index} belongs to installation {found}, not {expected}")]
    ForeignInstallation {
        index: usize,
        found: String,
        expected: String,
    },

    #[error("Invalid purge signature")]
    BadSignature,

    #[error("Nonce already used")]
    NonceReused,

    #[error("Handle {0:?} cannot be purged")]
    InvalidHandle(String),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

pub struct Ledger {
    entries: Vec<JournalEntry>,
    sequenced: HashMap<(String, u64), u64>,
    used_nonces: HashSet<String>,
    path: Option<PathBuf>,
}

impl Ledger {
    pub fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            sequenced: HashMap::new(),
            used_nonces: HashSet::new(),
            path: None,
        }
    }

    /// Open a file-backed ledger, loading existing records.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let mut ledger = Self::in_memory();
        ledger.path = Some(path.to_path_buf());
        if path.exists() {
            let content = fs::read_to_string(path).map_err(JournalError::from)?;
            for (idx, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry = JournalEntry::from_record(line).map_err(|source| JournalError::Corrupt {
                    line: idx + 1,
                    source,
                })?;
                ledger.index(&entry);
                ledger.entries.push(entry);
            }
            info!("Loaded ledger with {} entries from {:?}", ledger.entries.len(), path);
        }
        Ok(ledger)
    }

    fn index(&mut self, entry: &JournalEntry) {
        self.sequenced.insert(
            (entry.installation_id.clone(), entry.local_seq),
            entry.cloud_seq,
        );
    }

    pub fn head_seq(&self) -> u64 {
        self.entries.last().map(|e| e.cloud_seq).unwrap_or(0)
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn installations(&self) -> usize {
        self.sequenced
            .keys()
            .map(|(inst, _)| inst.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Sequence the submitted entries and return everything the client has
    /// not seen yet.
    pub fn exchange(&mut self, request: &SyncRequest) -> Result<SyncResponse, LedgerError> {
        let mut decoded = Vec::with_capacity(request.entries.len());
        for (index, wire) in request.entries.iter().enumerate() {
            let entry = wire
                .decode()
                .map_err(|source| LedgerError::Malformed { index, source })?;
            if entry.installation_id != request.installation_id {
                return Err(LedgerError::ForeignInstallation {
                    index,
                    found: entry.installation_id,
                    expected: request.installation_id.clone(),
                });
            }
            decoded.push(entry);
        }

        let mut assigned = Vec::with_capacity(decoded.len());
        let mut fresh = Vec::new();
        let mut next = self.head_seq() + 1;
        for mut entry in decoded {
            let key = (entry.installation_id.clone(), entry.local_seq);
            let seq = match self.sequenced.get(&key) {
                Some(seq) => *seq,
                None => match fresh.iter().find(|e: &&JournalEntry| {
                    e.installation_id == key.0 && e.local_seq == key.1
                }) {
                    Some(e) => e.cloud_seq,
                    None => {
                        entry.cloud_seq = next;
                        next += 1;
                        fresh.push(entry);
                        next - 1
                    }
                },
            };
            assigned.push(seq);
        }

        if !fresh.is_empty() {
            self.append(&fresh)?;
            for entry in fresh {
                self.index(&entry);
                self.entries.push(entry);
            }
        }

        let mine: HashSet<u64> = assigned.iter().copied().collect();
        let foreign = self
            .entries
            .iter()
            .filter(|e| e.cloud_seq > request.last_known_cloud_seq && !mine.contains(&e.cloud_seq))
            .map(WireEntry::from)
            .collect::<Vec<_>>();
        debug!(
            "Sync from {}: {} assigned, {} foreign above {}",
            request.installation_id,
            assigned.len(),
            foreign.len(),
            request.last_known_cloud_seq
        );
        Ok(SyncResponse { assigned, foreign })
    }

    /// Verify and execute a purge request.
    pub fn purge(&mut self, request: &PurgeRequest, secret: &str) -> Result<PurgeResponse, LedgerError> {
        if !request.verify(secret) {
            return Err(LedgerError::BadSignature);
        }
        if self.used_nonces.contains(&request.nonce) {
            return Err(LedgerError::NonceReused);
        }
        if request.handle.is_empty() || request.handle == DELETED_HANDLE {
            return Err(LedgerError::InvalidHandle(request.handle.clone()));
        }
        let rewritten = self.purge_handle(&request.handle)?;
        self.used_nonces.insert(request.nonce.clone());
        Ok(PurgeResponse {
            handle: request.handle.clone(),
            entries_rewritten: rewritten,
        })
    }

    /// Replace `handle` with the sentinel everywhere. Returns the number of
    /// rewritten entries.
    pub fn purge_handle(&mut self, handle: &str) -> Result<usize, LedgerError> {
        let mut rewritten = self.entries.clone();
        let count = rewritten
            .iter_mut()
            .map(|e| e.redact_person(handle, DELETED_HANDLE))
            .filter(|changed| *changed)
            .count();
        if count > 0 {
            self.rewrite(&rewritten)?;
            self.entries = rewritten;
            info!("Purged {} from {} ledger entries", handle, count);
        }
        Ok(count)
    }

    fn append(&self, entries: &[JournalEntry]) -> Result<(), JournalError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&entry.to_record());
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn rewrite(&self, entries: &[JournalEntry]) -> Result<(), JournalError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp_path = path.with_extension("tmp");
        let mut data = String::new();
        for entry in entries {
            data.push_str(&entry.to_record());
            data.push('\n');
        }
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
