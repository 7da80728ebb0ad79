//! Durable local journal.
//!
//! The journal is an append-only text file, one record per entry (see
//! [`crate::entry`]). It is mirrored in memory; file writes that fail are
//! retried on the next [`JournalLog::flush`], so local mutations never fail
//! on disk errors. Pending entries are never removed: once the sequencing
//! service assigns a cloud sequence number the record is rewritten in place.
//!
//! All file access, journal and activity log alike, goes through one
//! [`LogFiles`] mutex.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::entry::{JournalEntry, Operation};
use crate::error::JournalError;
use crate::replay::{self, CheckMode};
use crate::store::Store;

pub const JOURNAL_FILE: &str = "journal.log";
pub const ACTIVITY_FILE: &str = "activity.log";

pub type Result<T> = std::result::Result<T, JournalError>;

/// Owner of the log files of one data directory.
#[derive(Debug)]
pub struct LogFiles {
    dir: PathBuf,
}

/// Shared handle; the mutex serializes every log-file access.
pub type SharedLogFiles = Arc<Mutex<LogFiles>>;

impl LogFiles {
    pub fn shared(dir: &Path) -> SharedLogFiles {
        Arc::new(Mutex::new(Self {
            dir: dir.to_path_buf(),
        }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    pub fn activity_path(&self) -> PathBuf {
        self.dir.join(ACTIVITY_FILE)
    }

    fn read_journal(&self) -> Result<Option<String>> {
        let path = self.journal_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    fn append_journal(&self, records: &[String]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())?;
        let mut buf = String::new();
        for record in records {
            buf.push_str(record);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn rewrite_journal(&self, records: &[String]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.journal_path();
        let tmp_path = path.with_extension("tmp");
        let mut data = String::new();
        for record in records {
            data.push_str(record);
            data.push('\n');
        }
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove_journal(&self) -> Result<()> {
        let path = self.journal_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

pub(crate) fn lock(files: &SharedLogFiles) -> MutexGuard<'_, LogFiles> {
    // A panic while holding the lock leaves the files as they were on disk.
    files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory mirror of the journal file.
pub struct JournalLog {
    files: SharedLogFiles,
    installation_id: String,
    entries: Vec<JournalEntry>,
    /// Number of leading entries already on disk.
    persisted: usize,
    /// Set when on-disk records must be rewritten, not just appended.
    needs_rewrite: bool,
    next_local_seq: u64,
}

impl JournalLog {
    pub fn new(files: SharedLogFiles, installation_id: &str) -> Self {
        Self {
            files,
            installation_id: installation_id.to_string(),
            entries: Vec::new(),
            persisted: 0,
            needs_rewrite: false,
            next_local_seq: 1,
        }
    }

    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load the journal file and replay it into `store`. Returns whether the
    /// file had any entries. Unreadable records are skipped with a warning.
    pub fn load_and_replay(&mut self, store: &mut Store) -> Result<bool> {
        let content = lock(&self.files).read_journal()?;
        let Some(content) = content else {
            return Ok(false);
        };

        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match JournalEntry::from_record(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    let err = JournalError::Corrupt {
                        line: idx + 1,
                        source: e,
                    };
                    warn!("Skipping journal record: {}", err);
                }
            }
        }

        self.next_local_seq = entries
            .iter()
            .filter(|e| e.installation_id == self.installation_id)
            .map(|e| e.local_seq)
            .max()
            .unwrap_or(0)
            + 1;
        self.persisted = entries.len();
        self.needs_rewrite = false;
        self.entries = entries;

        let advisories = replay::replay(store, &self.entries, CheckMode::ColdStart);
        info!(
            "Replayed {} journal entries ({} pending, {} advisories)",
            self.entries.len(),
            self.pending_count(),
            advisories
        );
        Ok(!self.entries.is_empty())
    }

    /// Build the next local entry without recording it.
    pub fn prepare(&self, entity_id: &str, modified_by: Option<String>, op: Operation) -> JournalEntry {
        JournalEntry {
            installation_id: self.installation_id.clone(),
            local_seq: self.next_local_seq,
            cloud_seq: 0,
            entity_id: entity_id.to_string(),
            modified_by,
            op,
        }
    }

    /// Record a local entry built by [`JournalLog::prepare`]. Write failures
    /// are logged and retried by the next flush.
    pub fn add_entry(&mut self, mut entry: JournalEntry) {
        entry.installation_id = self.installation_id.clone();
        entry.local_seq = self.next_local_seq;
        entry.cloud_seq = 0;
        self.next_local_seq += 1;
        self.entries.push(entry);
        if let Err(e) = self.flush() {
            warn!("Journal write deferred: {}", e);
        }
    }

    /// Pending entries (cloud sequence 0), in append order.
    pub fn get_unsynced(&self) -> Vec<JournalEntry> {
        self.entries.iter().filter(|e| !e.is_synced()).cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_synced()).count()
    }

    /// Highest cloud sequence number known locally.
    pub fn high_watermark(&self) -> u64 {
        self.entries.iter().map(|e| e.cloud_seq).max().unwrap_or(0)
    }

    fn pending_position(&self, local_seq: u64) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| {
                !e.is_synced() && e.local_seq == local_seq && e.installation_id == self.installation_id
            })
            .ok_or(JournalError::UnknownLocalSeq(local_seq))
    }

    /// Rewrite one pending entry with its assigned cloud sequence number.
    pub fn assign_cloud_seq(&mut self, local_seq: u64, cloud_seq: u64) -> Result<()> {
        self.commit_round(&[(local_seq, cloud_seq)], Vec::new())
    }

    /// Append entries that were sequenced elsewhere, in ascending order.
    pub fn append_foreign(&mut self, entries: Vec<JournalEntry>) -> Result<()> {
        self.commit_round(&[], entries)
    }

    /// Apply the journal side of a sync round: assign sequence numbers to
    /// pending entries and append foreign ones. Everything is validated
    /// before anything changes.
    pub fn commit_round(&mut self, assigned: &[(u64, u64)], foreign: Vec<JournalEntry>) -> Result<()> {
        let watermark = self.high_watermark();
        let mut positions = Vec::with_capacity(assigned.len());
        for (local_seq, cloud_seq) in assigned {
            if *cloud_seq <= watermark {
                return Err(JournalError::OutOfOrder {
                    cloud_seq: *cloud_seq,
                    watermark,
                });
            }
            positions.push(self.pending_position(*local_seq)?);
        }
        let mut last = watermark;
        for entry in &foreign {
            if entry.cloud_seq <= last {
                return Err(JournalError::OutOfOrder {
                    cloud_seq: entry.cloud_seq,
                    watermark: last,
                });
            }
            last = entry.cloud_seq;
        }

        for (pos, (_, cloud_seq)) in positions.into_iter().zip(assigned) {
            self.entries[pos].cloud_seq = *cloud_seq;
            if pos < self.persisted {
                self.needs_rewrite = true;
            }
        }
        let appended = foreign.len();
        self.entries.extend(foreign);
        debug!(
            "Journal round committed: {} assigned, {} foreign",
            assigned.len(),
            appended
        );

        if let Err(e) = self.flush() {
            warn!("Journal write deferred: {}", e);
        }
        Ok(())
    }

    /// Write everything not yet durable.
    pub fn flush(&mut self) -> Result<()> {
        let files = lock(&self.files);
        if self.needs_rewrite {
            let records: Vec<String> = self.entries.iter().map(JournalEntry::to_record).collect();
            files.rewrite_journal(&records)?;
            self.needs_rewrite = false;
        } else if self.persisted < self.entries.len() {
            let records: Vec<String> = self.entries[self.persisted..]
                .iter()
                .map(JournalEntry::to_record)
                .collect();
            files.append_journal(&records)?;
        }
        self.persisted = self.entries.len();
        Ok(())
    }

    /// Whether some entries exist only in memory.
    pub fn is_dirty(&self) -> bool {
        self.needs_rewrite || self.persisted < self.entries.len()
    }

    /// Records naming `handle` in any identifying field, as written on disk.
    pub fn entries_naming(&self, handle: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.names(handle))
            .map(JournalEntry::to_record)
            .collect()
    }

    /// Drop every entry, in memory and on disk, and start over under a new
    /// installation id.
    pub fn discard(&mut self, installation_id: &str) -> Result<()> {
        lock(&self.files).remove_journal()?;
        self.entries.clear();
        self.persisted = 0;
        self.needs_rewrite = false;
        self.next_local_seq = 1;
        self.installation_id = installation_id.to_string();
        Ok(())
    }
}
