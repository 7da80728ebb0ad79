//! Sync coordinator: one push-then-pull round trip per cycle.
//!
//! Rounds are level-triggered. Any local mutation raises the request flag
//! through [`SyncControl::request`]; however many mutations happen before
//! the worker wakes, they go out in one round. A timer also runs a round
//! every `sync_interval` to pick up foreign entries. Failed rounds leave
//! everything pending and are retried with exponential backoff.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{Level, debug, info, warn};

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::protocol::{PROTOCOL_VERSION, SyncRequest, WireEntry};
use crate::replica::{MergeOutcome, ReplicaHandle};
use crate::transport::LedgerTransport;

/// Flags shared between the coordinator, the replica and the erasure flows.
#[derive(Debug, Default)]
pub struct SyncControl {
    requested: AtomicBool,
    suspended: AtomicBool,
    busy: AtomicBool,
    shutdown: AtomicBool,
    wake: Notify,
}

impl SyncControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask for a round as soon as possible.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Clear and return the request flag.
    pub fn take_request(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Stop starting new rounds. A round already in flight finishes; see
    /// [`SyncControl::is_busy`].
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
        debug!("Sync suspended");
    }

    /// Allow rounds again and force one immediately.
    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        debug!("Sync resumed");
        self.request();
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Mark a round as started unless sync is suspended.
    fn try_begin(&self) -> Option<BusyGuard<'_>> {
        self.busy.store(true, Ordering::SeqCst);
        if self.is_suspended() {
            self.busy.store(false, Ordering::SeqCst);
            return None;
        }
        Some(BusyGuard(self))
    }
}

struct BusyGuard<'a>(&'a SyncControl);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

/// Snapshot of the sync state, for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub pending: usize,
    pub high_watermark: u64,
    pub last_error: Option<String>,
    pub rounds_completed: u64,
    pub suspended: bool,
    pub busy: bool,
}

#[derive(Debug, Default)]
struct Progress {
    last_error: Option<String>,
    rounds_completed: u64,
}

/// Timing knobs of the run loop.
#[derive(Debug, Clone, Copy)]
pub struct SyncTiming {
    pub interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl From<&EngineConfig> for SyncTiming {
    fn from(config: &EngineConfig) -> Self {
        Self {
            interval: config.sync_interval(),
            backoff_initial: config.backoff_initial(),
            backoff_max: config.backoff_max(),
        }
    }
}

impl SyncTiming {
    fn next_backoff(&self, current: Option<Duration>) -> Duration {
        match current {
            None => self.backoff_initial,
            Some(d) => (d * 2).min(self.backoff_max),
        }
    }
}

#[derive(Clone)]
pub struct SyncCoordinator {
    replica: ReplicaHandle,
    transport: Arc<dyn LedgerTransport>,
    control: Arc<SyncControl>,
    timing: SyncTiming,
    progress: Arc<Mutex<Progress>>,
}

impl SyncCoordinator {
    pub fn new(
        replica: ReplicaHandle,
        transport: Arc<dyn LedgerTransport>,
        control: Arc<SyncControl>,
        timing: SyncTiming,
    ) -> Self {
        Self {
            replica,
            transport,
            control,
            timing,
            progress: Arc::new(Mutex::new(Progress::default())),
        }
    }

    pub fn control(&self) -> &Arc<SyncControl> {
        &self.control
    }

    fn progress(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one round. Returns `None` when sync is suspended.
    pub async fn run_round(&self) -> Result<Option<MergeOutcome>, SyncError> {
        let Some(_busy) = self.control.try_begin() else {
            debug!("Sync round skipped: suspended");
            return Ok(None);
        };
        let result = self.round().await;
        let mut progress = self.progress();
        match &result {
            Ok(_) => {
                progress.rounds_completed += 1;
                progress.last_error = None;
            }
            Err(e) => progress.last_error = Some(e.to_string()),
        }
        result.map(Some)
    }

    async fn round(&self) -> Result<MergeOutcome, SyncError> {
        let (installation_id, pending, watermark) = self
            .replica
            .with(|r| (r.installation_id(), r.pending_entries(), r.high_watermark()))
            .await?;
        let submitted: Vec<u64> = pending.iter().map(|e| e.local_seq).collect();
        let request = SyncRequest {
            protocol_version: PROTOCOL_VERSION,
            installation_id,
            entries: pending.iter().map(WireEntry::from).collect(),
            last_known_cloud_seq: watermark,
        };

        let response = self.transport.exchange(&request).await?;
        let outcome = self
            .replica
            .with(move |r| r.merge_round(&submitted, response))
            .await??;
        if outcome.assigned > 0 || outcome.foreign > 0 {
            info!(
                "Sync round: {} pushed, {} pulled, {} advisories",
                outcome.assigned, outcome.foreign, outcome.advisories
            );
        }
        Ok(outcome)
    }

    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        let (pending, high_watermark) = self
            .replica
            .with(|r| (r.journal().pending_count(), r.high_watermark()))
            .await?;
        let progress = self.progress();
        Ok(SyncStatus {
            pending,
            high_watermark,
            last_error: progress.last_error.clone(),
            rounds_completed: progress.rounds_completed,
            suspended: self.control.is_suspended(),
            busy: self.control.is_busy(),
        })
    }

    /// Run rounds until [`SyncControl::shutdown`] or until the replica goes
    /// away.
    pub async fn run(self) {
        let mut backoff: Option<Duration> = None;
        loop {
            match backoff {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    tokio::select! {
                        _ = self.control.wake.notified() => {}
                        _ = tokio::time::sleep(self.timing.interval) => {}
                    }
                }
            }
            if self.control.is_shutdown() {
                break;
            }
            if self.control.is_suspended() {
                continue;
            }
            self.control.take_request();

            let flushed = self.replica.with(|r| r.flush()).await;
            match flushed {
                Err(_) => break,
                Ok(Err(e)) => warn!("Journal flush still failing: {}", e),
                Ok(Ok(())) => {}
            }

            match self.run_round().await {
                Ok(_) => backoff = None,
                Err(SyncError::ReplicaClosed) => break,
                Err(e) => {
                    let delay = self.timing.next_backoff(backoff);
                    warn!("Sync round failed, retrying in {:?}: {}", delay, e);
                    let text = format!("Sync failed: {}", e);
                    let _ = self
                        .replica
                        .with(move |r| r.report(Level::WARN, &text))
                        .await;
                    backoff = Some(delay);
                }
            }
        }
        info!("Sync coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_begin_respects_suspend() {
        let control = SyncControl::new();
        {
            let _guard = control.try_begin().unwrap();
            assert!(control.is_busy());
        }
        assert!(!control.is_busy());

        control.suspend();
        assert!(control.try_begin().is_none());
        assert!(!control.is_busy());

        control.resume();
        assert!(control.take_request());
        assert!(!control.take_request());
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let timing = SyncTiming {
            interval: Duration::from_secs(5),
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
        };
        let first = timing.next_backoff(None);
        assert_eq!(first, Duration::from_millis(100));
        let second = timing.next_backoff(Some(first));
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(timing.next_backoff(Some(second)), Duration::from_millis(350));
    }
}
