//! Device reset and right-to-erasure flows.
//!
//! Both flows suspend sync, wait for the round in flight to finish, wipe the
//! local replica, give the device a new installation id and resume sync so
//! the store is rebuilt from the ledger. A purge additionally asks the
//! sequencing service to rewrite the ledger first.
//!
//! If the in-flight round never finishes, the flow fails with
//! [`EraseError::DrainTimeout`] and sync stays suspended; the app has to be
//! restarted. Any later failure resumes sync on whatever replica is left.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::coordinator::SyncControl;
use crate::error::{EraseError, TransportError};
use crate::prefs::{self, Preferences};
use crate::protocol::{PurgeRequest, PurgeResponse};
use crate::replica::ReplicaHandle;
use crate::transport::LedgerTransport;

/// Bounded wait for in-flight sync work.
#[derive(Debug, Clone, Copy)]
pub struct DrainPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl From<&crate::config::EngineConfig> for DrainPolicy {
    fn from(config: &crate::config::EngineConfig) -> Self {
        Self {
            attempts: config.drain_attempts,
            interval: config.drain_interval(),
        }
    }
}

pub struct Eraser {
    replica: ReplicaHandle,
    control: Arc<SyncControl>,
    transport: Arc<dyn LedgerTransport>,
    data_dir: PathBuf,
    drain: DrainPolicy,
    secret: Option<String>,
}

impl Eraser {
    pub fn new(
        replica: ReplicaHandle,
        control: Arc<SyncControl>,
        transport: Arc<dyn LedgerTransport>,
        data_dir: PathBuf,
        drain: DrainPolicy,
        secret: Option<String>,
    ) -> Self {
        Self {
            replica,
            control,
            transport,
            data_dir,
            drain,
            secret,
        }
    }

    /// Suspend sync and wait until no round is in flight.
    async fn suspend_and_drain(&self) -> Result<(), EraseError> {
        self.control.suspend();
        for _ in 0..self.drain.attempts {
            if !self.control.is_busy() {
                return Ok(());
            }
            tokio::time::sleep(self.drain.interval).await;
        }
        if !self.control.is_busy() {
            return Ok(());
        }
        error!(
            "Sync still busy after {} drain attempts; leaving sync suspended",
            self.drain.attempts
        );
        Err(EraseError::DrainTimeout {
            attempts: self.drain.attempts,
        })
    }

    /// Wipe the replica under a fresh installation id, then resume sync
    /// whether or not the wipe went through.
    async fn wipe_and_resume(&self, forget: Option<&str>) -> Result<String, EraseError> {
        let result = self.wipe(forget).await;
        self.control.resume();
        if let Err(e) = &result {
            error!("Local wipe failed; sync resumed on the previous replica: {}", e);
        }
        result
    }

    async fn wipe(&self, forget: Option<&str>) -> Result<String, EraseError> {
        if let Some(handle) = forget {
            let mut preferences = Preferences::load(&self.data_dir)?;
            if preferences.remembered_handle.as_deref() == Some(handle) {
                preferences.remembered_handle = None;
                preferences.save(&self.data_dir)?;
            }
        }
        let installation_id = prefs::new_installation_id();
        let id = installation_id.clone();
        self.replica
            .with(move |r| r.wipe_and_reseed(&id))
            .await??;
        // Persisted only once the journal belongs to the new id.
        prefs::save_installation_id(&self.data_dir, &installation_id)?;
        Ok(installation_id)
    }

    /// Discard everything on this device and rebuild it from the ledger.
    pub async fn reset(&self) -> Result<String, EraseError> {
        self.suspend_and_drain().await?;
        let installation_id = self.wipe_and_resume(None).await?;
        info!("Device reset; new installation id {}", installation_id);
        Ok(installation_id)
    }

    /// Erase `handle` from the ledger, then reset this device.
    pub async fn purge(&self, handle: &str) -> Result<PurgeResponse, EraseError> {
        let Some(secret) = self.secret.as_deref() else {
            return Err(EraseError::MissingSecret);
        };
        self.suspend_and_drain().await?;

        if let Err(e) = self.transport.ping().await {
            warn!("Purge of {} aborted, service unreachable: {}", handle, e);
            self.control.resume();
            return Err(EraseError::Offline(e));
        }
        let request = PurgeRequest::signed(handle, secret);
        let response = match self.transport.purge(&request).await {
            Ok(response) => response,
            Err(TransportError::Rejected(reason)) => {
                self.control.resume();
                return Err(EraseError::Rejected(reason));
            }
            Err(e) => {
                self.control.resume();
                return Err(EraseError::Offline(e));
            }
        };

        let installation_id = self.wipe_and_resume(Some(handle)).await?;
        info!(
            "Purged {} ({} ledger entries rewritten); new installation id {}",
            handle, response.entries_rewritten, installation_id
        );
        Ok(response)
    }
}
