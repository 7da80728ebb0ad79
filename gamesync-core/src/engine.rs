//! Wiring of one device: replica task, debouncer, sync coordinator and
//! erasure flows over a single data directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::activity::{ActivityLog, ActivitySink};
use crate::config::EngineConfig;
use crate::coordinator::{SyncControl, SyncCoordinator, SyncTiming};
use crate::erasure::{DrainPolicy, Eraser};
use crate::journal::LogFiles;
use crate::notify::Notifier;
use crate::prefs;
use crate::replica::{Replica, ReplicaHandle};
use crate::transport::{HttpLedgerClient, LedgerTransport};

pub struct Engine {
    data_dir: PathBuf,
    config: EngineConfig,
    notifier: Notifier,
    replica: ReplicaHandle,
    coordinator: SyncCoordinator,
    eraser: Eraser,
}

impl Engine {
    /// Open a device using the HTTP transport configured in its data
    /// directory.
    pub async fn open(data_dir: &Path, catalog: Vec<String>) -> Result<Self> {
        let config = EngineConfig::load(data_dir)?;
        let transport = HttpLedgerClient::new(&config.server_url, config.request_timeout())
            .with_context(|| format!("Failed to set up client for {}", config.server_url))?;
        Self::start(data_dir, catalog, config, Arc::new(transport)).await
    }

    /// Open a device over an arbitrary transport. The sync loop is not
    /// started; see [`Engine::spawn_sync`].
    pub async fn start(
        data_dir: &Path,
        catalog: Vec<String>,
        config: EngineConfig,
        transport: Arc<dyn LedgerTransport>,
    ) -> Result<Self> {
        let installation_id = prefs::resolve_installation_id(data_dir)?;
        let files = LogFiles::shared(data_dir);
        let activity: Arc<dyn ActivitySink> =
            Arc::new(ActivityLog::new(files.clone(), config.rotation_policy()));
        let (notifier, debouncer) = Notifier::new(config.refresh_debounce());
        tokio::spawn(debouncer.run());

        let control = SyncControl::new();
        let replica = Replica::open(
            files,
            &installation_id,
            catalog,
            notifier.clone(),
            activity,
            control.clone(),
        )
        .with_context(|| format!("Failed to open journal in {:?}", data_dir))?;
        let replica = ReplicaHandle::spawn(replica);

        let coordinator = SyncCoordinator::new(
            replica.clone(),
            transport.clone(),
            control.clone(),
            SyncTiming::from(&config),
        );
        let eraser = Eraser::new(
            replica.clone(),
            control,
            transport,
            data_dir.to_path_buf(),
            DrainPolicy::from(&config),
            config.purge_secret.clone(),
        );
        info!("Engine started for {:?} as {}", data_dir, installation_id);
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            notifier,
            replica,
            coordinator,
            eraser,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn replica(&self) -> &ReplicaHandle {
        &self.replica
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn eraser(&self) -> &Eraser {
        &self.eraser
    }

    /// Start the background sync loop.
    pub fn spawn_sync(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.coordinator.clone().run())
    }

    /// Stop the sync loop and flush the journal.
    pub async fn shutdown(&self) -> Result<()> {
        self.coordinator.control().shutdown();
        self.replica
            .with(|r| r.flush())
            .await
            .context("Replica task already stopped")??;
        Ok(())
    }
}
