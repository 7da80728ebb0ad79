//! Device reset and person purge flows.

use async_trait::async_trait;
use gamesync_core::{
    DELETED_HANDLE, Engine, EngineConfig, EraseError, EventType, LedgerInfo, LedgerTransport,
    Ledger, LocalLedgerTransport, PersonFields, Preferences, PurgeRequest, PurgeResponse,
    SessionPatch, SyncRequest, SyncResponse, TransportError, WishKey,
};
use gamesync_core::journal::JOURNAL_FILE;
use gamesync_core::prefs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

const SECRET: &str = "purge-secret";

fn config() -> EngineConfig {
    EngineConfig {
        drain_attempts: 3,
        drain_interval_ms: 10,
        purge_secret: Some(SECRET.to_string()),
        ..Default::default()
    }
}

fn ledger() -> LocalLedgerTransport {
    LocalLedgerTransport::new(
        Arc::new(Mutex::new(Ledger::in_memory())),
        Some(SECRET.to_string()),
    )
}

async fn device(dir: &TempDir, transport: Arc<dyn LedgerTransport>, config: EngineConfig) -> Engine {
    Engine::start(dir.path(), vec!["Chess".to_string()], config, transport)
        .await
        .unwrap()
}

/// alice proposes s1, bob and alice sign up, alice keeps a wish-list item
/// and edits as herself.
async fn populate(engine: &Engine) {
    engine
        .replica()
        .with(|r| {
            r.create_person("alice", PersonFields::default())?;
            r.create_person("bob", PersonFields::default())?;
            r.create_event("Con1", EventType::Convention)?;
            r.log_in("alice", "")?;
            r.create_session_with_id("s1", "Con1", "alice", "Chess", 0, SessionPatch::default())?;
            r.sign_up("s1", "alice")?;
            r.sign_up("s1", "bob")?;
            r.add_wish("alice", "Chess", "Con1", Some("teach me".to_string()))?;
            r.update_session(
                "s1",
                SessionPatch {
                    notes: Some("table 4".to_string()),
                    ..Default::default()
                },
            )
        })
        .await
        .unwrap()
        .unwrap();
    engine.coordinator().run_round().await.unwrap();
}

#[tokio::test]
async fn test_purge_replaces_handle_everywhere() {
    let transport = ledger();
    let tmp = TempDir::new().unwrap();
    let engine = device(&tmp, Arc::new(transport.clone()), config()).await;
    populate(&engine).await;
    Preferences {
        remembered_handle: Some("alice".to_string()),
        ..Default::default()
    }
    .save(tmp.path())
    .unwrap();
    let old_id = engine.replica().with(|r| r.installation_id()).await.unwrap();

    let response = engine.eraser().purge("alice").await.unwrap();
    assert!(response.entries_rewritten > 0);
    assert!(!engine.coordinator().control().is_suspended());
    assert!(Preferences::load(tmp.path()).unwrap().remembered_handle.is_none());

    // Resume forces a round that rebuilds the store from the ledger.
    engine.coordinator().run_round().await.unwrap();
    let (store, new_id, named) = engine
        .replica()
        .with(|r| (r.store().clone(), r.installation_id(), r.journal().entries_naming("alice")))
        .await
        .unwrap();
    assert_ne!(new_id, old_id);
    assert!(named.is_empty());
    assert!(store.person("alice").is_none());
    assert!(store.person("bob").is_some());
    let session = store.session("s1").unwrap();
    assert_eq!(session.proposer, DELETED_HANDLE);
    assert_eq!(session.notes, "table 4");
    assert_eq!(session.modified_by.as_deref(), Some(DELETED_HANDLE));
    assert_eq!(
        session.sign_ups,
        vec![DELETED_HANDLE.to_string(), "bob".to_string()]
    );
    assert!(store.wish(&WishKey::new("alice", "Chess", "Con1")).is_none());
    let wish = store.wish(&WishKey::new(DELETED_HANDLE, "Chess", "Con1")).unwrap();
    assert_eq!(wish.notes, "teach me");

    let sentinel = store.person(DELETED_HANDLE).unwrap();
    assert!(sentinel.full_name.is_empty());
    assert!(!sentinel.is_active);

    let ledger = transport.ledger().lock().await;
    assert!(ledger.entries().iter().all(|e| !e.names("alice")));
}

#[tokio::test]
async fn test_repurge_is_noop_success() {
    let transport = ledger();
    let tmp = TempDir::new().unwrap();
    let engine = device(&tmp, Arc::new(transport.clone()), config()).await;
    populate(&engine).await;

    engine.eraser().purge("alice").await.unwrap();
    engine.coordinator().run_round().await.unwrap();
    let before = engine.replica().with(|r| r.store().clone()).await.unwrap();

    let again = engine.eraser().purge("alice").await.unwrap();
    assert_eq!(again.entries_rewritten, 0);
    engine.coordinator().run_round().await.unwrap();
    let after = engine.replica().with(|r| r.store().clone()).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_purge_offline_resumes_sync() {
    let transport = ledger();
    let tmp = TempDir::new().unwrap();
    let engine = device(&tmp, Arc::new(transport.clone()), config()).await;
    populate(&engine).await;

    transport.set_online(false);
    let err = engine.eraser().purge("alice").await.unwrap_err();
    assert!(matches!(err, EraseError::Offline(_)));
    assert!(!engine.coordinator().control().is_suspended());
    let kept = engine
        .replica()
        .with(|r| r.store().person("alice").is_some())
        .await
        .unwrap();
    assert!(kept);
}

#[tokio::test]
async fn test_purge_without_secret() {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        purge_secret: None,
        ..config()
    };
    let engine = device(&tmp, Arc::new(ledger()), config).await;
    assert!(matches!(
        engine.eraser().purge("alice").await,
        Err(EraseError::MissingSecret)
    ));
}

#[tokio::test]
async fn test_purge_with_wrong_secret_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        purge_secret: Some("guess".to_string()),
        ..config()
    };
    let engine = device(&tmp, Arc::new(ledger()), config).await;
    populate(&engine).await;
    assert!(matches!(
        engine.eraser().purge("alice").await,
        Err(EraseError::Rejected(_))
    ));
    assert!(!engine.coordinator().control().is_suspended());
}

#[tokio::test]
async fn test_reset_rebuilds_from_ledger() {
    let transport = ledger();
    let tmp = TempDir::new().unwrap();
    let engine = device(&tmp, Arc::new(transport.clone()), config()).await;
    populate(&engine).await;
    let before = engine.replica().with(|r| r.store().clone()).await.unwrap();

    let new_id = engine.eraser().reset().await.unwrap();
    let (cold, empty) = engine
        .replica()
        .with(|r| (r.is_cold_start(), r.journal().is_empty()))
        .await
        .unwrap();
    assert!(cold);
    assert!(empty);
    assert!(engine.coordinator().control().take_request());

    engine.coordinator().run_round().await.unwrap();
    let (after, id) = engine
        .replica()
        .with(|r| (r.store().clone(), r.installation_id()))
        .await
        .unwrap();
    assert_eq!(id, new_id);
    assert_eq!(after, before);
    assert_eq!(prefs::resolve_installation_id(tmp.path()).unwrap(), new_id);
}

#[tokio::test]
async fn test_failed_wipe_resumes_sync_and_keeps_installation() {
    let tmp = TempDir::new().unwrap();
    let engine = device(&tmp, Arc::new(ledger()), config()).await;
    populate(&engine).await;
    let old_id = engine.replica().with(|r| r.installation_id()).await.unwrap();

    // A directory where the journal file should be cannot be removed.
    let journal = tmp.path().join(JOURNAL_FILE);
    let _ = std::fs::remove_file(&journal);
    std::fs::create_dir(&journal).unwrap();

    let err = engine.eraser().reset().await.unwrap_err();
    assert!(matches!(err, EraseError::Journal(_)));
    assert!(!engine.coordinator().control().is_suspended());

    let (id, alice) = engine
        .replica()
        .with(|r| (r.installation_id(), r.store().person("alice").is_some()))
        .await
        .unwrap();
    assert_eq!(id, old_id);
    assert!(alice);
    assert_eq!(prefs::resolve_installation_id(tmp.path()).unwrap(), old_id);
}

/// Transport whose exchange never completes.
struct StuckTransport;

#[async_trait]
impl LedgerTransport for StuckTransport {
    async fn exchange(&self, _request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn purge(&self, _request: &PurgeRequest) -> Result<PurgeResponse, TransportError> {
        Err(TransportError::Rejected("unsupported".to_string()))
    }

    async fn info(&self) -> Result<LedgerInfo, TransportError> {
        Err(TransportError::Rejected("unsupported".to_string()))
    }
}

#[tokio::test]
async fn test_drain_timeout_leaves_sync_suspended() {
    let tmp = TempDir::new().unwrap();
    let engine = device(&tmp, Arc::new(StuckTransport), config()).await;
    let coordinator = engine.coordinator().clone();
    let round = tokio::spawn(async move { coordinator.run_round().await });

    for _ in 0..100 {
        if engine.coordinator().control().is_busy() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(engine.coordinator().control().is_busy());

    let err = engine.eraser().reset().await.unwrap_err();
    assert!(matches!(err, EraseError::DrainTimeout { attempts: 3 }));
    assert!(engine.coordinator().control().is_suspended());
    round.abort();
}
