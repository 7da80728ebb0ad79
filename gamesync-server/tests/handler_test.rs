//! Endpoint behaviour of the sequencing service.

use bytes::Bytes;
use gamesync_core::{
    JournalEntry, Ledger, LedgerInfo, Operation, PROTOCOL_VERSION, PersonFields, PurgeRequest,
    PurgeResponse, SyncRequest, SyncResponse, WireEntry,
};
use gamesync_server::{LEDGER_FILE, LedgerService, handle_request};
use http_body_util::{BodyExt, Full};
use hyper::Response;
use tempfile::TempDir;

const SECRET: &str = "s3cret";

fn person(installation: &str, local_seq: u64, handle: &str) -> WireEntry {
    WireEntry::from(&JournalEntry {
        installation_id: installation.to_string(),
        local_seq,
        cloud_seq: 0,
        entity_id: handle.to_string(),
        modified_by: None,
        op: Operation::CreatePerson(PersonFields {
            full_name: Some(format!("{} full", handle)),
            ..Default::default()
        }),
    })
}

fn sync_body(installation: &str, entries: Vec<WireEntry>, last_known: u64) -> Vec<u8> {
    serde_json::to_vec(&SyncRequest {
        protocol_version: PROTOCOL_VERSION,
        installation_id: installation.to_string(),
        entries,
        last_known_cloud_seq: last_known,
    })
    .unwrap()
}

async fn body_of(response: Response<Full<Bytes>>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

#[tokio::test]
async fn test_ping_and_unknown_endpoint() {
    let service = LedgerService::new(Ledger::in_memory(), None);
    let pong = handle_request("/ping", "GET", b"", &service).await;
    assert_eq!(pong.status(), 200);
    assert_eq!(body_of(pong).await, Bytes::from_static(b"pong"));

    let missing = handle_request("/nope", "GET", b"", &service).await;
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_sync_sequences_and_returns_foreign() {
    let service = LedgerService::new(Ledger::in_memory(), None);
    let first = handle_request(
        "/sync",
        "POST",
        &sync_body("dev-a", vec![person("dev-a", 1, "alice"), person("dev-a", 2, "bob")], 0),
        &service,
    )
    .await;
    assert_eq!(first.status(), 200);
    let first: SyncResponse = serde_json::from_slice(&body_of(first).await).unwrap();
    assert_eq!(first.assigned, vec![1, 2]);
    assert!(first.foreign.is_empty());

    let second = handle_request(
        "/sync",
        "POST",
        &sync_body("dev-b", vec![person("dev-b", 1, "carol")], 0),
        &service,
    )
    .await;
    let second: SyncResponse = serde_json::from_slice(&body_of(second).await).unwrap();
    assert_eq!(second.assigned, vec![3]);
    let foreign: Vec<u64> = second.foreign.iter().map(|e| e.cloud_seq).collect();
    assert_eq!(foreign, vec![1, 2]);

    let info = handle_request("/info", "GET", b"", &service).await;
    let info: LedgerInfo = serde_json::from_slice(&body_of(info).await).unwrap();
    assert_eq!(info.head_seq, 3);
    assert_eq!(info.installations, 2);
}

#[tokio::test]
async fn test_sync_rejects_bad_requests() {
    let service = LedgerService::new(Ledger::in_memory(), None);

    let garbage = handle_request("/sync", "POST", b"{not json", &service).await;
    assert_eq!(garbage.status(), 400);

    let mut request: SyncRequest =
        serde_json::from_slice(&sync_body("dev-a", vec![], 0)).unwrap();
    request.protocol_version = PROTOCOL_VERSION + 1;
    let stale = handle_request(
        "/sync",
        "POST",
        &serde_json::to_vec(&request).unwrap(),
        &service,
    )
    .await;
    assert_eq!(stale.status(), 400);

    let smuggled = handle_request(
        "/sync",
        "POST",
        &sync_body("dev-a", vec![person("dev-b", 1, "mallory")], 0),
        &service,
    )
    .await;
    assert_eq!(smuggled.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(&body_of(smuggled).await).unwrap();
    assert!(body["error"].as_str().unwrap().contains("dev-b"));
}

#[tokio::test]
async fn test_purge_requires_secret_and_signature() {
    let disabled = LedgerService::new(Ledger::in_memory(), None);
    let request = serde_json::to_vec(&PurgeRequest::signed("alice", SECRET)).unwrap();
    let resp = handle_request("/purge", "POST", &request, &disabled).await;
    assert_eq!(resp.status(), 403);

    let service = LedgerService::new(Ledger::in_memory(), Some(SECRET.to_string()));
    let forged = serde_json::to_vec(&PurgeRequest::signed("alice", "guess")).unwrap();
    let resp = handle_request("/purge", "POST", &forged, &service).await;
    assert_eq!(resp.status(), 401);

    let resp = handle_request("/purge", "POST", &request, &service).await;
    assert_eq!(resp.status(), 200);
    let replay = handle_request("/purge", "POST", &request, &service).await;
    assert_eq!(replay.status(), 409);
}

#[tokio::test]
async fn test_purge_persists_across_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let service = LedgerService::open(tmp.path(), Some(SECRET.to_string())).unwrap();
        handle_request(
            "/sync",
            "POST",
            &sync_body("dev-a", vec![person("dev-a", 1, "alice"), person("dev-a", 2, "bob")], 0),
            &service,
        )
        .await;
        let request = serde_json::to_vec(&PurgeRequest::signed("alice", SECRET)).unwrap();
        let resp = handle_request("/purge", "POST", &request, &service).await;
        let purged: PurgeResponse = serde_json::from_slice(&body_of(resp).await).unwrap();
        assert_eq!(purged.entries_rewritten, 1);
    }

    let text = std::fs::read_to_string(tmp.path().join(LEDGER_FILE)).unwrap();
    assert!(!text.contains("alice"));
    assert!(text.contains("bob"));

    let service = LedgerService::open(tmp.path(), None).unwrap();
    let pulled = handle_request("/sync", "POST", &sync_body("dev-c", vec![], 0), &service).await;
    let pulled: SyncResponse = serde_json::from_slice(&body_of(pulled).await).unwrap();
    assert_eq!(pulled.foreign.len(), 2);
    assert_eq!(pulled.foreign[0].entity_id, "#deleted");
}
