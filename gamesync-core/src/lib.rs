//! GameSync Core Library
//!
//! Replicated journal engine for gaming events, games, persons, sessions,
//! sign-ups and wish-lists:
//! - Entity model and sanitization rules
//! - Append-only local journal with cloud sequence assignment
//! - Deterministic replay into the materialized store
//! - Push-then-pull sync against a central sequencing ledger
//! - Debounced collection-refresh notifications
//! - Device reset and right-to-erasure flows

pub mod activity;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod entry;
pub mod erasure;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod prefs;
pub mod protocol;
pub mod replay;
pub mod replica;
pub mod store;
pub mod transport;

pub use activity::{ActivityLog, ActivitySink, NullSink, RotationPolicy};
pub use config::EngineConfig;
pub use coordinator::{SyncControl, SyncCoordinator, SyncStatus, SyncTiming};
pub use engine::Engine;
pub use entry::{
    GameFields, JournalEntry, Operation, PersonFields, SessionCreate, SessionPatch, SignUpRef,
};
pub use erasure::{DrainPolicy, Eraser};
pub use error::{EntryError, EraseError, JournalError, SyncError, TransportError, ValidationError};
pub use journal::{JournalLog, LogFiles, SharedLogFiles};
pub use ledger::{Ledger, LedgerError};
pub use model::{
    DELETED_HANDLE, EntityType, EventType, Game, GamingEvent, OperationType, Person, Session,
    SessionState, WishKey, WishListItem,
};
pub use notify::{EntityChange, Notifier, Refresh};
pub use prefs::Preferences;
pub use protocol::{
    LedgerInfo, PROTOCOL_VERSION, PurgeRequest, PurgeResponse, SyncRequest, SyncResponse,
    WireEntry,
};
pub use replay::{Applied, CheckMode};
pub use replica::{MergeOutcome, Replica, ReplicaClosed, ReplicaHandle};
pub use store::{SessionFilter, Store};
pub use transport::{HttpLedgerClient, LedgerTransport, LocalLedgerTransport};
