//! Error types for the journal engine.
//!
//! Validation failures are split from I/O and transport failures: the former
//! are hard errors for locally-originated mutations, the latter are retried by
//! the sync coordinator and only ever surface as advisory messages.

use crate::model::EntityType;

/// Referential, state-machine or shape violation of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown {kind}: {id}")]
    UnknownReference { kind: EntityType, id: String },

    #[error("Duplicate {kind}: {id}")]
    DuplicateKey { kind: EntityType, id: String },

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Invalid event type: {0}")]
    InvalidEventType(String),

    #[error("Malformed value for {field}: {reason}")]
    Malformed { field: String, reason: String },

    #[error("Missing mandatory attribute {field} for {kind}")]
    MissingField { kind: EntityType, field: String },

    #[error("Person {0} is not active")]
    InactivePerson(String),

    #[error("{kind} {id} is not active")]
    InactiveEntity { kind: EntityType, id: String },

    #[error("Session {0} is not open for sign-ups")]
    SessionNotOpen(String),

    #[error("Session {0} is full")]
    SessionFull(String),

    #[error("Time slot {slot} is outside event {event} ({slots} slots)")]
    SlotOutOfRange { event: String, slot: u32, slots: u32 },

    #[error("Delete is not allowed for {0}")]
    DeleteNotAllowed(EntityType),

    #[error("Handle {0} is reserved")]
    ReservedHandle(String),
}

/// Failure to decode a journal record or a wire entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("Record has too few fields ({0})")]
    TooFewFields(usize),

    #[error("Attribute list has odd cardinality ({0})")]
    OddAttributes(usize),

    #[error("Invalid number in field {field}: {value}")]
    BadNumber { field: &'static str, value: String },

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Unknown operation type: {0}")]
    UnknownOperation(String),

    #[error("Attribute {key} is not allowed for {op}")]
    UnexpectedAttribute { key: String, op: String },

    #[error("Forbidden character in {field}: {value:?}")]
    ForbiddenCharacter { field: String, value: String },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Errors raised while reading or writing the local journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt journal record at line {line}: {source}")]
    Corrupt { line: usize, source: EntryError },

    #[error("No pending entry with local sequence {0}")]
    UnknownLocalSeq(u64),

    #[error("Cloud sequence {cloud_seq} does not extend the journal (high watermark {watermark})")]
    OutOfOrder { cloud_seq: u64, watermark: u64 },
}

/// Errors talking to the sequencing service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Errors from one sync round.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Inconsistent sync response: {0}")]
    InconsistentResponse(String),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Entry(#[from] EntryError),

    #[error("Replica task has shut down")]
    ReplicaClosed,
}

/// Errors from the erasure and reset flows.
#[derive(Debug, thiserror::Error)]
pub enum EraseError {
    #[error("Sync work did not drain after {attempts} attempts; restart required")]
    DrainTimeout { attempts: u32 },

    #[error("Sequencing service unreachable: {0}")]
    Offline(TransportError),

    #[error("Purge rejected: {0}")]
    Rejected(String),

    #[error("No purge secret configured")]
    MissingSecret,

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Setup(#[from] anyhow::Error),

    #[error("Replica task has shut down")]
    ReplicaClosed,
}
