//! Change notifications.
//!
//! Attribute changes of one entity are published immediately on the entity
//! channel, for observers bound to that entity. Changes to the visible
//! collection of sessions are published on the refresh channel, trailing-edge
//! debounced: triggers arriving within the window are collapsed into one
//! signal fired once the triggers stop for a full window.

use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::entry::{JournalEntry, Operation};
use crate::model::EntityType;

/// One entity whose attributes changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    pub entity_type: EntityType,
    pub entity_id: String,
}

/// Coalesced request to re-present the session collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refresh {
    /// Number of triggers folded into this signal.
    pub coalesced: usize,
}

/// Whether applying `entry` may change which sessions are visible.
pub fn affects_collection(entry: &JournalEntry) -> bool {
    match &entry.op {
        Operation::CreateSession(_)
        | Operation::CreateGamingEvent { .. }
        | Operation::UpdateGamingEvent { .. } => true,
        Operation::UpdateSession(patch) => patch.state.is_some(),
        _ => false,
    }
}

/// The entity an observer would be bound to for `entry`.
pub fn observed_entity(entry: &JournalEntry) -> EntityChange {
    match &entry.op {
        Operation::CreateSignUp(s) | Operation::DeleteSignUp(s) => EntityChange {
            entity_type: EntityType::Session,
            entity_id: s.session.clone(),
        },
        _ => EntityChange {
            entity_type: entry.entity_type(),
            entity_id: entry.entity_id.clone(),
        },
    }
}

#[derive(Clone)]
pub struct Notifier {
    requests: mpsc::UnboundedSender<()>,
    entities: broadcast::Sender<EntityChange>,
    refreshes: broadcast::Sender<Refresh>,
}

impl Notifier {
    /// Create a notifier and the debounce worker that must be spawned for
    /// refresh signals to fire.
    pub fn new(window: Duration) -> (Self, Debouncer) {
        let (requests, rx) = mpsc::unbounded_channel();
        let (entities, _) = broadcast::channel(256);
        let (refreshes, _) = broadcast::channel(16);
        let debouncer = Debouncer {
            requests: rx,
            refreshes: refreshes.clone(),
            window,
        };
        (
            Self {
                requests,
                entities,
                refreshes,
            },
            debouncer,
        )
    }

    pub fn subscribe_entities(&self) -> broadcast::Receiver<EntityChange> {
        self.entities.subscribe()
    }

    pub fn subscribe_refreshes(&self) -> broadcast::Receiver<Refresh> {
        self.refreshes.subscribe()
    }

    /// Request a collection refresh.
    pub fn trigger_refresh(&self) {
        // The debouncer only goes away at shutdown.
        let _ = self.requests.send(());
    }

    /// Route the change caused by an applied entry.
    pub fn entry_applied(&self, entry: &JournalEntry) {
        if affects_collection(entry) {
            self.trigger_refresh();
        }
        // No receivers is fine.
        let _ = self.entities.send(observed_entity(entry));
    }
}

pub struct Debouncer {
    requests: mpsc::UnboundedReceiver<()>,
    refreshes: broadcast::Sender<Refresh>,
    window: Duration,
}

impl Debouncer {
    pub async fn run(mut self) {
        while self.requests.recv().await.is_some() {
            let mut coalesced = 1;
            let closed = loop {
                match tokio::time::timeout(self.window, self.requests.recv()).await {
                    Ok(Some(())) => coalesced += 1,
                    Ok(None) => break true,
                    Err(_) => break false,
                }
            };
            debug!("Firing collection refresh ({} triggers)", coalesced);
            let _ = self.refreshes.send(Refresh { coalesced });
            if closed {
                break;
            }
        }
    }
}
