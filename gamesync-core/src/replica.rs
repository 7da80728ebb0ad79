//! The device replica: materialized store plus local journal, owned by a
//! single writer task.
//!
//! [`Replica`] is plain synchronous state. [`ReplicaHandle::spawn`] moves it
//! onto its own task; every caller, UI and sync coordinator alike, reaches it
//! through the handle's channel and awaits the result.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, info, warn};

use crate::activity::ActivitySink;
use crate::coordinator::SyncControl;
use crate::entry::{
    GameFields, JournalEntry, Operation, PersonFields, SessionCreate, SessionPatch, SignUpRef,
};
use crate::error::{EraseError, JournalError, SyncError, ValidationError};
use crate::journal::{JournalLog, SharedLogFiles};
use crate::model::{
    EntityType, EventType, Session, WishKey, hash_password, sanitize_identifier, sanitize_text,
    sign_up_id,
};
use crate::notify::Notifier;
use crate::protocol::SyncResponse;
use crate::replay::{self, CheckMode};
use crate::store::{SessionFilter, Store};

/// What a merge round did to the replica.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub assigned: usize,
    pub foreign: usize,
    pub reapplied: usize,
    pub advisories: usize,
}

pub struct Replica {
    store: Store,
    journal: JournalLog,
    notifier: Notifier,
    activity: Arc<dyn ActivitySink>,
    sync: Arc<SyncControl>,
    catalog: Vec<String>,
    current_user: Option<String>,
    selected_event: Option<String>,
    filter: SessionFilter,
    /// Set while the store is being rebuilt from an empty journal; advisory
    /// messages stay out of the activity log until the first merge.
    cold_start: bool,
}

impl Replica {
    /// Seed the store, then load and replay the journal found in `files`.
    pub fn open(
        files: SharedLogFiles,
        installation_id: &str,
        catalog: Vec<String>,
        notifier: Notifier,
        activity: Arc<dyn ActivitySink>,
        sync: Arc<SyncControl>,
    ) -> Result<Self, JournalError> {
        let mut store = Store::seeded(&catalog);
        let mut journal = JournalLog::new(files, installation_id);
        let had_content = journal.load_and_replay(&mut store)?;
        info!(
            "Replica {} opened ({} journal entries)",
            installation_id,
            journal.len()
        );
        Ok(Self {
            store,
            journal,
            notifier,
            activity,
            sync,
            catalog,
            current_user: None,
            selected_event: None,
            filter: SessionFilter::default(),
            cold_start: !had_content,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn journal(&self) -> &JournalLog {
        &self.journal
    }

    pub fn installation_id(&self) -> String {
        self.journal.installation_id().to_string()
    }

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }

    pub fn is_cold_start(&self) -> bool {
        self.cold_start
    }

    /// Write a user-facing line unless the store is still being rebuilt.
    pub fn report(&self, level: Level, text: &str) {
        if self.cold_start {
            debug!("Suppressed during cold start: {}", text);
        } else {
            self.activity.emit(level, text);
        }
    }

    /// Validate, apply and journal one locally-originated operation.
    fn commit(&mut self, entity_id: &str, op: Operation) -> Result<JournalEntry, ValidationError> {
        if entity_id.is_empty() {
            return Err(ValidationError::Malformed {
                field: "entityId".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        let entry = self
            .journal
            .prepare(entity_id, self.current_user.clone(), op)
            .sanitized()
            .map_err(|e| ValidationError::Malformed {
                field: entity_id.to_string(),
                reason: e.to_string(),
            })?;
        replay::apply(&mut self.store, &entry, CheckMode::Local)?;
        self.journal.add_entry(entry.clone());
        self.notifier.entry_applied(&entry);
        self.sync.request();
        Ok(entry)
    }

    // Identity

    /// Log in as `handle`. A person without a password accepts any input.
    pub fn log_in(&mut self, handle: &str, password: &str) -> Result<(), ValidationError> {
        let Some(person) = self.store.person(handle) else {
            return Err(ValidationError::UnknownReference {
                kind: EntityType::Person,
                id: handle.to_string(),
            });
        };
        if !person.is_active {
            return Err(ValidationError::InactivePerson(handle.to_string()));
        }
        if !person.password_hash.is_empty() && !person.verify_password(password) {
            return Err(ValidationError::Malformed {
                field: "password".to_string(),
                reason: "does not match".to_string(),
            });
        }
        self.current_user = Some(handle.to_string());
        if self.filter.only_person.is_some() {
            self.filter.only_person = Some(handle.to_string());
            self.notifier.trigger_refresh();
        }
        Ok(())
    }

    pub fn log_out(&mut self) {
        self.current_user = None;
    }

    pub fn create_person(&mut self, handle: &str, fields: PersonFields) -> Result<JournalEntry, ValidationError> {
        let handle = sanitize_identifier(handle);
        self.commit(&handle, Operation::CreatePerson(fields))
    }

    pub fn update_person(&mut self, handle: &str, fields: PersonFields) -> Result<JournalEntry, ValidationError> {
        self.commit(handle, Operation::UpdatePerson(fields))
    }

    pub fn set_password(&mut self, handle: &str, password: &str) -> Result<JournalEntry, ValidationError> {
        self.update_person(
            handle,
            PersonFields {
                password_hash: Some(hash_password(password)),
                ..Default::default()
            },
        )
    }

    // Catalog

    pub fn create_game(&mut self, name: &str, bgg_link: Option<String>) -> Result<JournalEntry, ValidationError> {
        self.commit(
            &sanitize_text(name),
            Operation::CreateGame(GameFields {
                bgg_link,
                is_active: None,
            }),
        )
    }

    pub fn update_game(&mut self, name: &str, fields: GameFields) -> Result<JournalEntry, ValidationError> {
        self.commit(name, Operation::UpdateGame(fields))
    }

    pub fn create_event(&mut self, name: &str, event_type: EventType) -> Result<JournalEntry, ValidationError> {
        self.commit(
            &sanitize_text(name),
            Operation::CreateGamingEvent {
                event_type,
                is_active: None,
            },
        )
    }

    pub fn set_event_active(&mut self, name: &str, active: bool) -> Result<JournalEntry, ValidationError> {
        self.commit(
            name,
            Operation::UpdateGamingEvent {
                is_active: Some(active),
            },
        )
    }

    // Sessions

    /// Propose a session as the logged-in person. Returns the new session id.
    pub fn create_session(
        &mut self,
        event: &str,
        game: &str,
        slot: u32,
        patch: SessionPatch,
    ) -> Result<String, ValidationError> {
        let Some(proposer) = self.current_user.clone() else {
            return Err(ValidationError::MissingField {
                kind: EntityType::Session,
                field: "proposer".to_string(),
            });
        };
        let id = uuid::Uuid::new_v4().to_string();
        self.create_session_with_id(&id, event, &proposer, game, slot, patch)?;
        Ok(id)
    }

    /// Propose a session under a caller-chosen id.
    pub fn create_session_with_id(
        &mut self,
        id: &str,
        event: &str,
        proposer: &str,
        game: &str,
        slot: u32,
        patch: SessionPatch,
    ) -> Result<JournalEntry, ValidationError> {
        self.commit(
            &sanitize_text(id),
            Operation::CreateSession(SessionCreate {
                event_name: event.to_string(),
                proposer: proposer.to_string(),
                to_play: game.to_string(),
                start_at: slot,
                patch,
            }),
        )
    }

    pub fn update_session(&mut self, id: &str, patch: SessionPatch) -> Result<JournalEntry, ValidationError> {
        self.commit(id, Operation::UpdateSession(patch))
    }

    /// Sign `person` up to a session. Signing up twice is a no-op and
    /// journals nothing.
    pub fn sign_up(&mut self, session: &str, person: &str) -> Result<Option<JournalEntry>, ValidationError> {
        let person = sanitize_identifier(person);
        if let Some(s) = self.store.session(session) {
            if s.is_signed_up(&person) {
                debug!("{} already signed up to session {}", person, session);
                return Ok(None);
            }
        }
        let op = Operation::CreateSignUp(SignUpRef {
            session: session.to_string(),
            person: person.clone(),
        });
        self.commit(&sign_up_id(session, &person), op).map(Some)
    }

    /// Withdraw a sign-up. Withdrawing an absent sign-up is a no-op.
    pub fn withdraw(&mut self, session: &str, person: &str) -> Result<Option<JournalEntry>, ValidationError> {
        let signed_up = self
            .store
            .session(session)
            .is_some_and(|s| s.is_signed_up(person));
        if !signed_up {
            debug!("{} is not signed up to session {}", person, session);
            return Ok(None);
        }
        let op = Operation::DeleteSignUp(SignUpRef {
            session: session.to_string(),
            person: person.to_string(),
        });
        self.commit(&sign_up_id(session, person), op).map(Some)
    }

    // Wish list

    pub fn add_wish(
        &mut self,
        person: &str,
        game: &str,
        event: &str,
        notes: Option<String>,
    ) -> Result<JournalEntry, ValidationError> {
        let key = WishKey::new(person, game, event);
        self.commit(&key.entity_id(), Operation::CreateWish { key, notes })
    }

    pub fn update_wish(&mut self, key: &WishKey, notes: Option<String>) -> Result<JournalEntry, ValidationError> {
        self.commit(
            &key.entity_id(),
            Operation::UpdateWish {
                key: key.clone(),
                notes,
            },
        )
    }

    /// Remove a wish-list item. Removing an absent item is a no-op.
    pub fn remove_wish(&mut self, key: &WishKey) -> Result<Option<JournalEntry>, ValidationError> {
        if self.store.wish(key).is_none() {
            debug!("Wish-list entry {} not present", key.entity_id());
            return Ok(None);
        }
        self.commit(&key.entity_id(), Operation::DeleteWish(key.clone()))
            .map(Some)
    }

    // Presentation state

    pub fn select_event(&mut self, name: Option<String>) {
        if self.selected_event != name {
            self.selected_event = name;
            self.notifier.trigger_refresh();
        }
    }

    pub fn selected_event(&self) -> Option<&str> {
        self.selected_event.as_deref()
    }

    pub fn set_filter(&mut self, filter: SessionFilter) {
        if self.filter != filter {
            self.filter = filter;
            self.notifier.trigger_refresh();
        }
    }

    pub fn filter(&self) -> &SessionFilter {
        &self.filter
    }

    /// Visible sessions of the selected event, one bucket per time slot.
    pub fn visible_sessions(&self) -> Vec<Vec<Session>> {
        match &self.selected_event {
            Some(event) => self.sessions_by_slot(event),
            None => Vec::new(),
        }
    }

    pub fn sessions_by_slot(&self, event: &str) -> Vec<Vec<Session>> {
        self.store
            .sessions_by_slot(event, &self.filter)
            .into_iter()
            .map(|slot| slot.into_iter().cloned().collect())
            .collect()
    }

    // Sync

    pub fn pending_entries(&self) -> Vec<JournalEntry> {
        self.journal.get_unsynced()
    }

    pub fn high_watermark(&self) -> u64 {
        self.journal.high_watermark()
    }

    /// Retry journal writes that failed earlier.
    pub fn flush(&mut self) -> Result<(), JournalError> {
        if self.journal.is_dirty() {
            self.journal.flush()?;
            debug!("Deferred journal writes flushed");
        }
        Ok(())
    }

    /// Fold the response of one sync round into the journal and the store.
    ///
    /// `submitted` holds the local sequence numbers sent, in order. Nothing
    /// changes unless the whole response is usable.
    pub fn merge_round(&mut self, submitted: &[u64], response: SyncResponse) -> Result<MergeOutcome, SyncError> {
        if response.assigned.len() != submitted.len() {
            return Err(SyncError::InconsistentResponse(format!(
                "{} sequence numbers for {} submitted entries",
                response.assigned.len(),
                submitted.len()
            )));
        }
        let foreign = response
            .foreign
            .iter()
            .map(|w| w.decode())
            .collect::<Result<Vec<_>, _>>()?;
        let first_foreign = foreign.first().map(|e| e.cloud_seq);
        let assigned: Vec<(u64, u64)> = submitted
            .iter()
            .copied()
            .zip(response.assigned.iter().copied())
            .collect();
        self.journal.commit_round(&assigned, foreign.clone())?;

        let mode = if self.cold_start {
            CheckMode::ColdStart
        } else {
            CheckMode::Foreign
        };
        let mut outcome = MergeOutcome {
            assigned: assigned.len(),
            foreign: foreign.len(),
            ..Default::default()
        };
        let mut messages = Vec::new();
        let installation_id = self.journal.installation_id().to_string();
        // Own entries that now sort after foreign ones must win again, and a
        // foreign create may only have collided with one of them. Both cases
        // are resolved by folding the journal again in replay order.
        let rebuild_from = first_foreign.filter(|&first| {
            self.journal.entries().iter().any(|e| {
                e.installation_id == installation_id && (e.cloud_seq == 0 || e.cloud_seq > first)
            })
        });

        if let Some(first) = rebuild_from {
            let mut rebuilt = Store::seeded(&self.catalog);
            let mut touched = Vec::new();
            for entry in replay::replay_order(self.journal.entries()) {
                let fresh = entry.cloud_seq == 0 || entry.cloud_seq >= first;
                let entry_mode = if fresh { mode } else { CheckMode::ColdStart };
                let Ok(applied) = replay::apply(&mut rebuilt, entry, entry_mode) else {
                    continue;
                };
                if !fresh {
                    continue;
                }
                outcome.advisories += applied.advisories.len();
                messages.extend(applied.advisories.iter().map(|a| describe(entry, a)));
                if applied.changed {
                    if entry.installation_id == installation_id {
                        outcome.reapplied += 1;
                    }
                    touched.push(entry.clone());
                }
            }
            self.store = rebuilt;
            debug!("Store rebuilt from {} journal entries", self.journal.len());
            self.notifier.trigger_refresh();
            for entry in &touched {
                self.notifier.entry_applied(entry);
            }
        } else {
            for entry in &foreign {
                if let Ok(applied) = replay::apply(&mut self.store, entry, mode) {
                    outcome.advisories += applied.advisories.len();
                    messages.extend(applied.advisories.iter().map(|a| describe(entry, a)));
                    if applied.changed {
                        self.notifier.entry_applied(entry);
                    }
                }
            }
        }

        for message in &messages {
            self.report(Level::WARN, message);
        }
        if self.cold_start && (outcome.foreign > 0 || outcome.assigned > 0) {
            info!("Initial rebuild complete ({} foreign entries)", outcome.foreign);
        }
        self.cold_start = false;
        Ok(outcome)
    }

    /// Drop the journal and the store and start over as a new installation.
    pub fn wipe_and_reseed(&mut self, installation_id: &str) -> Result<(), JournalError> {
        self.journal.discard(installation_id)?;
        self.store.clear();
        self.store.seed(&self.catalog);
        self.current_user = None;
        if self.filter.only_person.is_some() {
            self.filter.only_person = None;
        }
        self.cold_start = true;
        self.notifier.trigger_refresh();
        warn!("Replica wiped; now installation {}", installation_id);
        Ok(())
    }
}

fn describe(entry: &JournalEntry, advisory: &ValidationError) -> String {
    format!(
        "{} {} {}: {}",
        entry.operation_type(),
        entry.entity_type(),
        entry.entity_id,
        advisory
    )
}

type Job = Box<dyn FnOnce(&mut Replica) + Send>;

/// Cloneable handle to a replica running on its own task.
#[derive(Clone)]
pub struct ReplicaHandle {
    jobs: mpsc::UnboundedSender<Job>,
}

/// The replica task is gone.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("Replica task has shut down")]
pub struct ReplicaClosed;

impl From<ReplicaClosed> for SyncError {
    fn from(_: ReplicaClosed) -> Self {
        SyncError::ReplicaClosed
    }
}

impl From<ReplicaClosed> for EraseError {
    fn from(_: ReplicaClosed) -> Self {
        EraseError::ReplicaClosed
    }
}

impl ReplicaHandle {
    /// Move `replica` onto a new task. The task ends when every handle is
    /// dropped.
    pub fn spawn(replica: Replica) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            let mut replica = replica;
            while let Some(job) = rx.recv().await {
                job(&mut replica);
            }
            if let Err(e) = replica.flush() {
                warn!("Final journal flush failed: {}", e);
            }
            debug!("Replica task finished");
        });
        Self { jobs }
    }

    /// Run `f` on the replica task and return its result.
    pub async fn with<F, R>(&self, f: F) -> Result<R, ReplicaClosed>
    where
        F: FnOnce(&mut Replica) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Box::new(move |replica| {
                let _ = reply.send(f(replica));
            }))
            .map_err(|_| ReplicaClosed)?;
        rx.await.map_err(|_| ReplicaClosed)
    }
}
