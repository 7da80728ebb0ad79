//! Replay engine: folds journal entries into the materialized store.
//!
//! Every mutation of the store, local or foreign, goes through [`apply`].
//! Local mutations run with [`CheckMode::Local`], where referential and
//! state violations are hard failures. Foreign and cold-start replay run in
//! the lenient modes, where the same violations become advisories so that the
//! view keeps converging. Entries that cannot be folded at all (duplicate
//! creates, updates of unknown entities) are skipped in the lenient modes.

use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::entry::{JournalEntry, Operation, PersonFields, SessionCreate, SessionPatch, SignUpRef};
use crate::error::ValidationError;
use crate::model::{
    DEFAULT_SITS_MAXIMUM, DEFAULT_SITS_MINIMUM, DELETED_HANDLE, EntityType, Game, GamingEvent,
    NO_EMAIL, NO_LINK, NO_NAME, NO_NOTES, NO_PHONE, Person, Session, SessionState, WishKey,
    WishListItem, sanitize_identifier, sanitize_text,
};
use crate::store::Store;

/// Validation strength for one application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Locally-originated mutation: violations fail.
    Local,
    /// Entry received from the sequencing service: violations are advisories.
    Foreign,
    /// Startup replay of the local journal: like `Foreign`, logged quietly.
    ColdStart,
}

impl CheckMode {
    pub fn check_active(&self) -> bool {
        matches!(self, CheckMode::Local)
    }
}

/// Result of applying one entry.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Applied {
    /// Whether the store changed.
    pub changed: bool,
    /// Violations downgraded to warnings (lenient modes only).
    pub advisories: Vec<ValidationError>,
}

struct Checker<'a> {
    mode: CheckMode,
    entry: &'a JournalEntry,
    advisories: Vec<ValidationError>,
}

impl<'a> Checker<'a> {
    fn new(mode: CheckMode, entry: &'a JournalEntry) -> Self {
        Self {
            mode,
            entry,
            advisories: Vec::new(),
        }
    }

    fn advise(&mut self, err: ValidationError) {
        match self.mode {
            CheckMode::ColdStart => debug!(
                "Replay advisory on {} {} {} (cloud seq {}): {}",
                self.entry.operation_type(),
                self.entry.entity_type(),
                self.entry.entity_id,
                self.entry.cloud_seq,
                err
            ),
            _ => warn!(
                "Replay advisory on {} {} {} (cloud seq {}): {}",
                self.entry.operation_type(),
                self.entry.entity_type(),
                self.entry.entity_id,
                self.entry.cloud_seq,
                err
            ),
        }
        self.advisories.push(err);
    }

    /// A violation the entry can be applied despite, when lenient.
    fn violation(&mut self, err: ValidationError) -> Result<(), ValidationError> {
        if self.mode.check_active() {
            return Err(err);
        }
        self.advise(err);
        Ok(())
    }

    /// A violation that prevents applying the entry at all.
    fn skip(mut self, err: ValidationError) -> Result<Applied, ValidationError> {
        if self.mode.check_active() {
            return Err(err);
        }
        self.advise(err);
        Ok(self.finish(false))
    }

    fn finish(self, changed: bool) -> Applied {
        Applied {
            changed,
            advisories: self.advisories,
        }
    }

    fn person(&mut self, store: &Store, handle: &str) -> Result<(), ValidationError> {
        // Rewritten history refers to erased persons through the sentinel.
        if handle == DELETED_HANDLE && !self.mode.check_active() {
            return Ok(());
        }
        match store.person(handle) {
            None => self.violation(ValidationError::UnknownReference {
                kind: EntityType::Person,
                id: handle.to_string(),
            }),
            Some(p) if !p.is_active => self.violation(ValidationError::InactivePerson(handle.to_string())),
            Some(_) => Ok(()),
        }
    }

    fn game(&mut self, store: &Store, name: &str) -> Result<(), ValidationError> {
        match store.game(name) {
            None => self.violation(ValidationError::UnknownReference {
                kind: EntityType::Game,
                id: name.to_string(),
            }),
            Some(g) if !g.is_active => self.violation(ValidationError::InactiveEntity {
                kind: EntityType::Game,
                id: name.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn event(&mut self, store: &Store, name: &str) -> Result<(), ValidationError> {
        match store.event(name) {
            None => self.violation(ValidationError::UnknownReference {
                kind: EntityType::GamingEvent,
                id: name.to_string(),
            }),
            Some(e) if !e.is_active => self.violation(ValidationError::InactiveEntity {
                kind: EntityType::GamingEvent,
                id: name.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn sits(&mut self, minimum: u32, maximum: u32) -> Result<(), ValidationError> {
        if maximum == 0 || minimum > maximum {
            return self.violation(ValidationError::Malformed {
                field: "sitsMaximum".to_string(),
                reason: format!("minimum {} and maximum {} are inconsistent", minimum, maximum),
            });
        }
        Ok(())
    }
}

fn duplicate(kind: EntityType, id: &str) -> ValidationError {
    ValidationError::DuplicateKey {
        kind,
        id: id.to_string(),
    }
}

fn unknown(kind: EntityType, id: &str) -> ValidationError {
    ValidationError::UnknownReference {
        kind,
        id: id.to_string(),
    }
}

fn text(value: &Option<String>) -> Option<String> {
    value.as_deref().map(sanitize_text)
}

/// Apply one entry to the store.
///
/// In [`CheckMode::Local`] the store is left untouched when an error is
/// returned. The lenient modes never return an error.
pub fn apply(store: &mut Store, entry: &JournalEntry, mode: CheckMode) -> Result<Applied, ValidationError> {
    let mut check = Checker::new(mode, entry);
    let modifier = entry.modified_by.as_deref().map(sanitize_identifier);
    if let Some(m) = &modifier {
        check.person(store, m)?;
    }
    // Keys are compared in their stored, sanitized form.
    let id = match entry.entity_type() {
        EntityType::Person => sanitize_identifier(&entry.entity_id),
        _ => sanitize_text(&entry.entity_id),
    };
    let id = id.as_str();

    match &entry.op {
        Operation::CreateGamingEvent {
            event_type,
            is_active,
        } => {
            if store.events.contains_key(id) {
                return check.skip(duplicate(EntityType::GamingEvent, id));
            }
            let name = id.to_string();
            store.events.insert(
                name.clone(),
                GamingEvent {
                    name,
                    event_type: *event_type,
                    is_active: is_active.unwrap_or(true),
                    modified_by: modifier,
                },
            );
            Ok(check.finish(true))
        }
        Operation::UpdateGamingEvent { is_active } => {
            let Some(event) = store.events.get_mut(id) else {
                return check.skip(unknown(EntityType::GamingEvent, id));
            };
            if let Some(active) = is_active {
                event.is_active = *active;
            }
            event.modified_by = modifier;
            Ok(check.finish(true))
        }
        Operation::CreateGame(fields) => {
            if store.games.contains_key(id) {
                return check.skip(duplicate(EntityType::Game, id));
            }
            let name = id.to_string();
            store.games.insert(
                name.clone(),
                Game {
                    name,
                    bgg_link: text(&fields.bgg_link).unwrap_or_else(|| NO_LINK.to_string()),
                    is_active: fields.is_active.unwrap_or(true),
                    modified_by: modifier,
                },
            );
            Ok(check.finish(true))
        }
        Operation::UpdateGame(fields) => {
            let Some(game) = store.games.get_mut(id) else {
                return check.skip(unknown(EntityType::Game, id));
            };
            if let Some(link) = text(&fields.bgg_link) {
                game.bgg_link = link;
            }
            if let Some(active) = fields.is_active {
                game.is_active = active;
            }
            game.modified_by = modifier;
            Ok(check.finish(true))
        }
        Operation::CreatePerson(fields) => create_person(store, check, id, fields, modifier),
        Operation::UpdatePerson(fields) => {
            if id == DELETED_HANDLE && mode.check_active() {
                return Err(ValidationError::ReservedHandle(id.to_string()));
            }
            let Some(person) = store.persons.get_mut(id) else {
                return check.skip(unknown(EntityType::Person, id));
            };
            patch_person(person, fields);
            person.modified_by = modifier;
            Ok(check.finish(true))
        }
        Operation::CreateSession(create) => create_session(store, check, id, create, modifier),
        Operation::UpdateSession(patch) => update_session(store, check, id, patch, modifier),
        Operation::CreateSignUp(sign_up) => create_sign_up(store, check, &sanitized_sign_up(sign_up)),
        Operation::DeleteSignUp(sign_up) => {
            let sign_up = sanitized_sign_up(sign_up);
            let removed = store
                .sessions
                .get_mut(&sign_up.session)
                .and_then(|s| {
                    let pos = s.sign_ups.iter().position(|h| *h == sign_up.person)?;
                    Some(s.sign_ups.remove(pos))
                })
                .is_some();
            if !removed {
                debug!(
                    "Sign-up of {} to session {} already absent",
                    sign_up.person, sign_up.session
                );
            }
            Ok(check.finish(removed))
        }
        Operation::CreateWish { key, notes } => {
            let key = WishKey::new(&key.person, &key.game, &key.event);
            if store.wishes.contains_key(&key) {
                if key.person == DELETED_HANDLE {
                    debug!("Ignoring duplicate wish-list entry {}", key.entity_id());
                    return Ok(check.finish(false));
                }
                return check.skip(duplicate(EntityType::WishList, &key.entity_id()));
            }
            check.person(store, &key.person)?;
            check.game(store, &key.game)?;
            check.event(store, &key.event)?;
            store.wishes.insert(
                key.clone(),
                WishListItem {
                    key,
                    notes: text(notes).unwrap_or_else(|| NO_NOTES.to_string()),
                    modified_by: modifier,
                },
            );
            Ok(check.finish(true))
        }
        Operation::UpdateWish { key, notes } => {
            let key = WishKey::new(&key.person, &key.game, &key.event);
            let Some(wish) = store.wishes.get_mut(&key) else {
                return check.skip(unknown(EntityType::WishList, &key.entity_id()));
            };
            if let Some(n) = text(notes) {
                wish.notes = n;
            }
            wish.modified_by = modifier;
            Ok(check.finish(true))
        }
        Operation::DeleteWish(key) => {
            let key = WishKey::new(&key.person, &key.game, &key.event);
            let removed = store.wishes.remove(&key).is_some();
            if !removed {
                debug!("Wish-list entry {} already absent", key.entity_id());
            }
            Ok(check.finish(removed))
        }
    }
}

fn sanitized_sign_up(sign_up: &SignUpRef) -> SignUpRef {
    SignUpRef {
        session: sanitize_text(&sign_up.session),
        person: sanitize_identifier(&sign_up.person),
    }
}

fn patch_person(person: &mut Person, fields: &PersonFields) {
    if let Some(v) = text(&fields.full_name) {
        person.full_name = v;
    }
    if let Some(v) = text(&fields.phone_number) {
        person.phone_number = v;
    }
    if let Some(v) = text(&fields.email) {
        person.email = v;
    }
    if let Some(v) = text(&fields.password_hash) {
        person.password_hash = v;
    }
    if let Some(v) = fields.is_admin {
        person.is_admin = v;
    }
    if let Some(v) = fields.is_active {
        person.is_active = v;
    }
}

fn create_person(
    store: &mut Store,
    check: Checker<'_>,
    handle: &str,
    fields: &PersonFields,
    modifier: Option<String>,
) -> Result<Applied, ValidationError> {
    if handle == DELETED_HANDLE {
        if check.mode.check_active() {
            return Err(ValidationError::ReservedHandle(handle.to_string()));
        }
        // Erased persons are re-keyed onto the seeded sentinel.
        if store.persons.contains_key(handle) {
            debug!("Ignoring create of the {} sentinel", DELETED_HANDLE);
            return Ok(check.finish(false));
        }
    }
    if store.persons.contains_key(handle) {
        return check.skip(duplicate(EntityType::Person, handle));
    }
    let handle = handle.to_string();
    let mut person = Person {
        handle: handle.clone(),
        full_name: NO_NAME.to_string(),
        phone_number: NO_PHONE.to_string(),
        email: NO_EMAIL.to_string(),
        password_hash: String::new(),
        is_admin: false,
        is_active: true,
        modified_by: modifier,
    };
    patch_person(&mut person, fields);
    store.persons.insert(handle, person);
    Ok(check.finish(true))
}

fn create_session(
    store: &mut Store,
    mut check: Checker<'_>,
    id: &str,
    create: &SessionCreate,
    modifier: Option<String>,
) -> Result<Applied, ValidationError> {
    if store.sessions.contains_key(id) {
        return check.skip(duplicate(EntityType::Session, id));
    }
    let event_name = sanitize_text(&create.event_name);
    let proposer = sanitize_identifier(&create.proposer);
    let to_play = sanitize_text(&create.to_play);
    check.event(store, &event_name)?;
    check.person(store, &proposer)?;
    check.game(store, &to_play)?;
    if let Some(event) = store.event(&event_name) {
        let slots = event.event_type.slot_count();
        if create.start_at >= slots {
            check.violation(ValidationError::SlotOutOfRange {
                event: event_name.clone(),
                slot: create.start_at,
                slots,
            })?;
        }
    }
    let patch = &create.patch;
    let sits_minimum = patch.sits_minimum.unwrap_or(DEFAULT_SITS_MINIMUM);
    let sits_maximum = patch.sits_maximum.unwrap_or(DEFAULT_SITS_MAXIMUM);
    check.sits(sits_minimum, sits_maximum)?;

    let session = Session {
        id: id.to_string(),
        event_name,
        proposer,
        to_play,
        start_at: create.start_at,
        notes: text(&patch.notes).unwrap_or_else(|| NO_NOTES.to_string()),
        whatsapp_link: text(&patch.whatsapp_link).unwrap_or_else(|| NO_LINK.to_string()),
        bgg_link: text(&patch.bgg_link).unwrap_or_else(|| NO_LINK.to_string()),
        sits_minimum,
        sits_maximum,
        state: patch.state.unwrap_or(SessionState::Open),
        sign_ups: Vec::new(),
        modified_by: modifier,
    };
    store.sessions.insert(session.id.clone(), session);
    Ok(check.finish(true))
}

fn update_session(
    store: &mut Store,
    mut check: Checker<'_>,
    id: &str,
    patch: &SessionPatch,
    modifier: Option<String>,
) -> Result<Applied, ValidationError> {
    let Some(current) = store.sessions.get(id) else {
        return check.skip(unknown(EntityType::Session, id));
    };
    let sits_minimum = patch.sits_minimum.unwrap_or(current.sits_minimum);
    let sits_maximum = patch.sits_maximum.unwrap_or(current.sits_maximum);
    check.sits(sits_minimum, sits_maximum)?;

    let Some(session) = store.sessions.get_mut(id) else {
        return check.skip(unknown(EntityType::Session, id));
    };
    if let Some(v) = text(&patch.notes) {
        session.notes = v;
    }
    if let Some(v) = text(&patch.whatsapp_link) {
        session.whatsapp_link = v;
    }
    if let Some(v) = text(&patch.bgg_link) {
        session.bgg_link = v;
    }
    session.sits_minimum = sits_minimum;
    session.sits_maximum = sits_maximum;
    if let Some(state) = patch.state {
        session.state = state;
    }
    session.modified_by = modifier;
    Ok(check.finish(true))
}

fn create_sign_up(
    store: &mut Store,
    mut check: Checker<'_>,
    sign_up: &SignUpRef,
) -> Result<Applied, ValidationError> {
    let Some(session) = store.sessions.get(&sign_up.session) else {
        return check.skip(unknown(EntityType::Session, &sign_up.session));
    };
    if sign_up.person == DELETED_HANDLE && !check.mode.check_active() {
        // Several erased persons may hold seats in one session.
        if let Some(session) = store.sessions.get_mut(&sign_up.session) {
            session.sign_ups.push(DELETED_HANDLE.to_string());
        }
        return Ok(check.finish(true));
    }
    if session.is_signed_up(&sign_up.person) {
        if !check.mode.check_active() {
            debug!(
                "Ignoring duplicate sign-up of {} to session {}",
                sign_up.person, sign_up.session
            );
            return Ok(check.finish(false));
        }
        return Err(duplicate(
            EntityType::SignUp,
            &crate::model::sign_up_id(&sign_up.session, &sign_up.person),
        ));
    }
    let state = session.state;
    let full = session.sign_ups.len() >= session.sits_maximum as usize;
    check.person(store, &sign_up.person)?;
    if state != SessionState::Open {
        check.violation(ValidationError::SessionNotOpen(sign_up.session.clone()))?;
    } else if full {
        check.violation(ValidationError::SessionFull(sign_up.session.clone()))?;
    }
    if let Some(session) = store.sessions.get_mut(&sign_up.session) {
        session.sign_ups.push(sign_up.person.clone());
    }
    Ok(check.finish(true))
}

/// Order in which a journal is replayed: sequenced entries by ascending cloud
/// sequence, then pending entries in append order.
pub fn replay_order<'a, I>(entries: I) -> Vec<&'a JournalEntry>
where
    I: IntoIterator<Item = &'a JournalEntry>,
{
    let mut ordered: Vec<&JournalEntry> = entries.into_iter().collect();
    // Stable sort keeps append order among pending entries.
    ordered.sort_by(|a, b| match (a.cloud_seq, b.cloud_seq) {
        (0, 0) => Ordering::Equal,
        (0, _) => Ordering::Greater,
        (_, 0) => Ordering::Less,
        (x, y) => x.cmp(&y),
    });
    ordered
}

/// Replay a whole journal into `store` in replay order. Returns the number of
/// advisories raised.
pub fn replay<'a, I>(store: &mut Store, entries: I, mode: CheckMode) -> usize
where
    I: IntoIterator<Item = &'a JournalEntry>,
{
    let mut advisories = 0;
    for entry in replay_order(entries) {
        match apply(store, entry, mode) {
            Ok(applied) => advisories += applied.advisories.len(),
            Err(e) => {
                // Only reachable in local mode.
                warn!("Rejected entry {} during replay: {}", entry.local_seq, e);
                advisories += 1;
            }
        }
    }
    advisories
}
