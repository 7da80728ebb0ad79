//! In-memory materialized store.
//!
//! The store is owned by exactly one writer (see [`crate::replica`]) and
//! therefore carries no locking of its own. All mutation goes through the
//! replay engine in [`crate::replay`].

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::model::{
    DELETED_HANDLE, EntityType, Game, GamingEvent, NO_LINK, Person, Session, SessionState,
    WishKey, WishListItem,
};

/// Which sessions of an event are visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionFilter {
    pub include_abandoned: bool,
    /// Only sessions proposed by or signed up to by this person.
    pub only_person: Option<String>,
}

impl SessionFilter {
    pub fn accepts(&self, session: &Session) -> bool {
        if !self.include_abandoned && session.state == SessionState::Abandoned {
            return false;
        }
        match &self.only_person {
            Some(handle) => session.proposer == *handle || session.is_signed_up(handle),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Store {
    pub(crate) events: BTreeMap<String, GamingEvent>,
    pub(crate) games: BTreeMap<String, Game>,
    pub(crate) persons: BTreeMap<String, Person>,
    pub(crate) sessions: BTreeMap<String, Session>,
    pub(crate) wishes: BTreeMap<WishKey, WishListItem>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding only the seed catalog and the erased-person sentinel.
    pub fn seeded<I, S>(catalog: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut store = Self::new();
        store.seed(catalog);
        store
    }

    /// Insert seed games and the `#deleted` sentinel. Existing entries are
    /// left untouched.
    pub fn seed<I, S>(&mut self, catalog: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in catalog {
            let name = crate::model::sanitize_text(name.as_ref());
            self.games.entry(name.clone()).or_insert(Game {
                name,
                bgg_link: NO_LINK.to_string(),
                is_active: true,
                modified_by: None,
            });
        }
        self.persons
            .entry(DELETED_HANDLE.to_string())
            .or_insert_with(Person::deleted_sentinel);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.games.is_empty()
            && self.persons.is_empty()
            && self.sessions.is_empty()
            && self.wishes.is_empty()
    }

    pub fn event(&self, name: &str) -> Option<&GamingEvent> {
        self.events.get(name)
    }

    pub fn game(&self, name: &str) -> Option<&Game> {
        self.games.get(name)
    }

    pub fn person(&self, handle: &str) -> Option<&Person> {
        self.persons.get(handle)
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn wish(&self, key: &WishKey) -> Option<&WishListItem> {
        self.wishes.get(key)
    }

    pub fn events(&self) -> impl Iterator<Item = &GamingEvent> {
        self.events.values()
    }

    pub fn games(&self) -> impl Iterator<Item = &Game> {
        self.games.values()
    }

    pub fn persons(&self) -> impl Iterator<Item = &Person> {
        self.persons.values()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn wishes(&self) -> impl Iterator<Item = &WishListItem> {
        self.wishes.values()
    }

    /// Wish-list items of one event, across persons.
    pub fn wishes_for_event<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a WishListItem> {
        self.wishes.values().filter(move |w| w.key.event == event)
    }

    /// Sessions of `event` bucketed by time-slot ordinal, one bucket per slot
    /// of the event. Sessions whose slot lies beyond the event's slot count
    /// (accepted during foreign replay) are gathered in one extra trailing
    /// bucket, present only when non-empty.
    pub fn sessions_by_slot(&self, event: &str, filter: &SessionFilter) -> Vec<Vec<&Session>> {
        let slots = self
            .events
            .get(event)
            .map(|e| e.event_type.slot_count())
            .unwrap_or(0) as usize;
        let mut buckets: Vec<Vec<&Session>> = vec![Vec::new(); slots];
        let mut overflow = Vec::new();
        for session in self
            .sessions
            .values()
            .filter(|s| s.event_name == event && filter.accepts(s))
        {
            match buckets.get_mut(session.start_at as usize) {
                Some(bucket) => bucket.push(session),
                None => {
                    warn!(
                        "Session {} starts at slot {} but {} has {} slots",
                        session.id, session.start_at, event, slots
                    );
                    overflow.push(session);
                }
            }
        }
        if !overflow.is_empty() {
            buckets.push(overflow);
        }
        buckets
    }

    /// Ids of every materialized entity of one kind.
    pub fn entity_ids(&self, kind: EntityType) -> BTreeSet<String> {
        match kind {
            EntityType::GamingEvent => self.events.keys().cloned().collect(),
            EntityType::Game => self.games.keys().cloned().collect(),
            EntityType::Person => self.persons.keys().cloned().collect(),
            EntityType::Session => self.sessions.keys().cloned().collect(),
            EntityType::WishList => self.wishes.keys().map(WishKey::entity_id).collect(),
            EntityType::SignUp => self
                .sessions
                .values()
                .flat_map(|s| s.sign_ups.iter().map(move |p| crate::model::sign_up_id(&s.id, p)))
                .collect(),
        }
    }

    /// Whether `handle` names an existing, active person.
    pub fn is_active_person(&self, handle: &str) -> bool {
        self.persons.get(handle).map(|p| p.is_active).unwrap_or(false)
    }
}
