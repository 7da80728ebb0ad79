//! Entity model for the gaming-event database.
//!
//! Five entity kinds are materialized: gaming events, games, persons,
//! sessions and wish-list items. Sign-ups only exist as journal operations
//! and are folded into [`Session::sign_ups`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Handle substituted for an erased person.
pub const DELETED_HANDLE: &str = "#deleted";

pub const NO_NOTES: &str = "NO NOTES";
pub const NO_LINK: &str = "NO LINK";
pub const NO_NAME: &str = "NO NAME";
pub const NO_PHONE: &str = "NO PHONE";
pub const NO_EMAIL: &str = "NO EMAIL";

pub const DEFAULT_SITS_MINIMUM: u32 = 2;
pub const DEFAULT_SITS_MAXIMUM: u32 = 4;

/// Slots of the longest event type; no session can start later.
pub const MAX_SLOT_COUNT: u32 = 9;

/// Entity kind named by a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    GamingEvent,
    Game,
    Person,
    Session,
    SignUp,
    WishList,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::GamingEvent => "GamingEvent",
            EntityType::Game => "Game",
            EntityType::Person => "Person",
            EntityType::Session => "Session",
            EntityType::SignUp => "SignUp",
            EntityType::WishList => "WishList",
        }
    }

    /// Only sign-ups and wish-list items can be removed.
    pub fn is_deletable(&self) -> bool {
        matches!(self, EntityType::SignUp | EntityType::WishList)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GamingEvent" => Ok(EntityType::GamingEvent),
            "Game" => Ok(EntityType::Game),
            "Person" => Ok(EntityType::Person),
            "Session" => Ok(EntityType::Session),
            "SignUp" => Ok(EntityType::SignUp),
            "WishList" => Ok(EntityType::WishList),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "Create",
            OperationType::Update => "Update",
            OperationType::Delete => "Delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(OperationType::Create),
            "Update" => Ok(OperationType::Update),
            "Delete" => Ok(OperationType::Delete),
            other => Err(other.to_string()),
        }
    }
}

/// Kind of gaming event. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Evening,
    Day,
    Convention,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Evening => "EVENING",
            EventType::Day => "DAY",
            EventType::Convention => "CONVENTION",
        }
    }

    /// Number of time slots a session can start in.
    pub fn slot_count(&self) -> u32 {
        match self {
            EventType::Evening => 1,
            EventType::Day => 3,
            EventType::Convention => MAX_SLOT_COUNT,
        }
    }
}

impl FromStr for EventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EVENING" => Ok(EventType::Evening),
            "DAY" => Ok(EventType::Day),
            "CONVENTION" => Ok(EventType::Convention),
            other => Err(ValidationError::InvalidEventType(other.to_string())),
        }
    }
}

/// Session lifecycle. Every state can move to every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Open,
    Full,
    Abandoned,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "OPEN",
            SessionState::Full => "FULL",
            SessionState::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(SessionState::Open),
            "FULL" => Ok(SessionState::Full),
            "ABANDONED" => Ok(SessionState::Abandoned),
            other => Err(ValidationError::InvalidState(other.to_string())),
        }
    }
}

/// Replace characters that cannot appear in a journal record.
pub fn sanitize_text(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '\\' | '|' | '\n' | '\r' => '_',
            c => c,
        })
        .collect()
}

/// Like [`sanitize_text`], also replacing the list separator `,`.
pub fn sanitize_identifier(value: &str) -> String {
    sanitize_text(value).replace(',', "_")
}

/// Lowercase hex SHA-256 of a clear-text password.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamingEvent {
    pub name: String,
    pub event_type: EventType,
    pub is_active: bool,
    pub modified_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub name: String,
    pub bgg_link: String,
    pub is_active: bool,
    pub modified_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub handle: String,
    pub full_name: String,
    pub phone_number: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub modified_by: Option<String>,
}

impl Person {
    /// The sentinel that stands in for erased persons.
    pub fn deleted_sentinel() -> Self {
        Self {
            handle: DELETED_HANDLE.to_string(),
            full_name: String::new(),
            phone_number: String::new(),
            email: String::new(),
            password_hash: String::new(),
            is_admin: false,
            is_active: false,
            modified_by: None,
        }
    }

    /// An empty hash means the person has not set a password.
    pub fn verify_password(&self, password: &str) -> bool {
        !self.password_hash.is_empty() && self.password_hash == hash_password(password)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub event_name: String,
    pub proposer: String,
    pub to_play: String,
    pub start_at: u32,
    pub notes: String,
    pub whatsapp_link: String,
    pub bgg_link: String,
    pub sits_minimum: u32,
    pub sits_maximum: u32,
    pub state: SessionState,
    /// Ordered set of handles; only `#deleted` may repeat.
    pub sign_ups: Vec<String>,
    pub modified_by: Option<String>,
}

impl Session {
    pub fn num_sign_ups(&self) -> usize {
        self.sign_ups.len()
    }

    pub fn is_signed_up(&self, handle: &str) -> bool {
        self.sign_ups.iter().any(|h| h == handle)
    }

    /// Comma-joined sign-up list, as shown to users and in exports.
    pub fn sign_ups_joined(&self) -> String {
        self.sign_ups.join(",")
    }
}

/// Identity of a wish-list item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WishKey {
    pub person: String,
    pub game: String,
    pub event: String,
}

impl WishKey {
    pub fn new(person: &str, game: &str, event: &str) -> Self {
        Self {
            person: sanitize_identifier(person),
            game: sanitize_text(game),
            event: sanitize_text(event),
        }
    }

    /// Entity id used in journal records.
    pub fn entity_id(&self) -> String {
        format!("{},{},{}", self.person, self.game, self.event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishListItem {
    pub key: WishKey,
    pub notes: String,
    pub modified_by: Option<String>,
}

/// Entity id of a sign-up record.
pub fn sign_up_id(session: &str, person: &str) -> String {
    format!("{},{}", session, person)
}
