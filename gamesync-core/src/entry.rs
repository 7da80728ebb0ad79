//! Journal entries and their on-disk record format.
//!
//! An entry names one entity and one operation. The attribute bag carried on
//! disk and on the wire is decoded into a typed [`Operation`] against a
//! per-(entity, operation) schema table, so the replay engine never sees
//! free-form key/value pairs.
//!
//! Record layout (one line per entry, `|`-separated):
//!
//! ```text
//! installationId|localSeq|cloudSeq|EntityType|Operation|entityId|key|value|key|value...
//! ```

use tracing::warn;

use crate::error::{EntryError, ValidationError};
use crate::model::{
    EntityType, EventType, MAX_SLOT_COUNT, OperationType, SessionState, WishKey,
    sanitize_identifier, sanitize_text, sign_up_id,
};

pub const FIELD_SEPARATOR: char = '|';

pub const ATTR_MODIFIED_BY: &str = "modifiedBy";

/// Allowed attribute keys for one (entity, operation) pair.
struct Schema {
    entity: EntityType,
    op: OperationType,
    required: &'static [&'static str],
    optional: &'static [&'static str],
    /// Immutable fields that may show up on malformed updates; dropped.
    immutable: &'static [&'static str],
}

const PERSON_FIELDS: &[&str] = &[
    "fullName",
    "phoneNumber",
    "email",
    "passwordHash",
    "isAdmin",
    "isActive",
];
const SESSION_MUTABLE: &[&str] = &[
    "notes",
    "whatsAppLink",
    "bggLink",
    "sitsMinimum",
    "sitsMaximum",
    "state",
];
const SESSION_IMMUTABLE: &[&str] = &["eventName", "proposer", "toPlay", "startAt"];
const WISH_KEY: &[&str] = &["person", "game", "event"];

const SCHEMAS: &[Schema] = &[
    Schema {
        entity: EntityType::GamingEvent,
        op: OperationType::Create,
        required: &["eventType"],
        optional: &["isActive"],
        immutable: &[],
    },
    Schema {
        entity: EntityType::GamingEvent,
        op: OperationType::Update,
        required: &[],
        optional: &["isActive"],
        immutable: &["eventType"],
    },
    Schema {
        entity: EntityType::Game,
        op: OperationType::Create,
        required: &[],
        optional: &["bggLink", "isActive"],
        immutable: &[],
    },
    Schema {
        entity: EntityType::Game,
        op: OperationType::Update,
        required: &[],
        optional: &["bggLink", "isActive"],
        immutable: &[],
    },
    Schema {
        entity: EntityType::Person,
        op: OperationType::Create,
        required: &[],
        optional: PERSON_FIELDS,
        immutable: &[],
    },
    Schema {
        entity: EntityType::Person,
        op: OperationType::Update,
        required: &[],
        optional: PERSON_FIELDS,
        immutable: &[],
    },
    Schema {
        entity: EntityType::Session,
        op: OperationType::Create,
        required: SESSION_IMMUTABLE,
        optional: SESSION_MUTABLE,
        immutable: &[],
    },
    Schema {
        entity: EntityType::Session,
        op: OperationType::Update,
        required: &[],
        optional: SESSION_MUTABLE,
        immutable: SESSION_IMMUTABLE,
    },
    Schema {
        entity: EntityType::SignUp,
        op: OperationType::Create,
        required: &["session", "person"],
        optional: &[],
        immutable: &[],
    },
    Schema {
        entity: EntityType::SignUp,
        op: OperationType::Delete,
        required: &["session", "person"],
        optional: &[],
        immutable: &[],
    },
    Schema {
        entity: EntityType::WishList,
        op: OperationType::Create,
        required: WISH_KEY,
        optional: &["notes"],
        immutable: &[],
    },
    Schema {
        entity: EntityType::WishList,
        op: OperationType::Update,
        required: WISH_KEY,
        optional: &["notes"],
        immutable: &[],
    },
    Schema {
        entity: EntityType::WishList,
        op: OperationType::Delete,
        required: WISH_KEY,
        optional: &[],
        immutable: &[],
    },
];

fn schema_for(entity: EntityType, op: OperationType) -> Option<&'static Schema> {
    SCHEMAS.iter().find(|s| s.entity == entity && s.op == op)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameFields {
    pub bgg_link: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonFields {
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
}

/// Attributes of a new session. Identity fields are mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreate {
    pub event_name: String,
    pub proposer: String,
    pub to_play: String,
    pub start_at: u32,
    pub patch: SessionPatch,
}

/// Mutable session attributes; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub notes: Option<String>,
    pub whatsapp_link: Option<String>,
    pub bgg_link: Option<String>,
    pub sits_minimum: Option<u32>,
    pub sits_maximum: Option<u32>,
    pub state: Option<SessionState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpRef {
    pub session: String,
    pub person: String,
}

/// Typed payload of a journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateGamingEvent {
        event_type: EventType,
        is_active: Option<bool>,
    },
    UpdateGamingEvent {
        is_active: Option<bool>,
    },
    CreateGame(GameFields),
    UpdateGame(GameFields),
    CreatePerson(PersonFields),
    UpdatePerson(PersonFields),
    CreateSession(SessionCreate),
    UpdateSession(SessionPatch),
    CreateSignUp(SignUpRef),
    DeleteSignUp(SignUpRef),
    CreateWish { key: WishKey, notes: Option<String> },
    UpdateWish { key: WishKey, notes: Option<String> },
    DeleteWish(WishKey),
}

impl Operation {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Operation::CreateGamingEvent { .. } | Operation::UpdateGamingEvent { .. } => {
                EntityType::GamingEvent
            }
            Operation::CreateGame(_) | Operation::UpdateGame(_) => EntityType::Game,
            Operation::CreatePerson(_) | Operation::UpdatePerson(_) => EntityType::Person,
            Operation::CreateSession(_) | Operation::UpdateSession(_) => EntityType::Session,
            Operation::CreateSignUp(_) | Operation::DeleteSignUp(_) => EntityType::SignUp,
            Operation::CreateWish { .. } | Operation::UpdateWish { .. } | Operation::DeleteWish(_) => {
                EntityType::WishList
            }
        }
    }

    pub fn operation_type(&self) -> OperationType {
        match self {
            Operation::CreateGamingEvent { .. }
            | Operation::CreateGame(_)
            | Operation::CreatePerson(_)
            | Operation::CreateSession(_)
            | Operation::CreateSignUp(_)
            | Operation::CreateWish { .. } => OperationType::Create,
            Operation::UpdateGamingEvent { .. }
            | Operation::UpdateGame(_)
            | Operation::UpdatePerson(_)
            | Operation::UpdateSession(_)
            | Operation::UpdateWish { .. } => OperationType::Update,
            Operation::DeleteSignUp(_) | Operation::DeleteWish(_) => OperationType::Delete,
        }
    }

    /// Attribute pairs in canonical order, without the modifier.
    pub fn attributes(&self) -> Vec<(String, String)> {
        let mut out = Attrs::default();
        match self {
            Operation::CreateGamingEvent {
                event_type,
                is_active,
            } => {
                out.put("eventType", Some(event_type.as_str().to_string()));
                out.put_bool("isActive", *is_active);
            }
            Operation::UpdateGamingEvent { is_active } => out.put_bool("isActive", *is_active),
            Operation::CreateGame(g) | Operation::UpdateGame(g) => {
                out.put("bggLink", g.bgg_link.clone());
                out.put_bool("isActive", g.is_active);
            }
            Operation::CreatePerson(p) | Operation::UpdatePerson(p) => {
                out.put("fullName", p.full_name.clone());
                out.put("phoneNumber", p.phone_number.clone());
                out.put("email", p.email.clone());
                out.put("passwordHash", p.password_hash.clone());
                out.put_bool("isAdmin", p.is_admin);
                out.put_bool("isActive", p.is_active);
            }
            Operation::CreateSession(c) => {
                out.put("eventName", Some(c.event_name.clone()));
                out.put("proposer", Some(c.proposer.clone()));
                out.put("toPlay", Some(c.to_play.clone()));
                out.put("startAt", Some(c.start_at.to_string()));
                out.put_patch(&c.patch);
            }
            Operation::UpdateSession(p) => out.put_patch(p),
            Operation::CreateSignUp(s) | Operation::DeleteSignUp(s) => {
                out.put("session", Some(s.session.clone()));
                out.put("person", Some(s.person.clone()));
            }
            Operation::CreateWish { key, notes } | Operation::UpdateWish { key, notes } => {
                out.put_key(key);
                out.put("notes", notes.clone());
            }
            Operation::DeleteWish(key) => out.put_key(key),
        }
        out.0
    }
}

#[derive(Default)]
struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn put(&mut self, key: &str, value: Option<String>) {
        if let Some(v) = value {
            self.0.push((key.to_string(), v));
        }
    }

    fn put_bool(&mut self, key: &str, value: Option<bool>) {
        self.put(key, value.map(|b| b.to_string()));
    }

    fn put_key(&mut self, key: &WishKey) {
        self.put("person", Some(key.person.clone()));
        self.put("game", Some(key.game.clone()));
        self.put("event", Some(key.event.clone()));
    }

    fn put_patch(&mut self, p: &SessionPatch) {
        self.put("notes", p.notes.clone());
        self.put("whatsAppLink", p.whatsapp_link.clone());
        self.put("bggLink", p.bgg_link.clone());
        self.put("sitsMinimum", p.sits_minimum.map(|n| n.to_string()));
        self.put("sitsMaximum", p.sits_maximum.map(|n| n.to_string()));
        self.put("state", p.state.map(|s| s.as_str().to_string()));
    }
}

/// Read-only view over a decoded attribute list.
struct AttrReader<'a> {
    pairs: &'a [(String, String)],
}

impl<'a> AttrReader<'a> {
    fn get(&self, key: &str) -> Option<&'a str> {
        // Last occurrence wins within a single entry.
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    fn required(&self, kind: EntityType, key: &str) -> Result<String, ValidationError> {
        self.string(key).ok_or_else(|| ValidationError::MissingField {
            kind,
            field: key.to_string(),
        })
    }

    fn boolean(&self, key: &str) -> Result<Option<bool>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(malformed(key, format!("expected true/false, got {:?}", other))),
        }
    }

    fn number(&self, key: &str) -> Result<Option<u32>, ValidationError> {
        self.get(key)
            .map(|v| {
                v.parse::<u32>()
                    .map_err(|_| malformed(key, format!("expected a number, got {:?}", v)))
            })
            .transpose()
    }

    fn wish_key(&self) -> Result<WishKey, ValidationError> {
        Ok(WishKey {
            person: self.required(EntityType::WishList, "person")?,
            game: self.required(EntityType::WishList, "game")?,
            event: self.required(EntityType::WishList, "event")?,
        })
    }

    fn session_patch(&self) -> Result<SessionPatch, ValidationError> {
        Ok(SessionPatch {
            notes: self.string("notes"),
            whatsapp_link: self.string("whatsAppLink"),
            bgg_link: self.string("bggLink"),
            sits_minimum: self.number("sitsMinimum")?,
            sits_maximum: self.number("sitsMaximum")?,
            state: self.get("state").map(str::parse).transpose()?,
        })
    }

    fn person_fields(&self) -> Result<PersonFields, ValidationError> {
        Ok(PersonFields {
            full_name: self.string("fullName"),
            phone_number: self.string("phoneNumber"),
            email: self.string("email"),
            password_hash: self.string("passwordHash"),
            is_admin: self.boolean("isAdmin")?,
            is_active: self.boolean("isActive")?,
        })
    }

    fn game_fields(&self) -> Result<GameFields, ValidationError> {
        Ok(GameFields {
            bgg_link: self.string("bggLink"),
            is_active: self.boolean("isActive")?,
        })
    }
}

fn malformed(field: &str, reason: String) -> ValidationError {
    ValidationError::Malformed {
        field: field.to_string(),
        reason,
    }
}

/// Keys whose values are person handles; these also forbid `,`.
fn is_identifier_key(key: &str) -> bool {
    matches!(key, "proposer" | "person" | ATTR_MODIFIED_BY)
}

fn check_value(field: &str, value: &str, identifier: bool) -> Result<(), EntryError> {
    let bad = value
        .chars()
        .any(|c| matches!(c, '\\' | '|' | '\n' | '\r') || (identifier && c == ','));
    if bad {
        return Err(EntryError::ForbiddenCharacter {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

/// One operation in the replicated journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub installation_id: String,
    pub local_seq: u64,
    /// Globally assigned order; 0 until the sequencing service accepts it.
    pub cloud_seq: u64,
    pub entity_id: String,
    pub modified_by: Option<String>,
    pub op: Operation,
}

impl JournalEntry {
    pub fn entity_type(&self) -> EntityType {
        self.op.entity_type()
    }

    pub fn operation_type(&self) -> OperationType {
        self.op.operation_type()
    }

    pub fn is_synced(&self) -> bool {
        self.cloud_seq != 0
    }

    /// Full attribute list including the modifier.
    pub fn attributes(&self) -> Vec<(String, String)> {
        let mut attrs = self.op.attributes();
        if let Some(m) = &self.modified_by {
            attrs.push((ATTR_MODIFIED_BY.to_string(), m.clone()));
        }
        attrs
    }

    /// Decode an entry from its untyped parts, validating the attribute bag
    /// against the schema table.
    pub fn from_parts(
        installation_id: &str,
        local_seq: u64,
        cloud_seq: u64,
        entity_type: EntityType,
        operation_type: OperationType,
        entity_id: &str,
        attributes: &[(String, String)],
    ) -> Result<Self, EntryError> {
        let schema = schema_for(entity_type, operation_type).ok_or_else(|| {
            if operation_type == OperationType::Delete {
                EntryError::Invalid(ValidationError::DeleteNotAllowed(entity_type))
            } else {
                EntryError::UnknownOperation(format!("{} {}", operation_type, entity_type))
            }
        })?;

        check_value("installationId", installation_id, true)?;
        check_value("entityId", entity_id, entity_type == EntityType::Person)?;

        let mut kept = Vec::with_capacity(attributes.len());
        for (key, value) in attributes {
            check_value(key, value, is_identifier_key(key))?;
            let k = key.as_str();
            if k == ATTR_MODIFIED_BY || schema.required.contains(&k) || schema.optional.contains(&k) {
                kept.push((key.clone(), value.clone()));
            } else if schema.immutable.contains(&k) {
                warn!(
                    "Dropping immutable attribute {} on {} {} {}",
                    key, operation_type, entity_type, entity_id
                );
            } else {
                return Err(EntryError::UnexpectedAttribute {
                    key: key.clone(),
                    op: format!("{} {}", operation_type, entity_type),
                });
            }
        }

        let r = AttrReader { pairs: &kept };
        for field in schema.required {
            r.required(entity_type, field)?;
        }

        let op = match (entity_type, operation_type) {
            (EntityType::GamingEvent, OperationType::Create) => Operation::CreateGamingEvent {
                event_type: r.required(entity_type, "eventType")?.parse()?,
                is_active: r.boolean("isActive")?,
            },
            (EntityType::GamingEvent, _) => Operation::UpdateGamingEvent {
                is_active: r.boolean("isActive")?,
            },
            (EntityType::Game, OperationType::Create) => Operation::CreateGame(r.game_fields()?),
            (EntityType::Game, _) => Operation::UpdateGame(r.game_fields()?),
            (EntityType::Person, OperationType::Create) => {
                Operation::CreatePerson(r.person_fields()?)
            }
            (EntityType::Person, _) => Operation::UpdatePerson(r.person_fields()?),
            (EntityType::Session, OperationType::Create) => {
                let start_at = r
                    .number("startAt")?
                    .ok_or_else(|| malformed("startAt", "missing".to_string()))?;
                if start_at >= MAX_SLOT_COUNT {
                    return Err(malformed(
                        "startAt",
                        format!("slot {} beyond the last slot {}", start_at, MAX_SLOT_COUNT - 1),
                    )
                    .into());
                }
                Operation::CreateSession(SessionCreate {
                    event_name: r.required(entity_type, "eventName")?,
                    proposer: r.required(entity_type, "proposer")?,
                    to_play: r.required(entity_type, "toPlay")?,
                    start_at,
                    patch: r.session_patch()?,
                })
            }
            (EntityType::Session, _) => Operation::UpdateSession(r.session_patch()?),
            (EntityType::SignUp, op) => {
                let s = SignUpRef {
                    session: r.required(entity_type, "session")?,
                    person: r.required(entity_type, "person")?,
                };
                if op == OperationType::Create {
                    Operation::CreateSignUp(s)
                } else {
                    Operation::DeleteSignUp(s)
                }
            }
            (EntityType::WishList, OperationType::Create) => Operation::CreateWish {
                key: r.wish_key()?,
                notes: r.string("notes"),
            },
            (EntityType::WishList, OperationType::Update) => Operation::UpdateWish {
                key: r.wish_key()?,
                notes: r.string("notes"),
            },
            (EntityType::WishList, OperationType::Delete) => Operation::DeleteWish(r.wish_key()?),
        };

        Ok(Self {
            installation_id: installation_id.to_string(),
            local_seq,
            cloud_seq,
            entity_id: entity_id.to_string(),
            modified_by: r.string(ATTR_MODIFIED_BY),
            op,
        })
    }

    /// Encode as a single human-readable record line (no trailing newline).
    pub fn to_record(&self) -> String {
        let mut fields = vec![
            self.installation_id.clone(),
            self.local_seq.to_string(),
            self.cloud_seq.to_string(),
            self.entity_type().as_str().to_string(),
            self.operation_type().as_str().to_string(),
            self.entity_id.clone(),
        ];
        for (k, v) in self.attributes() {
            fields.push(k);
            fields.push(v);
        }
        fields.join(&FIELD_SEPARATOR.to_string())
    }

    /// Decode a record line produced by [`JournalEntry::to_record`].
    pub fn from_record(line: &str) -> Result<Self, EntryError> {
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() < 6 {
            return Err(EntryError::TooFewFields(fields.len()));
        }
        let attr_fields = &fields[6..];
        if attr_fields.len() % 2 != 0 {
            return Err(EntryError::OddAttributes(attr_fields.len()));
        }
        let local_seq = fields[1].parse().map_err(|_| EntryError::BadNumber {
            field: "localSeq",
            value: fields[1].to_string(),
        })?;
        let cloud_seq = fields[2].parse().map_err(|_| EntryError::BadNumber {
            field: "cloudSeq",
            value: fields[2].to_string(),
        })?;
        let entity_type: EntityType = fields[3]
            .parse()
            .map_err(EntryError::UnknownEntityType)?;
        let operation_type: OperationType = fields[4]
            .parse()
            .map_err(EntryError::UnknownOperation)?;
        let attributes: Vec<(String, String)> = attr_fields
            .chunks(2)
            .map(|kv| (kv[0].to_string(), kv[1].to_string()))
            .collect();
        Self::from_parts(
            fields[0],
            local_seq,
            cloud_seq,
            entity_type,
            operation_type,
            fields[5],
            &attributes,
        )
    }

    /// Whether any identifying field of this entry equals `handle`.
    pub fn names(&self, handle: &str) -> bool {
        if self.modified_by.as_deref() == Some(handle) {
            return true;
        }
        match &self.op {
            Operation::CreatePerson(_) | Operation::UpdatePerson(_) => self.entity_id == handle,
            Operation::CreateSession(c) => c.proposer == handle,
            Operation::CreateSignUp(s) | Operation::DeleteSignUp(s) => s.person == handle,
            Operation::CreateWish { key, .. }
            | Operation::UpdateWish { key, .. }
            | Operation::DeleteWish(key) => key.person == handle,
            _ => false,
        }
    }

    /// Copy with every string value passed through the sanitizers and the
    /// result re-validated, so the record can always be written and read back.
    pub fn sanitized(&self) -> Result<Self, EntryError> {
        let attributes: Vec<(String, String)> = self
            .attributes()
            .into_iter()
            .map(|(k, v)| {
                let v = if is_identifier_key(&k) {
                    sanitize_identifier(&v)
                } else {
                    sanitize_text(&v)
                };
                (k, v)
            })
            .collect();
        let entity_id = if self.entity_type() == EntityType::Person {
            sanitize_identifier(&self.entity_id)
        } else {
            sanitize_text(&self.entity_id)
        };
        Self::from_parts(
            &self.installation_id,
            self.local_seq,
            self.cloud_seq,
            self.entity_type(),
            self.operation_type(),
            &entity_id,
            &attributes,
        )
    }

    /// Replace every reference to `handle` with `replacement`. Person records
    /// of the handle are re-keyed and their attributes blanked. Returns
    /// whether anything changed.
    pub fn redact_person(&mut self, handle: &str, replacement: &str) -> bool {
        let mut changed = false;
        if self.modified_by.as_deref() == Some(handle) {
            self.modified_by = Some(replacement.to_string());
            changed = true;
        }
        match &mut self.op {
            Operation::CreatePerson(fields) | Operation::UpdatePerson(fields)
                if self.entity_id == handle =>
            {
                self.entity_id = replacement.to_string();
                *fields = PersonFields {
                    full_name: Some(String::new()),
                    phone_number: Some(String::new()),
                    email: Some(String::new()),
                    password_hash: Some(String::new()),
                    is_admin: Some(false),
                    is_active: Some(false),
                };
                changed = true;
            }
            Operation::CreateSession(c) if c.proposer == handle => {
                c.proposer = replacement.to_string();
                changed = true;
            }
            Operation::CreateSignUp(s) | Operation::DeleteSignUp(s) if s.person == handle => {
                s.person = replacement.to_string();
                self.entity_id = sign_up_id(&s.session, &s.person);
                changed = true;
            }
            Operation::CreateWish { key, .. }
            | Operation::UpdateWish { key, .. }
            | Operation::DeleteWish(key)
                if key.person == handle =>
            {
                key.person = replacement.to_string();
                self.entity_id = key.entity_id();
                changed = true;
            }
            _ => {}
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_record_roundtrip_session() {
        let entry = JournalEntry::from_parts(
            "dev-1",
            3,
            0,
            EntityType::Session,
            OperationType::Create,
            "s1",
            &attrs(&[
                ("eventName", "Con1"),
                ("proposer", "alice"),
                ("toPlay", "Chess"),
                ("startAt", "0"),
                ("sitsMaximum", "4"),
                ("modifiedBy", "alice"),
            ]),
        )
        .unwrap();
        let line = entry.to_record();
        assert!(line.starts_with("dev-1|3|0|Session|Create|s1|"));
        assert_eq!(JournalEntry::from_record(&line).unwrap(), entry);
    }

    #[test]
    fn test_start_slot_beyond_longest_event_rejected() {
        let session = |slot: &str| {
            JournalEntry::from_parts(
                "dev",
                1,
                7,
                EntityType::Session,
                OperationType::Create,
                "s1",
                &attrs(&[
                    ("eventName", "Con1"),
                    ("proposer", "alice"),
                    ("toPlay", "Chess"),
                    ("startAt", slot),
                ]),
            )
        };
        assert!(session("8").is_ok());
        assert!(matches!(
            session("9"),
            Err(EntryError::Invalid(ValidationError::Malformed { .. }))
        ));
        assert!(session("4294967295").is_err());
    }

    #[test]
    fn test_odd_attribute_count_rejected() {
        let err = JournalEntry::from_record("dev|1|0|Game|Create|Chess|bggLink").unwrap_err();
        assert_eq!(err, EntryError::OddAttributes(1));
    }

    #[test]
    fn test_delete_only_for_signup_and_wishlist() {
        let err = JournalEntry::from_parts(
            "dev",
            1,
            0,
            EntityType::Game,
            OperationType::Delete,
            "Chess",
            &[],
        )
        .unwrap_err();
        assert_eq!(
            err,
            EntryError::Invalid(ValidationError::DeleteNotAllowed(EntityType::Game))
        );
    }

    #[test]
    fn test_invalid_state_rejected() {
        let err = JournalEntry::from_parts(
            "dev",
            1,
            0,
            EntityType::Session,
            OperationType::Update,
            "s1",
            &attrs(&[("state", "CLOSED")]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EntryError::Invalid(ValidationError::InvalidState("CLOSED".to_string()))
        );
    }

    #[test]
    fn test_immutable_field_on_update_dropped() {
        let entry = JournalEntry::from_parts(
            "dev",
            1,
            7,
            EntityType::Session,
            OperationType::Update,
            "s1",
            &attrs(&[("proposer", "mallory"), ("notes", "bring snacks")]),
        )
        .unwrap();
        assert_eq!(
            entry.op,
            Operation::UpdateSession(SessionPatch {
                notes: Some("bring snacks".to_string()),
                ..Default::default()
            })
        );
        assert!(!entry.to_record().contains("mallory"));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let err = JournalEntry::from_parts(
            "dev",
            1,
            0,
            EntityType::Game,
            OperationType::Update,
            "Chess",
            &attrs(&[("color", "red")]),
        )
        .unwrap_err();
        assert!(matches!(err, EntryError::UnexpectedAttribute { .. }));
    }

    #[test]
    fn test_forbidden_characters() {
        let err = JournalEntry::from_parts(
            "dev",
            1,
            0,
            EntityType::SignUp,
            OperationType::Create,
            "s1,a_b",
            &attrs(&[("session", "s1"), ("person", "a,b")]),
        )
        .unwrap_err();
        assert!(matches!(err, EntryError::ForbiddenCharacter { .. }));

        let err = JournalEntry::from_parts(
            "dev",
            1,
            0,
            EntityType::Game,
            OperationType::Create,
            "Chess",
            &attrs(&[("bggLink", "a\\b")]),
        )
        .unwrap_err();
        assert!(matches!(err, EntryError::ForbiddenCharacter { .. }));
    }

    #[test]
    fn test_redact_person_rewrites_references() {
        let mut signup = JournalEntry::from_parts(
            "dev",
            1,
            4,
            EntityType::SignUp,
            OperationType::Create,
            "s1,alice",
            &attrs(&[("session", "s1"), ("person", "alice"), ("modifiedBy", "alice")]),
        )
        .unwrap();
        assert!(signup.names("alice"));
        assert!(signup.redact_person("alice", "#deleted"));
        assert!(!signup.names("alice"));
        assert_eq!(signup.entity_id, "s1,#deleted");
        assert!(!signup.redact_person("alice", "#deleted"));
    }

    #[test]
    fn test_sanitized_replaces_forbidden_characters() {
        let entry = JournalEntry {
            installation_id: "dev".to_string(),
            local_seq: 1,
            cloud_seq: 0,
            entity_id: "s1".to_string(),
            modified_by: Some("al,ice".to_string()),
            op: Operation::UpdateSession(SessionPatch {
                notes: Some("bring\\dice|snacks\nplease".to_string()),
                ..Default::default()
            }),
        };
        let clean = entry.sanitized().unwrap();
        assert_eq!(clean.modified_by.as_deref(), Some("al_ice"));
        let JournalEntry {
            op: Operation::UpdateSession(patch),
            ..
        } = &clean
        else {
            panic!("unexpected operation");
        };
        assert_eq!(patch.notes.as_deref(), Some("bring_dice_snacks_please"));
        assert!(JournalEntry::from_record(&clean.to_record()).is_ok());
    }
}
