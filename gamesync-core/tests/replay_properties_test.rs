//! Replay engine properties over generated journals.

use gamesync_core::replay::{self, CheckMode};
use gamesync_core::{
    EntityType, EventType, GameFields, JournalEntry, Operation, PersonFields, SessionCreate,
    SessionPatch, SessionState, SignUpRef, Store, ValidationError, WishKey,
};
use proptest::prelude::*;

const PERSONS: [&str; 2] = ["alice", "bob"];
const GAMES: [&str; 2] = ["Chess", "Go"];
const SESSIONS: [&str; 2] = ["s1", "s2"];
const STATES: [SessionState; 3] = [SessionState::Open, SessionState::Full, SessionState::Abandoned];

fn entry(seq: u64, cloud: u64, id: &str, op: Operation) -> JournalEntry {
    JournalEntry {
        installation_id: "dev".to_string(),
        local_seq: seq,
        cloud_seq: cloud,
        entity_id: id.to_string(),
        modified_by: None,
        op,
    }
}

fn prefix() -> Vec<(String, Operation)> {
    let mut ops: Vec<(String, Operation)> = PERSONS
        .iter()
        .map(|p| (p.to_string(), Operation::CreatePerson(PersonFields::default())))
        .collect();
    ops.push((
        "Con1".to_string(),
        Operation::CreateGamingEvent {
            event_type: EventType::Convention,
            is_active: None,
        },
    ));
    ops
}

fn build(kind: u8, a: usize, b: usize, text: &str) -> (String, Operation) {
    let wish = WishKey::new(PERSONS[a], GAMES[b], "Con1");
    let sign_up = SignUpRef {
        session: SESSIONS[a].to_string(),
        person: PERSONS[b].to_string(),
    };
    match kind {
        0 => (
            SESSIONS[a].to_string(),
            Operation::CreateSession(SessionCreate {
                event_name: "Con1".to_string(),
                proposer: PERSONS[b].to_string(),
                to_play: GAMES[b].to_string(),
                start_at: a as u32,
                patch: SessionPatch {
                    notes: Some(text.to_string()),
                    ..Default::default()
                },
            }),
        ),
        1 => (
            SESSIONS[a].to_string(),
            Operation::UpdateSession(SessionPatch {
                notes: Some(text.to_string()),
                state: Some(STATES[(b + text.len()) % 3]),
                ..Default::default()
            }),
        ),
        2 => (
            format!("{},{}", sign_up.session, sign_up.person),
            Operation::CreateSignUp(sign_up),
        ),
        3 => (
            format!("{},{}", sign_up.session, sign_up.person),
            Operation::DeleteSignUp(sign_up),
        ),
        4 => (
            wish.entity_id(),
            Operation::CreateWish {
                key: wish,
                notes: Some(text.to_string()),
            },
        ),
        5 => (
            wish.entity_id(),
            Operation::UpdateWish {
                key: wish,
                notes: Some(text.to_string()),
            },
        ),
        6 => (wish.entity_id(), Operation::DeleteWish(wish)),
        7 => (
            PERSONS[a].to_string(),
            Operation::UpdatePerson(PersonFields {
                full_name: Some(text.to_string()),
                is_active: Some(b == 0),
                ..Default::default()
            }),
        ),
        _ => (
            format!("G{}", text),
            Operation::CreateGame(GameFields {
                bgg_link: None,
                is_active: None,
            }),
        ),
    }
}

fn journal(ops: &[(u8, usize, usize, String, bool)]) -> Vec<JournalEntry> {
    let mut entries: Vec<JournalEntry> = prefix()
        .into_iter()
        .enumerate()
        .map(|(i, (id, op))| entry(i as u64 + 1, i as u64 + 1, &id, op))
        .collect();
    for (kind, a, b, text, pending) in ops {
        let seq = entries.len() as u64 + 1;
        let cloud = if *pending { 0 } else { seq };
        let (id, op) = build(*kind, *a, *b, text);
        entries.push(entry(seq, cloud, &id, op));
    }
    entries
}

fn arb_ops() -> impl Strategy<Value = Vec<(u8, usize, usize, String, bool)>> {
    prop::collection::vec(
        (0u8..9, 0usize..2, 0usize..2, "[a-z]{0,6}", prop::bool::weighted(0.2)),
        0..40,
    )
}

fn seeded() -> Store {
    Store::seeded(GAMES)
}

const TRACKED: [EntityType; 4] = [
    EntityType::GamingEvent,
    EntityType::Game,
    EntityType::Person,
    EntityType::Session,
];

proptest! {
    #[test]
    fn replay_is_deterministic(ops in arb_ops()) {
        let entries = journal(&ops);
        for mode in [CheckMode::Foreign, CheckMode::ColdStart] {
            let mut first = seeded();
            let mut second = seeded();
            let first_advisories = replay::replay(&mut first, &entries, mode);
            let second_advisories = replay::replay(&mut second, &entries, mode);
            prop_assert_eq!(first_advisories, second_advisories);
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn lenient_modes_build_the_same_store(ops in arb_ops()) {
        let entries = journal(&ops);
        let mut foreign = seeded();
        let mut cold = seeded();
        replay::replay(&mut foreign, &entries, CheckMode::Foreign);
        replay::replay(&mut cold, &entries, CheckMode::ColdStart);
        prop_assert_eq!(foreign, cold);
    }

    #[test]
    fn entity_ids_never_shrink(ops in arb_ops()) {
        let entries = journal(&ops);
        let mut store = seeded();
        for e in replay::replay_order(&entries) {
            let before: Vec<_> = TRACKED.iter().map(|k| store.entity_ids(*k)).collect();
            replay::apply(&mut store, e, CheckMode::Foreign).unwrap();
            for (kind, ids) in TRACKED.iter().zip(before) {
                prop_assert!(store.entity_ids(*kind).is_superset(&ids));
            }
        }
    }

    #[test]
    fn pending_order_only_affects_touched_fields(
        ops in arb_ops(),
        notes in prop::collection::vec(("[a-z]{1,6}", 0usize..2), 1..6),
    ) {
        let mut entries: Vec<JournalEntry> = journal(&ops)
            .into_iter()
            .filter(|e| e.is_synced())
            .collect();
        let base = entries.len() as u64;
        let pending: Vec<JournalEntry> = notes
            .iter()
            .enumerate()
            .map(|(i, (text, s))| {
                entry(
                    base + i as u64 + 1,
                    0,
                    SESSIONS[*s],
                    Operation::UpdateSession(SessionPatch {
                        notes: Some(text.clone()),
                        ..Default::default()
                    }),
                )
            })
            .collect();
        let mut reordered = entries.clone();
        entries.extend(pending.iter().cloned());
        reordered.extend(pending.iter().rev().cloned());

        let mut a = seeded();
        let mut b = seeded();
        replay::replay(&mut a, &entries, CheckMode::Foreign);
        replay::replay(&mut b, &reordered, CheckMode::Foreign);

        // Session notes are the only field the pending entries touch.
        let strip = |s: &Store| -> Vec<(String, SessionState, Vec<String>, Option<String>)> {
            s.sessions()
                .map(|x| (x.id.clone(), x.state, x.sign_ups.clone(), x.modified_by.clone()))
                .collect()
        };
        prop_assert_eq!(strip(&a), strip(&b));
        prop_assert_eq!(a.persons().cloned().collect::<Vec<_>>(), b.persons().cloned().collect::<Vec<_>>());
        prop_assert_eq!(a.wishes().cloned().collect::<Vec<_>>(), b.wishes().cloned().collect::<Vec<_>>());
        prop_assert_eq!(a.games().cloned().collect::<Vec<_>>(), b.games().cloned().collect::<Vec<_>>());
    }
}

#[test]
fn test_create_session_unknown_reference_strict_vs_lenient() {
    let mut store = seeded();
    let create = entry(
        1,
        0,
        "s1",
        Operation::CreateSession(SessionCreate {
            event_name: "Con1".to_string(),
            proposer: "zed".to_string(),
            to_play: "Risk".to_string(),
            start_at: 0,
            patch: SessionPatch::default(),
        }),
    );
    let err = replay::apply(&mut store, &create, CheckMode::Local).unwrap_err();
    assert!(matches!(err, ValidationError::UnknownReference { .. }));
    assert!(store.session("s1").is_none());

    let applied = replay::apply(&mut store, &create, CheckMode::Foreign).unwrap();
    assert!(applied.changed);
    assert_eq!(applied.advisories.len(), 3);
    assert_eq!(store.session("s1").unwrap().to_play, "Risk");
}

#[test]
fn test_scenario_c_highest_sequence_wins() {
    let mut entries = journal(&[(0, 0, 0, "x".to_string(), false)]);
    let n = entries.len() as u64;
    let full = entry(
        n + 1,
        n + 1,
        "s1",
        Operation::UpdateSession(SessionPatch {
            state: Some(SessionState::Full),
            ..Default::default()
        }),
    );
    let abandoned = entry(
        n + 2,
        n + 2,
        "s1",
        Operation::UpdateSession(SessionPatch {
            state: Some(SessionState::Abandoned),
            ..Default::default()
        }),
    );
    // Arrival order does not matter, cloud sequence does.
    entries.push(abandoned);
    entries.push(full);
    let mut store = seeded();
    replay::replay(&mut store, &entries, CheckMode::Foreign);
    assert_eq!(store.session("s1").unwrap().state, SessionState::Abandoned);
}

#[test]
fn test_duplicate_deleted_sign_ups_permitted() {
    let mut entries = journal(&[(0, 0, 0, "x".to_string(), false)]);
    let n = entries.len() as u64;
    for i in 0..2 {
        entries.push(entry(
            n + i + 1,
            n + i + 1,
            "s1,#deleted",
            Operation::CreateSignUp(SignUpRef {
                session: "s1".to_string(),
                person: "#deleted".to_string(),
            }),
        ));
    }
    let mut store = seeded();
    replay::replay(&mut store, &entries, CheckMode::Foreign);
    let session = store.session("s1").unwrap();
    assert_eq!(session.sign_ups, vec!["#deleted".to_string(), "#deleted".to_string()]);
}
