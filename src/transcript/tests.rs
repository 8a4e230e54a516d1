//! Tests for the transcript store

use std::sync::Arc;

use super::*;
use crate::{Message, MessageId, MessageRole, MessageStatus, Outcome, Part, StoreError};

fn in_flight_assistant() -> Message {
    Message::in_flight(MessageId::new(), MessageRole::Assistant)
}

fn next_revision(message: &Message, text: &str) -> Arc<Message> {
    let mut next = message.clone();
    next.parts.push(Part::text(text));
    next.revision += 1;
    Arc::new(next)
}

#[test]
fn test_append_assigns_versions() {
    let mut store = TranscriptStore::new();
    assert_eq!(store.version(), 0);
    assert!(store.is_empty());

    store.append(Arc::new(Message::user("hi"))).unwrap();
    assert_eq!(store.version(), 1);
    assert_eq!(store.len(), 1);
    assert!(store.in_flight().is_none());
}

#[test]
fn test_second_in_flight_message_is_rejected() {
    let mut store = TranscriptStore::new();
    store.append(Arc::new(in_flight_assistant())).unwrap();

    let err = store.append(Arc::new(in_flight_assistant())).unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation { .. }));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_duplicate_id_is_rejected() {
    let mut store = TranscriptStore::new();
    let message = Message::user("hi");
    store.append(Arc::new(message.clone())).unwrap();

    let err = store.append(Arc::new(message)).unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation { .. }));
}

#[test]
fn test_replace_in_flight_swaps_snapshot() {
    let mut store = TranscriptStore::new();
    let message = in_flight_assistant();
    store.append(Arc::new(message.clone())).unwrap();

    let next = next_revision(&message, "Hel");
    store.replace_in_flight(Arc::clone(&next)).unwrap();

    assert_eq!(store.in_flight().unwrap().text(), "Hel");
    assert_eq!(store.version(), 2);
}

#[test]
fn test_replace_rejects_stale_or_shrinking_snapshots() {
    let mut store = TranscriptStore::new();
    let message = in_flight_assistant();
    store.append(Arc::new(message.clone())).unwrap();
    let first = next_revision(&message, "a");
    store.replace_in_flight(Arc::clone(&first)).unwrap();

    // same revision again
    let err = store.replace_in_flight(Arc::clone(&first)).unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation { .. }));

    // fewer parts
    let mut shrunk = message.clone();
    shrunk.revision = 5;
    let err = store.replace_in_flight(Arc::new(shrunk)).unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation { .. }));

    // different message
    let other = next_revision(&in_flight_assistant(), "b");
    let err = store.replace_in_flight(other).unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation { .. }));

    assert_eq!(store.in_flight().unwrap().text(), "a");
}

#[test]
fn test_replace_without_in_flight_fails() {
    let mut store = TranscriptStore::new();
    let err = store
        .replace_in_flight(Arc::new(in_flight_assistant()))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation { .. }));
}

#[test]
fn test_finalize_freezes_and_releases_slot() {
    let mut store = TranscriptStore::new();
    let message = in_flight_assistant();
    let id = message.id.clone();
    store.append(Arc::new(message)).unwrap();

    let frozen = store.finalize(&id, Outcome::Completed).unwrap();
    assert_eq!(frozen.status, MessageStatus::Finalized);
    assert_eq!(frozen.outcome, Some(Outcome::Completed));
    assert!(store.in_flight().is_none());

    // a new turn is accepted once the previous one is terminal
    store.append(Arc::new(in_flight_assistant())).unwrap();

    let err = store.finalize(&id, Outcome::Cancelled).unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation { .. }));
}

#[test]
fn test_finalize_unknown_message() {
    let mut store = TranscriptStore::new();
    let err = store
        .finalize(&MessageId::from_string("nope"), Outcome::Completed)
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::NotFound {
            id: "nope".to_string()
        }
    );
}

#[test]
fn test_with_history_rejects_in_flight_messages() {
    let store =
        TranscriptStore::with_history(vec![Message::system("be brief"), Message::user("hi")])
            .unwrap();
    assert_eq!(store.len(), 2);

    let err = TranscriptStore::with_history(vec![in_flight_assistant()]).unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation { .. }));
}

#[test]
fn test_subscribers_see_monotonic_snapshots() {
    let mut store = TranscriptStore::new();
    let mut receiver = store.subscribe();
    assert_eq!(receiver.borrow_and_update().version, 0);

    let message = in_flight_assistant();
    let id = message.id.clone();
    store.append(Arc::new(message.clone())).unwrap();
    store
        .replace_in_flight(next_revision(&message, "partial"))
        .unwrap();

    assert!(receiver.has_changed().unwrap());
    let seen = receiver.borrow_and_update().clone();
    assert_eq!(seen.version, 2);
    assert_eq!(seen.in_flight().unwrap().text(), "partial");

    store.finalize(&id, Outcome::Completed).unwrap();
    let latest = receiver.borrow_and_update().clone();
    assert!(latest.version > seen.version);
    assert!(latest.in_flight().is_none());

    // the earlier snapshot is untouched
    assert!(seen.messages[0].is_in_flight());
}
