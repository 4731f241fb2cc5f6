//! Storage Primitive Tests
//!
//! Global properties and sequences, the key-value stores with their
//! block-wise iterator, and the FIFO/LIFO queues.

use crate::common::*;
use archivedb::core::{GlobalProperty, QueueOrigin};
use archivedb::prelude::*;
use archivedb::{Archive, Capabilities};

const USER_PROPERTY: GlobalProperty = GlobalProperty(2048);

// ============================================================================
// Global properties
// ============================================================================

#[test]
fn properties_default_until_set() {
    let archive = archive();

    assert_eq!(archive.lookup_global_property(USER_PROPERTY, true).unwrap(), None);
    assert_eq!(
        archive.get_global_property(USER_PROPERTY, true, "fallback").unwrap(),
        "fallback"
    );

    archive
        .set_global_property(USER_PROPERTY, true, "configured")
        .unwrap();
    assert_eq!(
        archive.lookup_global_property(USER_PROPERTY, true).unwrap().as_deref(),
        Some("configured")
    );
    assert_eq!(
        archive.get_global_property(USER_PROPERTY, true, "fallback").unwrap(),
        "configured"
    );
}

#[test]
fn shared_and_local_properties_are_distinct() {
    let archive = archive();
    archive.set_global_property(USER_PROPERTY, true, "shared").unwrap();
    archive.set_global_property(USER_PROPERTY, false, "local").unwrap();

    assert_eq!(
        archive.lookup_global_property(USER_PROPERTY, true).unwrap().as_deref(),
        Some("shared")
    );
    assert_eq!(
        archive.lookup_global_property(USER_PROPERTY, false).unwrap().as_deref(),
        Some("local")
    );
}

// ============================================================================
// Sequences
// ============================================================================

#[test]
fn sequences_start_at_one_and_count_up() {
    let archive = archive();
    let sequence = GlobalProperty::ANONYMIZATION_SEQUENCE;

    assert_eq!(archive.increment_global_sequence(sequence, true).unwrap(), 1);
    assert_eq!(archive.increment_global_sequence(sequence, true).unwrap(), 2);
    assert_eq!(archive.increment_global_sequence(sequence, true).unwrap(), 3);
}

#[test]
fn both_increment_strategies_agree() {
    let walk = |archive: &Archive| {
        let sequence = GlobalProperty::ANONYMIZATION_SEQUENCE;
        (0..4)
            .map(|_| archive.increment_global_sequence(sequence, true).unwrap())
            .collect::<Vec<u64>>()
    };

    let atomic = archive();
    let emulated = Archive::builder()
        .capabilities(Capabilities {
            atomic_increment: false,
            ..Capabilities::all()
        })
        .build()
        .unwrap();

    assert_eq!(walk(&atomic), walk(&emulated));
}

#[test]
fn a_corrupted_sequence_restarts() {
    let sequence = GlobalProperty::ANONYMIZATION_SEQUENCE;
    for atomic in [true, false] {
        let archive = Archive::builder()
            .capabilities(Capabilities {
                atomic_increment: atomic,
                ..Capabilities::all()
            })
            .build()
            .unwrap();
        archive
            .set_global_property(sequence, true, "not a number")
            .unwrap();
        assert_eq!(archive.increment_global_sequence(sequence, true).unwrap(), 1);
        assert_eq!(archive.increment_global_sequence(sequence, true).unwrap(), 2);
    }
}

// ============================================================================
// Key-value stores
// ============================================================================

#[test]
fn key_value_round_trip() {
    let archive = archive();
    archive.store_key_value("settings", b"theme", b"dark").unwrap();
    assert_eq!(
        archive.get_key_value("settings", b"theme").unwrap().as_deref(),
        Some(b"dark".as_slice())
    );

    // Overwrite, then delete.
    archive.store_key_value("settings", b"theme", b"light").unwrap();
    assert_eq!(
        archive.get_key_value("settings", b"theme").unwrap().as_deref(),
        Some(b"light".as_slice())
    );
    archive.delete_key_value("settings", b"theme").unwrap();
    assert_eq!(archive.get_key_value("settings", b"theme").unwrap(), None);

    // Stores with the same keys do not interfere.
    archive.store_key_value("other", b"theme", b"sepia").unwrap();
    assert_eq!(archive.get_key_value("settings", b"theme").unwrap(), None);
}

#[test]
fn iteration_pages_across_blocks() {
    let archive = archive();
    for n in 0..5u8 {
        archive
            .store_key_value("store", &[n], format!("value-{n}").as_bytes())
            .unwrap();
    }

    let mut iterator = archive.iterate_keys_values("store").unwrap();
    iterator.set_limit(2);

    let mut seen = Vec::new();
    while iterator.next().unwrap() {
        let (key, value) = iterator.current().unwrap();
        seen.push((key.to_vec(), value.to_vec()));
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[0].0, vec![0]);
    assert_eq!(seen[4].0, vec![4]);
    assert_eq!(seen[4].1, b"value-4".to_vec());

    // The cursor is spent once the end is reached.
    assert!(iterator.current().is_none());
    assert!(matches!(iterator.next(), Err(Error::BadSequenceOfCalls(_))));
}

#[test]
fn iterating_an_empty_store_finishes_immediately() {
    let archive = archive();
    let mut iterator = archive.iterate_keys_values("empty").unwrap();
    assert!(!iterator.next().unwrap());
    assert!(iterator.current().is_none());
}

#[test]
fn key_value_stores_require_backend_support() {
    let limited = Archive::builder()
        .capabilities(Capabilities {
            key_value_stores: false,
            ..Capabilities::all()
        })
        .build()
        .unwrap();
    assert!(matches!(
        limited.store_key_value("store", b"k", b"v"),
        Err(Error::NotImplemented(_))
    ));

    let archive = archive();
    assert!(matches!(
        archive.get_key_value("", b"k"),
        Err(Error::ParameterOutOfRange(_))
    ));
}

// ============================================================================
// Queues
// ============================================================================

#[test]
fn queues_serve_both_ends() {
    let archive = archive();
    for value in [b"a", b"b", b"c"] {
        archive.enqueue_value("jobs", value).unwrap();
    }
    assert_eq!(archive.get_queue_size("jobs").unwrap(), 3);

    assert_eq!(
        archive.dequeue_value("jobs", QueueOrigin::Front).unwrap().as_deref(),
        Some(b"a".as_slice())
    );
    assert_eq!(
        archive.dequeue_value("jobs", QueueOrigin::Back).unwrap().as_deref(),
        Some(b"c".as_slice())
    );
    assert_eq!(archive.get_queue_size("jobs").unwrap(), 1);

    assert_eq!(
        archive.dequeue_value("jobs", QueueOrigin::Front).unwrap().as_deref(),
        Some(b"b".as_slice())
    );
    assert_eq!(archive.dequeue_value("jobs", QueueOrigin::Front).unwrap(), None);
    assert_eq!(archive.get_queue_size("jobs").unwrap(), 0);
}

#[test]
fn queues_require_backend_support() {
    let limited = Archive::builder()
        .capabilities(Capabilities {
            queues: false,
            ..Capabilities::all()
        })
        .build()
        .unwrap();
    assert!(matches!(
        limited.enqueue_value("jobs", b"a"),
        Err(Error::NotImplemented(_))
    ));

    let archive = archive();
    assert!(matches!(
        archive.get_queue_size(""),
        Err(Error::ParameterOutOfRange(_))
    ));
}
