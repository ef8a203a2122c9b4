#![allow(missing_docs)]
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use otp_core::pad_generator::generate_pad_file;
use otp_core::{PadError, PadPaths, PadStore};
use tempfile::{TempDir, tempdir};

fn vault(pages: usize) -> (TempDir, PadPaths) {
    let dir = tempdir().expect("Failed to create temp dir");
    let paths = PadPaths::in_dir(dir.path());
    generate_pad_file(&paths.pad_file, pages, 128).expect("Failed to generate pad");
    (dir, paths)
}

#[test]
fn test_sequential_claims_follow_file_order() {
    let (_dir, paths) = vault(5);
    let store = PadStore::open(paths).unwrap();
    let expected: Vec<String> = store.pages().iter().map(|p| p.id().to_string()).collect();

    let claimed: Vec<String> = (0..5)
        .map(|_| store.claim_next_unused_page().unwrap().id().to_string())
        .collect();
    assert_eq!(claimed, expected);
}

#[test]
fn test_concurrent_claims_on_shared_store_are_distinct() {
    let (_dir, paths) = vault(200);
    let store = Arc::new(PadStore::open(paths).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..25)
                    .map(|_| store.claim_next_unused_page().unwrap().id().to_string())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id.clone()), "page {id} was handed out twice");
        }
    }
    assert_eq!(seen.len(), 200);
    assert!(matches!(store.claim_next_unused_page(), Err(PadError::Exhausted)));
}

#[test]
fn test_independent_stores_on_one_vault_never_collide() {
    // Each store has its own in-memory state, like separate processes, and
    // only the lock file and the consumed record are shared.
    let (_dir, paths) = vault(120);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let paths = paths.clone();
            thread::spawn(move || {
                let store = PadStore::open(paths).unwrap();
                let mut ids = Vec::new();
                loop {
                    match store.claim_next_unused_page() {
                        Ok(page) => ids.push(page.id().to_string()),
                        Err(PadError::Exhausted) => break ids,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id.clone()), "page {id} was handed out twice");
        }
    }
    assert_eq!(seen.len(), 120);

    let record = std::fs::read_to_string(&paths.consumed_file).unwrap();
    assert_eq!(record.lines().count(), 120);
}

#[test]
fn test_exhaustion_is_deterministic_and_survives_restart() {
    let (_dir, paths) = vault(3);
    {
        let store = PadStore::open(paths.clone()).unwrap();
        for _ in 0..3 {
            store.claim_next_unused_page().unwrap();
        }
        for _ in 0..3 {
            assert!(matches!(store.claim_next_unused_page(), Err(PadError::Exhausted)));
        }
    }

    let restarted = PadStore::open(paths).unwrap();
    assert!(matches!(restarted.claim_next_unused_page(), Err(PadError::Exhausted)));
    let status = restarted.status().unwrap();
    assert_eq!((status.total_pages, status.consumed_pages, status.remaining_pages), (3, 3, 0));
}

#[test]
fn test_receiver_consumption_is_honoured_by_sender() {
    let (_dir, paths) = vault(3);
    let sender = PadStore::open(paths.clone()).unwrap();
    let receiver = PadStore::open(paths).unwrap();
    let first = sender.pages()[0].id().to_string();
    let second = sender.pages()[1].id().to_string();

    assert!(receiver.mark_identifier_consumed(&first).unwrap());
    assert!(!receiver.mark_identifier_consumed(&first).unwrap());
    assert!(sender.is_consumed(&first).unwrap());

    let claimed = sender.claim_next_unused_page().unwrap();
    assert_eq!(claimed.id().as_str(), second);
}

#[test]
fn test_mark_rejects_malformed_identifier() {
    let (_dir, paths) = vault(1);
    let store = PadStore::open(paths).unwrap();
    assert!(matches!(
        store.mark_identifier_consumed("BAD|ID!!"),
        Err(PadError::InvalidPageId(_))
    ));
}

#[test]
fn test_missing_pad_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        PadStore::open_dir(dir.path()),
        Err(PadError::Io { .. })
    ));
}
