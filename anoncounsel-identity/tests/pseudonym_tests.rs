//! Pseudonym provisioning: stability, override semantics, and serialization
//! of concurrent first use.

use anoncounsel_identity::{
    JsonFileStore, KeyValueStore, MemoryStore, Pseudonym, PseudonymGenerator, PSEUDONYM_STORE_KEY,
    PSEUDONYM_TAG,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn generator() -> (Arc<MemoryStore>, PseudonymGenerator) {
    let store = Arc::new(MemoryStore::new());
    let generator = PseudonymGenerator::new(store.clone());
    (store, generator)
}

#[test]
fn get_or_create_is_stable_on_one_store() {
    let (_, generator) = generator();
    let first = generator.get_or_create().unwrap();
    let second = generator.get_or_create().unwrap();
    assert_eq!(first, second);
}

#[test]
fn independent_stores_get_different_pseudonyms() {
    let (_, a) = generator();
    let (_, b) = generator();
    assert_ne!(a.get_or_create().unwrap(), b.get_or_create().unwrap());
}

#[test]
fn pseudonym_survives_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");

    let first = PseudonymGenerator::new(Arc::new(JsonFileStore::open(&path).unwrap()))
        .get_or_create()
        .unwrap();
    let after_restart = PseudonymGenerator::new(Arc::new(JsonFileStore::open(&path).unwrap()))
        .get_or_create()
        .unwrap();

    assert_eq!(first, after_restart);
}

#[test]
fn explicit_value_is_trimmed_and_persisted() {
    let (store, generator) = generator();
    let set = generator.set_explicit("  anon-custom0001 \n").unwrap();

    assert_eq!(set.as_str(), "anon-custom0001");
    assert_eq!(generator.get_or_create().unwrap(), set);
    assert_eq!(
        store.get(PSEUDONYM_STORE_KEY).unwrap().as_deref(),
        Some("anon-custom0001")
    );
}

#[test]
fn untagged_explicit_value_is_tagged() {
    let (store, generator) = generator();
    let set = generator.set_explicit(" Kim Minji ").unwrap();

    assert_eq!(set.as_str(), "anon-Kim Minji");
    assert!(Pseudonym::is_pseudonym(set.as_str()));
    assert_eq!(
        store.get(PSEUDONYM_STORE_KEY).unwrap().as_deref(),
        Some("anon-Kim Minji")
    );
}

#[test]
fn blank_explicit_value_generates_fresh_pseudonym() {
    let (store, generator) = generator();
    let original = generator.get_or_create().unwrap();

    let replaced = generator.set_explicit("   ").unwrap();
    assert!(Pseudonym::is_pseudonym(replaced.as_str()));
    assert_ne!(replaced, original);
    assert_eq!(
        store.get(PSEUDONYM_STORE_KEY).unwrap().as_deref(),
        Some(replaced.as_str())
    );
}

#[test]
fn reset_provisions_a_new_pseudonym() {
    let (_, generator) = generator();
    let before = generator.get_or_create().unwrap();

    generator.reset().unwrap();
    let after = generator.get_or_create().unwrap();
    assert_ne!(before, after);
}

#[test]
fn concurrent_first_calls_agree_on_one_pseudonym() {
    let (store, generator) = generator();
    let generator = Arc::new(generator);
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let generator = Arc::clone(&generator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                generator.get_or_create().unwrap()
            })
        })
        .collect();

    let seen: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(seen.len(), 1);

    let persisted = store.get(PSEUDONYM_STORE_KEY).unwrap().unwrap();
    assert_eq!(seen.into_iter().next().unwrap().as_str(), persisted);
}

// ── Shared identity file ──

#[test]
fn second_handle_keeps_provisioned_pseudonym() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");
    let a = Arc::new(JsonFileStore::open(&path).unwrap());
    let b = Arc::new(JsonFileStore::open(&path).unwrap());

    let first = PseudonymGenerator::new(a).get_or_create().unwrap();
    b.put("local_role", "ADMIN").unwrap();
    assert_eq!(PseudonymGenerator::new(b).get_or_create().unwrap(), first);

    let after_restart = PseudonymGenerator::new(Arc::new(JsonFileStore::open(&path).unwrap()))
        .get_or_create()
        .unwrap();
    assert_eq!(after_restart, first);
}

#[test]
fn generators_on_separate_handles_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::new(JsonFileStore::open(&path).unwrap());
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                PseudonymGenerator::new(store).get_or_create().unwrap()
            })
        })
        .collect();

    let seen: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(seen.len(), 1);
}

#[test]
fn thousand_generations_have_no_collisions() {
    let seen: HashSet<_> = (0..1000).map(|_| Pseudonym::generate()).collect();
    assert_eq!(seen.len(), 1000);
}

proptest! {
    #[test]
    fn non_blank_overrides_roundtrip(value in "[a-z0-9@._-]{1,40}") {
        let (_, generator) = generator();
        let set = generator.set_explicit(&value).unwrap();
        let expected = if value.starts_with(PSEUDONYM_TAG) {
            value.clone()
        } else {
            format!("{PSEUDONYM_TAG}{value}")
        };
        prop_assert_eq!(set.as_str(), expected.as_str());
        prop_assert_eq!(generator.get_or_create().unwrap(), set);
    }
}
