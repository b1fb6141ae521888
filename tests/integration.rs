use std::sync::{Arc, Barrier};
use std::thread;

use chunkvault::{MemMetaStore, Store, StoreConfig};
use rand::prelude::*;
use tempfile::tempdir;

fn open_store(dir: &std::path::Path, max_chunk_size: usize) -> Store {
    let config = StoreConfig::new(dir, max_chunk_size);
    Store::open(config, Box::new(MemMetaStore::new(chunkvault::SHARD_COUNT))).unwrap()
}

#[test]
fn test_thousand_chunks_round_trip_under_iteration() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path(), 256);

    let mut rng = rand::rng();
    let mut expected = Vec::new();
    for i in 0..1000u32 {
        let mut addr = vec![0u8; 32];
        rng.fill_bytes(&mut addr);
        let payload = format!("chunk-{i}").into_bytes();
        store.put(&addr, &payload).unwrap();
        expected.push((addr, payload));
    }

    assert_eq!(store.count().unwrap(), 1000);

    for (addr, payload) in &expected {
        assert_eq!(&store.get(addr).unwrap(), payload);
    }

    let mut seen = 0;
    store
        .iterate(|_chunk| {
            seen += 1;
            Ok(true)
        })
        .unwrap();
    assert_eq!(seen, 1000);
}

#[test]
fn test_concurrent_puts_to_distinct_addresses_all_land() {
    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(dir.path(), 64));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..50u8 {
                    let addr = vec![t, i];
                    store.put(&addr, format!("t{t}-i{i}").as_bytes()).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.count().unwrap(), 8 * 50);
    for t in 0..8u8 {
        for i in 0..50u8 {
            let addr = vec![t, i];
            assert_eq!(store.get(&addr).unwrap(), format!("t{t}-i{i}").into_bytes());
        }
    }
}

#[test]
fn test_delete_then_put_reuses_freed_slot_same_shard() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path(), 32);

    // Same last byte => same shard.
    let a = vec![1, 0];
    let b = vec![2, 0];
    store.put(&a, b"first").unwrap();
    store.put(&b, b"second").unwrap();

    let path = dir.path().join("chunks-0.db");
    let size_before = std::fs::metadata(&path).unwrap().len();

    store.delete(&a).unwrap();
    let c = vec![3, 0];
    store.put(&c, b"third").unwrap();

    let size_after = std::fs::metadata(&path).unwrap().len();
    assert_eq!(size_before, size_after, "reclaimed slot must not grow the file");
    assert_eq!(store.get(&c).unwrap(), b"third");
    assert_eq!(store.get(&b).unwrap(), b"second");
}

#[test]
fn test_close_drains_in_flight_iteration_before_returning() {
    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(dir.path(), 32));

    for i in 0..200u16 {
        let addr = vec![(i % 256) as u8, (i / 256) as u8];
        store.put(&addr, b"payload").unwrap();
    }

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let mut seen = 0;
            store
                .iterate(|_chunk| {
                    thread::sleep(std::time::Duration::from_micros(200));
                    seen += 1;
                    Ok(true)
                })
                .unwrap();
            seen
        })
    };

    thread::sleep(std::time::Duration::from_millis(5));
    store.close().unwrap();

    let seen = reader.join().unwrap();
    assert_eq!(seen, 200);
}

#[test]
fn test_operations_after_close_return_closed_error() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path(), 32);
    store.close().unwrap();

    assert!(store.put(&[1], b"x").is_err());
    assert!(store.get(&[1]).is_err());
    assert!(store.has(&[1]).is_err());
    assert!(store.delete(&[1]).is_err());
    assert!(store.count().is_err());
}
