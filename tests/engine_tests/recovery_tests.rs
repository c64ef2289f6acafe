//! Tests for Engine recovery
//!
//! These tests verify:
//! - Torn tail after a crash mid-append
//! - Replay idempotence (reopen repeatedly, replay from empty)
//! - Checkpoints: snapshot + WAL truncation, automatic and on close
//! - A failed automatic checkpoint never fails the committed mutation
//! - Safe mode on mid-log corruption, and corrupt snapshots

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;

use docstore::config::{Config, WalSyncStrategy};
use docstore::document::{Document, DocumentPatch, NewDocument};
use docstore::engine::Engine;
use docstore::wal::FILE_HEADER_SIZE;
use docstore::EngineError;
use tempfile::TempDir;

use super::{init_tracing, test_config};

// =============================================================================
// Helper Functions
// =============================================================================

fn no_checkpoint_config(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .checkpoint_on_close(false)
        .btree_order(4)
        .build()
}

/// Every live document keyed by path
fn contents(engine: &Engine) -> BTreeMap<String, Document> {
    engine
        .list_prefix("")
        .into_iter()
        .map(|doc| (doc.path.clone(), doc))
        .collect()
}

/// A mix of inserts, updates and deletes
fn run_workload(engine: &Engine) {
    let mut ids = Vec::new();
    for i in 0..30 {
        let input = NewDocument::new(format!("/w/{:02}.md", i), format!("Doc {}", i), format!("workload body {}", i))
            .with_tags([if i % 2 == 0 { "even" } else { "odd" }]);
        ids.push(engine.insert(input).unwrap());
    }
    for id in ids.iter().step_by(3) {
        engine.update(*id, DocumentPatch::new().content("rewritten body")).unwrap();
    }
    for id in ids.iter().step_by(5) {
        engine.delete(*id).unwrap();
    }
    engine.update(ids[1], DocumentPatch::new().path("/w/moved.md")).unwrap();
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[test]
fn test_torn_tail_recovers_all_complete_inserts() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 100 })
        .checkpoint_on_close(false)
        .build();

    let wal_path = {
        let engine = Engine::open(config.clone()).unwrap();
        for i in 0..1000 {
            engine
                .insert(NewDocument::new(format!("/bulk/{:04}.md", i), "Bulk", format!("entry {}", i)))
                .unwrap();
        }
        engine.wal_path()
        // Dropped without close: simulated crash
    };

    // The 1,001st append died after writing its header and part of its body
    {
        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&1001u64.to_le_bytes()).unwrap();
        file.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        file.write_all(&4096u32.to_le_bytes()).unwrap();
        file.write_all(&[0x42; 100]).unwrap();
    }

    let engine = Engine::open(config).unwrap();
    let stats = engine.stats();
    assert_eq!(stats.document_count, 1000);
    assert_eq!(stats.last_sequence, 1000);
    assert!(!engine.is_read_only());
    assert_eq!(engine.get_by_path("/bulk/0999.md").unwrap().content, b"entry 999");

    let next = engine.apply(docstore::Mutation::Insert(NewDocument::new("/bulk/next.md", "Bulk", "next"))).unwrap();
    assert_eq!(next, 1001);
}

#[test]
fn test_reopen_is_idempotent() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let expected = {
        let engine = Engine::open(no_checkpoint_config(&temp_dir)).unwrap();
        run_workload(&engine);
        contents(&engine)
    };

    for _ in 0..3 {
        let engine = Engine::open(no_checkpoint_config(&temp_dir)).unwrap();
        assert_eq!(contents(&engine), expected);
        engine.verify_integrity().unwrap();
        engine.close().unwrap();
    }
}

#[test]
fn test_replay_from_empty_reproduces_state() {
    init_tracing();
    let source = TempDir::new().unwrap();
    let (expected, expected_hits) = {
        let engine = Engine::open(no_checkpoint_config(&source)).unwrap();
        run_workload(&engine);
        let hits: Vec<String> = engine
            .query("rewritten", 100, None)
            .unwrap()
            .into_iter()
            .map(|hit| hit.document.path)
            .collect();
        (contents(&engine), hits)
    };

    let replica = TempDir::new().unwrap();
    fs::copy(source.path().join("wal.log"), replica.path().join("wal.log")).unwrap();

    let engine = Engine::open(no_checkpoint_config(&replica)).unwrap();
    assert_eq!(contents(&engine), expected);

    let hits: Vec<String> = engine
        .query("rewritten", 100, None)
        .unwrap()
        .into_iter()
        .map(|hit| hit.document.path)
        .collect();
    assert_eq!(hits, expected_hits);
    engine.verify_integrity().unwrap();
}

// =============================================================================
// Checkpoint Tests
// =============================================================================

#[test]
fn test_checkpoint_truncates_wal_and_survives_reopen() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(no_checkpoint_config(&temp_dir)).unwrap();
        run_workload(&engine);
        engine.checkpoint().unwrap();

        let stats = engine.stats();
        assert_eq!(stats.wal_size_bytes, FILE_HEADER_SIZE);
        assert_eq!(stats.tombstone_count, 0);

        engine.insert(NewDocument::new("/after.md", "After", "post checkpoint")).unwrap();
    }

    let engine = Engine::open(no_checkpoint_config(&temp_dir)).unwrap();
    assert!(engine.get_by_path("/after.md").is_ok());
    assert!(engine.get_by_path("/w/moved.md").is_ok());
    assert_eq!(engine.stats().document_count, 30 - 6 + 1);
    engine.verify_integrity().unwrap();
}

#[test]
fn test_sequence_continues_when_wal_is_missing() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(test_config(&temp_dir)).unwrap();
        for i in 0..10 {
            engine.insert(NewDocument::new(format!("/{}.md", i), "T", "text")).unwrap();
        }
        engine.close().unwrap();
    }
    fs::remove_file(temp_dir.path().join("wal.log")).unwrap();

    let engine = Engine::open(test_config(&temp_dir)).unwrap();
    assert_eq!(engine.stats().document_count, 10);
    let lsn = engine
        .apply(docstore::Mutation::Insert(NewDocument::new("/11.md", "T", "text")))
        .unwrap();
    assert_eq!(lsn, 11);
}

#[test]
fn test_automatic_checkpoint_bounds_wal() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .checkpoint_wal_bytes(4 * 1024)
        .build();
    let engine = Engine::open(config.clone()).unwrap();

    for i in 0..100 {
        engine
            .insert(NewDocument::new(format!("/auto/{}.md", i), "Auto", "x".repeat(200)))
            .unwrap();
        assert!(engine.stats().wal_size_bytes <= 4 * 1024);
    }
    assert!(engine.snapshot_path().exists());
    drop(engine);

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.stats().document_count, 100);
}

#[test]
fn test_failed_automatic_checkpoint_keeps_mutation_committed() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .checkpoint_wal_bytes(1)
        .checkpoint_on_close(false)
        .build();
    let engine = Engine::open(config.clone()).unwrap();

    // The snapshot cannot be written while its temp path is a directory
    let blocker = temp_dir.path().join("snapshot.db.tmp");
    fs::create_dir(&blocker).unwrap();

    let id = engine.insert(NewDocument::new("/a.md", "A", "alpha")).unwrap();
    assert_eq!(engine.get_by_path("/a.md").unwrap().id, id);
    assert!(!engine.is_read_only());
    assert!(engine.checkpoint().is_err());

    let err = engine.insert(NewDocument::new("/a.md", "A", "again")).unwrap_err();
    assert!(matches!(err, EngineError::Conflict { existing, .. } if existing == id));

    let second = engine.insert(NewDocument::new("/b.md", "B", "beta")).unwrap();
    assert_eq!(engine.stats().write_latency.writes, 2);
    drop(engine);

    fs::remove_dir(&blocker).unwrap();
    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.stats().document_count, 2);
    assert_eq!(engine.get(id).unwrap().content, b"alpha");
    assert_eq!(engine.get(second).unwrap().path, "/b.md");
}

// =============================================================================
// Safe Mode Tests
// =============================================================================

#[test]
fn test_mid_log_corruption_opens_read_only() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(no_checkpoint_config(&temp_dir)).unwrap();
        for i in 0..6 {
            engine.insert(NewDocument::new(format!("/{}.md", i), "T", "same size")).unwrap();
        }
    }

    // Damage the body of the third record
    let wal_path = temp_dir.path().join("wal.log");
    let mut bytes = fs::read(&wal_path).unwrap();
    let record_len = (bytes.len() - FILE_HEADER_SIZE as usize) / 6;
    let offset = FILE_HEADER_SIZE as usize + 2 * record_len + record_len / 2;
    bytes[offset] ^= 0xFF;
    fs::write(&wal_path, bytes).unwrap();

    let engine = Engine::open(no_checkpoint_config(&temp_dir)).unwrap();
    assert!(engine.is_read_only());
    assert!(engine.read_only_reason().is_some());
    assert_eq!(engine.stats().document_count, 2);
    assert!(engine.get_by_path("/1.md").is_ok());

    let err = engine.insert(NewDocument::new("/new.md", "T", "text")).unwrap_err();
    assert!(matches!(err, EngineError::ReadOnly(_)));
    assert!(matches!(engine.checkpoint(), Err(EngineError::ReadOnly(_))));

    engine.resume_writes();
    assert!(!engine.is_read_only());
    engine.insert(NewDocument::new("/new.md", "T", "text")).unwrap();
}

#[test]
fn test_corrupt_snapshot_fails_open() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(test_config(&temp_dir)).unwrap();
        engine.insert(NewDocument::new("/a.md", "A", "snapshot me")).unwrap();
        engine.close().unwrap();
    }

    let snapshot_path = temp_dir.path().join("snapshot.db");
    let mut bytes = fs::read(&snapshot_path).unwrap();
    bytes[30] ^= 0xFF;
    fs::write(&snapshot_path, bytes).unwrap();

    let err = Engine::open(test_config(&temp_dir)).err().unwrap();
    assert!(err.is_corruption());
}
