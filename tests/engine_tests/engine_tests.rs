//! Tests for Engine
//!
//! These tests verify:
//! - Insert/get/update/delete semantics and validation
//! - Path uniqueness across insert and update
//! - Query ranking, limits and tag filters
//! - Path lookups, stats and lifecycle (open/close)

use docstore::config::Config;
use docstore::document::{DocumentId, DocumentPatch, NewDocument};
use docstore::engine::{Engine, Mutation};
use docstore::EngineError;
use tempfile::TempDir;

use super::{init_tracing, setup_temp_engine, test_config};

// =============================================================================
// Helper Functions
// =============================================================================

fn validation_field(err: EngineError) -> &'static str {
    match err {
        EngineError::Validation { field, .. } => field,
        other => panic!("expected validation error, got {other:?}"),
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_open_creates_data_dir_and_wal() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("nested").join("db");

    let engine = Engine::open(Config::builder().data_dir(&data_dir).build()).unwrap();

    assert!(data_dir.exists());
    assert!(engine.wal_path().exists());
    assert!(!engine.is_read_only());
}

#[test]
fn test_open_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).max_query_limit(0).build();

    assert!(matches!(Engine::open(config), Err(EngineError::Config(_))));
}

#[test]
fn test_close_writes_checkpoint() {
    let (temp_dir, engine) = setup_temp_engine();
    engine.insert(NewDocument::new("/a.md", "A", "alpha")).unwrap();
    let snapshot_path = engine.snapshot_path();
    engine.close().unwrap();

    assert!(snapshot_path.exists());

    let engine = Engine::open(test_config(&temp_dir)).unwrap();
    assert_eq!(engine.stats().document_count, 1);
    assert_eq!(engine.get_by_path("/a.md").unwrap().content, b"alpha");
}

// =============================================================================
// Insert / Get Tests
// =============================================================================

#[test]
fn test_insert_then_get_returns_equal_document() {
    let (_temp, engine) = setup_temp_engine();
    let input = NewDocument::new("/notes/rust.md", "Rust", "borrow checker")
        .with_tags(["lang", "systems"])
        .with_metadata("lang", "en");

    let id = engine.insert(input.clone()).unwrap();
    let doc = engine.get(id).unwrap();

    assert_eq!(doc.id, id);
    assert_eq!(doc.path, input.path);
    assert_eq!(doc.title, input.title);
    assert_eq!(doc.content, input.content);
    assert_eq!(doc.tags, input.tags);
    assert_eq!(doc.metadata, input.metadata);
    assert_eq!(doc.size, input.content.len());
    assert_eq!(doc.created_at, doc.updated_at);
}

#[test]
fn test_get_unknown_is_not_found() {
    let (_temp, engine) = setup_temp_engine();
    assert!(matches!(engine.get(DocumentId::new()), Err(EngineError::NotFound { .. })));
}

#[test]
fn test_insert_names_first_missing_field() {
    let (_temp, engine) = setup_temp_engine();

    let err = engine.insert(NewDocument::new("", "", "")).unwrap_err();
    assert_eq!(validation_field(err), "path");

    let err = engine.insert(NewDocument::new("/x.md", "", "body")).unwrap_err();
    assert_eq!(validation_field(err), "title");

    let err = engine.insert(NewDocument::new("/x.md", "X", "")).unwrap_err();
    assert_eq!(validation_field(err), "content");

    assert_eq!(engine.stats().last_sequence, 0);
}

#[test]
fn test_insert_rejects_oversized_content() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).max_document_size(8).build();
    let engine = Engine::open(config).unwrap();

    let err = engine.insert(NewDocument::new("/big.md", "Big", "123456789")).unwrap_err();
    assert_eq!(validation_field(err), "content");
}

#[test]
fn test_duplicate_path_is_conflict() {
    let (_temp, engine) = setup_temp_engine();
    let first = engine.insert(NewDocument::new("/a.md", "A", "one")).unwrap();

    match engine.insert(NewDocument::new("/a.md", "B", "two")) {
        Err(EngineError::Conflict { path, existing }) => {
            assert_eq!(path, "/a.md");
            assert_eq!(existing, first);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(engine.stats().document_count, 1);
}

#[test]
fn test_timestamps_strictly_increase() {
    let (_temp, engine) = setup_temp_engine();
    let a = engine.insert(NewDocument::new("/a.md", "A", "a")).unwrap();
    let b = engine.insert(NewDocument::new("/b.md", "B", "b")).unwrap();

    assert!(engine.get(b).unwrap().created_at > engine.get(a).unwrap().created_at);
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_update_bumps_updated_at_only() {
    let (_temp, engine) = setup_temp_engine();
    let id = engine.insert(NewDocument::new("/a.md", "A", "first")).unwrap();
    let before = engine.get(id).unwrap();

    let after = engine
        .update(id, DocumentPatch::new().content("second version").tags(["edited"]))
        .unwrap();

    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at > before.updated_at);
    assert_eq!(after.size, "second version".len());
    assert!(after.tags.contains("edited"));
    assert_eq!(engine.get(id).unwrap(), after);
}

#[test]
fn test_update_moves_path() {
    let (_temp, engine) = setup_temp_engine();
    let id = engine.insert(NewDocument::new("/old.md", "A", "body")).unwrap();

    engine.update(id, DocumentPatch::new().path("/new.md")).unwrap();

    assert_eq!(engine.get_by_path("/new.md").unwrap().id, id);
    assert!(matches!(engine.get_by_path("/old.md"), Err(EngineError::NotFound { .. })));
}

#[test]
fn test_update_onto_taken_path_leaves_both_entries() {
    let (_temp, engine) = setup_temp_engine();
    let a = engine.insert(NewDocument::new("/a.md", "A", "aaa")).unwrap();
    let b = engine.insert(NewDocument::new("/b.md", "B", "bbb")).unwrap();

    let err = engine.update(b, DocumentPatch::new().path("/a.md")).unwrap_err();
    assert!(matches!(err, EngineError::Conflict { existing, .. } if existing == a));

    assert_eq!(engine.get_by_path("/a.md").unwrap().id, a);
    assert_eq!(engine.get_by_path("/b.md").unwrap().id, b);
    engine.verify_integrity().unwrap();
}

#[test]
fn test_update_unknown_and_empty_patch() {
    let (_temp, engine) = setup_temp_engine();
    let unknown = engine.update(DocumentId::new(), DocumentPatch::new().title("T"));
    assert!(matches!(unknown, Err(EngineError::NotFound { .. })));

    let id = engine.insert(NewDocument::new("/a.md", "A", "a")).unwrap();
    assert_eq!(validation_field(engine.update(id, DocumentPatch::new()).unwrap_err()), "patch");
    assert_eq!(
        validation_field(engine.update(id, DocumentPatch::new().title(" ")).unwrap_err()),
        "title"
    );
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_removes_from_both_indexes() {
    let (_temp, engine) = setup_temp_engine();
    let id = engine.insert(NewDocument::new("/gone.md", "Gone", "ephemeral words")).unwrap();

    assert!(engine.delete(id).unwrap());

    assert!(engine.get(id).is_err());
    assert!(engine.get_by_path("/gone.md").is_err());
    assert!(engine.query("ephemeral", 10, None).unwrap().is_empty());
    let stats = engine.stats();
    assert_eq!(stats.document_count, 0);
    assert_eq!(stats.tombstone_count, 1);
    assert_eq!(stats.posting_count, 0);
    assert_eq!(stats.path_index_entries, 0);
}

#[test]
fn test_delete_absent_returns_false() {
    let (_temp, engine) = setup_temp_engine();
    assert!(!engine.delete(DocumentId::new()).unwrap());

    let id = engine.insert(NewDocument::new("/a.md", "A", "a")).unwrap();
    assert!(engine.delete(id).unwrap());
    assert!(!engine.delete(id).unwrap());
}

#[test]
fn test_path_reusable_after_delete() {
    let (_temp, engine) = setup_temp_engine();
    let first = engine.insert(NewDocument::new("/a.md", "A", "one")).unwrap();
    engine.delete(first).unwrap();

    let second = engine.insert(NewDocument::new("/a.md", "A", "two")).unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.get_by_path("/a.md").unwrap().id, second);
}

// =============================================================================
// Query Tests
// =============================================================================

#[test]
fn test_query_ranks_and_returns_documents() {
    let (_temp, engine) = setup_temp_engine();
    let strong = engine
        .insert(NewDocument::new("/s.md", "Storage", "storage engines store data in storage files"))
        .unwrap();
    let weak = engine
        .insert(NewDocument::new("/w.md", "Misc", "a story about a store"))
        .unwrap();

    let hits = engine.query("storage", 10, None).unwrap();

    assert_eq!(hits[0].document.id, strong);
    assert!(hits.iter().any(|h| h.document.id == weak));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn test_query_limit_is_validated() {
    let (_temp, engine) = setup_temp_engine();

    assert_eq!(validation_field(engine.query("abc", 0, None).unwrap_err()), "limit");
    assert_eq!(validation_field(engine.query("abc", 1001, None).unwrap_err()), "limit");
    assert!(engine.query("abc", 1000, None).unwrap().is_empty());
}

#[test]
fn test_query_tag_filter_requires_all_tags() {
    let (_temp, engine) = setup_temp_engine();
    let both = engine
        .insert(NewDocument::new("/1.md", "One", "shared text").with_tags(["a", "b"]))
        .unwrap();
    engine
        .insert(NewDocument::new("/2.md", "Two", "shared text").with_tags(["a"]))
        .unwrap();

    let tags = vec!["a".to_string(), "b".to_string()];
    let hits = engine.query("shared", 10, Some(&tags)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.id, both);

    let only_a = vec!["a".to_string()];
    assert_eq!(engine.query("shared", 10, Some(&only_a)).unwrap().len(), 2);
}

// =============================================================================
// Path API Tests
// =============================================================================

#[test]
fn test_list_prefix_is_ordered() {
    let (_temp, engine) = setup_temp_engine();
    for name in ["c", "a", "b"] {
        engine
            .insert(NewDocument::new(format!("/docs/{}.md", name), name, "text"))
            .unwrap();
    }
    engine.insert(NewDocument::new("/other/z.md", "z", "text")).unwrap();

    let paths: Vec<String> = engine.list_prefix("/docs/").into_iter().map(|d| d.path).collect();
    assert_eq!(paths, vec!["/docs/a.md", "/docs/b.md", "/docs/c.md"]);
}

// =============================================================================
// Apply / Stats Tests
// =============================================================================

#[test]
fn test_apply_returns_sequence_numbers() {
    let (_temp, engine) = setup_temp_engine();
    let lsn1 = engine.apply(Mutation::Insert(NewDocument::new("/a.md", "A", "a"))).unwrap();
    let id = engine.get_by_path("/a.md").unwrap().id;
    let lsn2 = engine
        .apply(Mutation::Update { id, patch: DocumentPatch::new().title("A2") })
        .unwrap();
    let lsn3 = engine.apply(Mutation::Delete { id }).unwrap();

    assert_eq!((lsn1, lsn2, lsn3), (1, 2, 3));
    assert_eq!(engine.stats().last_sequence, 3);
}

#[test]
fn test_stats_reflect_contents() {
    let (_temp, engine) = setup_temp_engine();
    engine.insert(NewDocument::new("/a.md", "A", "hello")).unwrap();
    engine.insert(NewDocument::new("/b.md", "B", "world!")).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.document_count, 2);
    assert_eq!(stats.total_content_bytes, 11);
    assert_eq!(stats.path_index_entries, 2);
    assert!(stats.trigram_count > 0);
    assert!(stats.wal_size_bytes > 0);
    assert!(!stats.read_only);
}
