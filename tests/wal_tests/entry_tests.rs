//! Tests for WAL Entry
//!
//! These tests verify:
//! - Serialization round trip of a full-snapshot record
//! - Checksum verification (bit flips, LSN tampering)
//! - Truncated input handling

use docstore::document::{Document, DocumentId, NewDocument};
use docstore::wal::{Operation, WalEntry, HEADER_SIZE};
use docstore::EngineError;

// =============================================================================
// Helper Functions
// =============================================================================

fn sample_document() -> Document {
    let input = NewDocument::new("/notes/wal.md", "WAL Notes", "append before apply")
        .with_tags(["storage", "durability"])
        .with_metadata("author", "ops");
    Document::from_new(DocumentId::new(), input, 1_700_000_000_000)
}

// =============================================================================
// Serialization Tests
// =============================================================================

#[test]
fn test_insert_entry_round_trip() {
    let entry = WalEntry::new(42, Operation::Insert { document: sample_document() });
    let bytes = entry.serialize().unwrap();

    assert!(bytes.len() > HEADER_SIZE);
    assert_eq!(&bytes[0..8], &42u64.to_le_bytes());

    let decoded = WalEntry::deserialize(&bytes).unwrap();
    assert_eq!(decoded, entry);
}

#[test]
fn test_delete_entry_carries_id_only() {
    let id = DocumentId::new();
    let entry = WalEntry::new(7, Operation::Delete { id, deleted_at: 99 });
    let delete_len = entry.serialize().unwrap().len();
    let insert_len = WalEntry::new(7, Operation::Insert { document: sample_document() })
        .serialize()
        .unwrap()
        .len();

    assert!(delete_len < insert_len);
    assert_eq!(entry.operation.document_id(), id);
    assert_eq!(entry.operation.kind(), "delete");
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_flipped_body_byte_is_corruption() {
    let entry = WalEntry::new(1, Operation::Update { document: sample_document() });
    let mut bytes = entry.serialize().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let err = WalEntry::deserialize(&bytes).unwrap_err();
    assert!(err.is_corruption(), "unexpected error: {err:?}");
}

#[test]
fn test_record_cannot_move_to_another_lsn() {
    let entry = WalEntry::new(5, Operation::Insert { document: sample_document() });
    let mut bytes = entry.serialize().unwrap();
    bytes[0..8].copy_from_slice(&6u64.to_le_bytes());

    assert!(matches!(WalEntry::deserialize(&bytes), Err(EngineError::Corruption(_))));
}

#[test]
fn test_truncated_record_is_corruption() {
    let entry = WalEntry::new(3, Operation::Insert { document: sample_document() });
    let bytes = entry.serialize().unwrap();

    assert!(WalEntry::deserialize(&bytes[..HEADER_SIZE - 1]).unwrap_err().is_corruption());
    assert!(WalEntry::deserialize(&bytes[..bytes.len() - 3]).unwrap_err().is_corruption());
}
