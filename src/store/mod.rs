//! Store Module
//!
//! Source of truth for document contents.
//!
//! ## Responsibilities
//! - Map document id → latest document version (or tombstone)
//! - Idempotent upsert/delete keyed by WAL sequence number
//! - Lazy scan of live documents for index rebuilds and checkpoints
//! - Checkpoint snapshots so the WAL prefix can be truncated
//!
//! ## Data Structure Choice
//! A `HashMap` of slots: point lookups dominate, ordering is provided by the
//! path index. The store is not internally synchronized; the engine guards it
//! together with both indexes so readers never see them disagree.

mod table;
mod snapshot;

pub use table::{DocumentStore, Scan};
pub use snapshot::{Snapshot, SnapshotReader, SnapshotWriter};

use crate::document::Document;

/// Entry stored per document id
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// A live document and the LSN that produced it
    Live { document: Document, seq: u64 },

    /// A deleted document; kept until the next checkpoint
    Tombstone { seq: u64, deleted_at: u64 },
}

impl Slot {
    /// LSN of the last mutation applied to this id
    pub fn seq(&self) -> u64 {
        match self {
            Slot::Live { seq, .. } | Slot::Tombstone { seq, .. } => *seq,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Slot::Live { .. })
    }
}
