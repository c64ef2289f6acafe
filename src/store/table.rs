//! Document table
//!
//! HashMap-based slot table with per-slot sequence numbers for idempotent replay.

use std::collections::hash_map;
use std::collections::HashMap;

use crate::document::{Document, DocumentId};
use crate::error::{EngineError, Result};

use super::Slot;

/// In-memory document table
#[derive(Debug, Default)]
pub struct DocumentStore {
    slots: HashMap<DocumentId, Slot>,
    live: usize,
    content_bytes: u64,
}

impl DocumentStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a live document
    ///
    /// Fails with `NotFound` if the id is unknown or tombstoned.
    pub fn get(&self, id: &DocumentId) -> Result<&Document> {
        match self.slots.get(id) {
            Some(Slot::Live { document, .. }) => Ok(document),
            _ => Err(EngineError::document_not_found(id)),
        }
    }

    /// Upsert a document produced by the mutation at `seq`
    ///
    /// Returns `false` without touching anything if the slot already reflects
    /// `seq` or a later mutation.
    pub fn put(&mut self, document: Document, seq: u64) -> bool {
        if self.applied_seq(&document.id).is_some_and(|applied| applied >= seq) {
            return false;
        }

        let added = document.content.len() as u64;
        let previous = self.slots.insert(document.id, Slot::Live { document, seq });
        match previous {
            Some(Slot::Live { document: old, .. }) => {
                self.content_bytes -= old.content.len() as u64;
            }
            _ => self.live += 1,
        }
        self.content_bytes += added;
        true
    }

    /// Tombstone a document at `seq`
    ///
    /// Fails with `NotFound` if there is no live document, unless the slot
    /// already reflects `seq` or later (a replayed delete), which is `Ok(false)`.
    pub fn delete(&mut self, id: &DocumentId, seq: u64, deleted_at: u64) -> Result<bool> {
        let slot = match self.slots.get_mut(id) {
            Some(slot) => slot,
            None => return Err(EngineError::document_not_found(id)),
        };
        if slot.seq() >= seq {
            return Ok(false);
        }
        let old = std::mem::replace(slot, Slot::Tombstone { seq, deleted_at });
        match old {
            Slot::Live { document, .. } => {
                self.live -= 1;
                self.content_bytes -= document.content.len() as u64;
                Ok(true)
            }
            tombstone @ Slot::Tombstone { .. } => {
                *slot = tombstone;
                Err(EngineError::document_not_found(id))
            }
        }
    }

    /// Whether `id` refers to a live document
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.slots.get(id).is_some_and(Slot::is_live)
    }

    /// Raw slot access (live or tombstone)
    pub fn slot(&self, id: &DocumentId) -> Option<&Slot> {
        self.slots.get(id)
    }

    /// LSN of the last mutation applied to `id`
    pub fn applied_seq(&self, id: &DocumentId) -> Option<u64> {
        self.slots.get(id).map(Slot::seq)
    }

    /// Iterate over live documents (unordered)
    pub fn scan(&self) -> Scan<'_> {
        Scan {
            inner: self.slots.iter(),
        }
    }

    /// Drop all tombstones; returns how many were removed
    pub fn purge_tombstones(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live());
        before - self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn tombstone_count(&self) -> usize {
        self.slots.len() - self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Sum of content sizes of live documents
    pub fn total_content_bytes(&self) -> u64 {
        self.content_bytes
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.live = 0;
        self.content_bytes = 0;
    }
}

/// Lazy iterator over live documents with the LSN that produced them
pub struct Scan<'a> {
    inner: hash_map::Iter<'a, DocumentId, Slot>,
}

impl<'a> Iterator for Scan<'a> {
    type Item = (&'a Document, u64);

    fn next(&mut self) -> Option<Self::Item> {
        for (_, slot) in self.inner.by_ref() {
            if let Slot::Live { document, seq } = slot {
                return Some((document, *seq));
            }
        }
        None
    }
}
