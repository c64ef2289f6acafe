//! Index Module
//!
//! Secondary indexes kept in lockstep with the document store.
//!
//! ## Responsibilities
//! - Trigram inverted index for ranked substring / full-text search
//! - B+tree over paths for exact, prefix and range lookups
//!
//! Both indexes hold only `DocumentId`s; the store owns document contents.
//! Neither is persisted: they are rebuilt from the store on open and then
//! maintained by WAL replay and live mutations.

pub mod btree;
pub mod trigram;

pub use btree::{PathIndex, PathRange};
pub use trigram::{extract_trigrams, normalize_text, Trigram, TrigramIndex};
