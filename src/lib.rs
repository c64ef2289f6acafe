//! # DocStore
//!
//! An embedded document store with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with torn-write handling and idempotent replay
//! - Trigram full-text search with ranked results
//! - B+tree path index for exact and prefix lookups
//! - Single-writer/multi-reader concurrency model
//! - Write latency tracking with slow-write detection
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │          (validate → WAL → store → indexes → commit)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴─────────────────────┐
//!          │                                  │
//!          ▼                                  ▼
//!   ┌─────────────┐              ┌─────────────────────────┐
//!   │     WAL     │              │   State (RwLock)        │
//!   │  (Append)   │              │ ┌─────────────────────┐ │
//!   └──────┬──────┘              │ │   DocumentStore     │ │
//!          │                     │ ├──────────┬──────────┤ │
//!          │ checkpoint          │ │ Trigram  │  Path    │ │
//!          ▼                     │ │  Index   │ (B+tree) │ │
//!   ┌─────────────┐              │ └──────────┴──────────┘ │
//!   │  Snapshot   │              └─────────────────────────┘
//!   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use docstore::{Engine, NewDocument};
//!
//! let engine = Engine::open_path(std::path::Path::new("./data"))?;
//! let id = engine.insert(NewDocument::new("/a.md", "Rust Guide", "rust ownership model"))?;
//! let hits = engine.query("rust", 10, None)?;
//! assert_eq!(hits[0].document.id, id);
//! engine.close()?;
//! # Ok::<(), docstore::EngineError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod document;

pub mod wal;
pub mod store;
pub mod index;
pub mod transaction;
pub mod metrics;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{EngineError, Result};
pub use config::{Config, ConfigBuilder, WalSyncStrategy};
pub use document::{Document, DocumentId, DocumentPatch, NewDocument};
pub use engine::{Engine, EngineStats, Mutation, SearchHit};
pub use transaction::{MutationState, Transaction};
pub use metrics::{SlowWrite, WriteLatencyStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of DocStore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
