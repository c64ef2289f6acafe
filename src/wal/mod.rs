//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append a record before any store or index mutation
//! - CRC32 checksums for corruption detection
//! - Gap-free Log Sequence Numbers (LSN) for ordering
//! - Crash recovery and replay from any LSN
//! - Truncation of the prefix covered by a checkpoint
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Header                                  │
//! │ ┌──────────┬───────────┬──────────────┐ │
//! │ │Magic (4) │Version (2)│ BaseLsn (8)  │ │
//! │ └──────────┴───────────┴──────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2 ...                             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! `Data` is the bincode encoding of `(timestamp, Operation)`. The CRC covers
//! the LSN, the length and the data.

mod entry;
mod writer;
mod reader;
mod recovery;

pub use entry::{WalEntry, Operation, HEADER_SIZE, FILE_HEADER_SIZE};
pub(crate) use entry::now_millis;
pub use writer::WalWriter;
pub use reader::{LogEnd, Replay, WalReader};
pub use recovery::{WalRecovery, RecoveryResult};
