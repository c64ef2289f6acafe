//! WAL Recovery
//!
//! Handles crash recovery by scanning the WAL and cutting it at its logical end.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;

use super::reader::{LogEnd, WalReader};
use super::WalEntry;

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of complete records that failed validation (0 or 1: scanning stops there)
    pub entries_corrupted: u64,

    /// Last valid LSN (`base_lsn - 1` when the log holds no records)
    pub last_lsn: u64,

    /// Whether bytes past the last valid record were (or would be) removed
    pub was_truncated: bool,

    /// Byte offset the log was cut at, when truncated
    pub truncated_at: Option<u64>,

    /// A bad record was followed by more data: records may have been lost
    pub mid_log_corruption: bool,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries in LSN order
    /// 2. Stop at the first torn or corrupted record
    /// 3. Truncate the file there
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, result) = Self::scan(path, true)?;

        if result.entries_recovered > 0 || result.was_truncated {
            info!(
                path = %path.display(),
                recovered = result.entries_recovered,
                corrupted = result.entries_corrupted,
                last_lsn = result.last_lsn,
                truncated = result.was_truncated,
                "WAL recovery scan complete"
            );
        }
        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path, false).map(|(_, result)| result)
    }

    fn scan(path: &Path, repair: bool) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry()? {
            entries.push(entry);
        }

        let valid_len = reader.valid_len();
        let was_truncated = reader.file_len() > valid_len;

        let mid_log_corruption = match reader.log_end() {
            Some(LogEnd::Corrupt { offset, reason }) => {
                warn!(offset, %reason, "WAL corruption before end of log");
                true
            }
            _ => false,
        };

        if repair && was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            warn!(
                path = %path.display(),
                offset = valid_len,
                dropped_bytes = reader.file_len() - valid_len,
                "WAL truncated at logical end"
            );
        }

        let result = RecoveryResult {
            entries_recovered: entries.len() as u64,
            entries_corrupted: reader.corrupted_records(),
            last_lsn: reader.last_lsn(),
            was_truncated,
            truncated_at: was_truncated.then_some(valid_len),
            mid_log_corruption,
        };
        Ok((entries, result))
    }
}
