//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::config::WalSyncStrategy;
use crate::error::{EngineError, Result};

use super::entry::{encode_file_header, FILE_HEADER_SIZE};
use super::reader::{LogEnd, WalReader};
use super::{Operation, WalEntry};

/// Writes entries to the WAL file
///
/// The writer is the only component that appends to the log; the engine
/// holds it behind a mutex and serializes writers in front of it.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    /// LSN carried by the first record in the file
    base_lsn: u64,
    /// LSN the next append will receive
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries written since the last fsync
    uncommitted: usize,
    /// Current file size in bytes (tracked to avoid stat calls)
    size: u64,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// An existing file is scanned to find the next LSN. Bytes past the last
    /// valid record cannot be reached by a reader, so they are cut off before
    /// anything new is appended.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let existing_len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        if existing_len < FILE_HEADER_SIZE {
            // New log, or a crash while the header itself was being written
            let file = create_log_file(path, 1)?;
            return Ok(Self {
                file,
                path: path.to_path_buf(),
                base_lsn: 1,
                next_lsn: 1,
                sync_strategy,
                uncommitted: 0,
                size: FILE_HEADER_SIZE,
                #[cfg(test)]
                fail_next_sync: false,
            });
        }

        let mut reader = WalReader::open(path)?;
        while reader.next_entry()?.is_some() {}

        let valid_len = reader.valid_len();
        if let Some(LogEnd::TornTail { offset } | LogEnd::Corrupt { offset, .. }) = reader.log_end() {
            warn!(
                path = %path.display(),
                offset,
                dropped_bytes = reader.file_len() - valid_len,
                "discarding unreadable WAL tail before appending"
            );
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        if reader.file_len() > valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            base_lsn: reader.base_lsn(),
            next_lsn: reader.last_lsn() + 1,
            sync_strategy,
            uncommitted: 0,
            size: valid_len,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    /// Append an entry to the WAL
    ///
    /// Returns the LSN assigned to the entry. With `EveryWrite` the entry is
    /// on stable storage when this returns. On failure the LSN is not
    /// consumed and the record's bytes are cut off again, including when the
    /// write succeeded but the fsync after it did not. If the record cannot
    /// be cut off the error is `Corruption`: the log may now hold a record
    /// the caller was told failed.
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        let lsn = self.next_lsn;
        let entry = WalEntry::new(lsn, operation);
        let bytes = entry.serialize()?;

        if let Err(e) = self.file.write_all(&bytes) {
            self.rollback_record(lsn)?;
            return Err(e.into());
        }

        self.size += bytes.len() as u64;
        self.next_lsn += 1;
        self.uncommitted += 1;

        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.uncommitted >= count,
        };
        if should_sync {
            if let Err(e) = self.sync() {
                self.size -= bytes.len() as u64;
                self.next_lsn = lsn;
                self.uncommitted = self.uncommitted.saturating_sub(1);
                self.rollback_record(lsn)?;
                return Err(e);
            }
        }

        Ok(lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.take_injected_sync_failure() {
            return Err(std::io::Error::other("injected fsync failure").into());
        }
        self.file.sync_data()?;
        self.uncommitted = 0;
        Ok(())
    }

    /// Make the next `sync` fail once
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    #[cfg(test)]
    fn take_injected_sync_failure(&mut self) -> bool {
        std::mem::take(&mut self.fail_next_sync)
    }

    #[cfg(not(test))]
    fn take_injected_sync_failure(&mut self) -> bool {
        false
    }

    /// Cut the file back to `self.size` after a failed append of `lsn`
    fn rollback_record(&mut self, lsn: u64) -> Result<()> {
        let cut = self
            .file
            .set_len(self.size)
            .and_then(|_| self.file.seek(SeekFrom::Start(self.size)).map(|_| ()));
        if let Err(e) = cut {
            error!(lsn, size = self.size, error = %e, "could not roll back failed WAL append");
            return Err(EngineError::corruption(format!(
                "WAL record {} could not be rolled back: {}",
                lsn, e
            )));
        }
        warn!(lsn, size = self.size, "rolled back failed WAL append");
        Ok(())
    }

    /// Drop every record with `lsn <= up_to_lsn`
    ///
    /// Survivors are copied to a temporary file which then atomically replaces
    /// the log, so a crash leaves either the old or the new log in place.
    pub fn truncate(&mut self, up_to_lsn: u64) -> Result<()> {
        if up_to_lsn < self.base_lsn {
            return Ok(());
        }
        self.sync()?;

        let new_base = up_to_lsn + 1;
        let tmp_path = self.path.with_extension("log.tmp");
        let mut kept = 0u64;
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&encode_file_header(new_base))?;
            for entry in WalReader::open(&self.path)?.replay(new_base) {
                tmp.write_all(&entry?.serialize()?)?;
                kept += 1;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path);

        // The old handle now points at the replaced file
        let (file, size) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .and_then(|mut file| file.seek(SeekFrom::End(0)).map(|size| (file, size)))
            .map_err(|e| EngineError::corruption(format!("WAL replaced but not reopened: {}", e)))?;

        debug!(up_to_lsn, kept, size, "WAL truncated");

        self.file = file;
        self.base_lsn = new_base;
        self.next_lsn = self.next_lsn.max(new_base);
        self.size = size;
        Ok(())
    }

    /// Get the LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// LSN of the last appended record (`base_lsn - 1` if the log is empty)
    pub fn last_lsn(&self) -> u64 {
        self.next_lsn - 1
    }

    pub fn base_lsn(&self) -> u64 {
        self.base_lsn
    }

    /// Number of entries written since the last fsync
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    /// Current WAL file size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_log_file(path: &Path, base_lsn: u64) -> Result<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&encode_file_header(base_lsn))?;
    file.sync_all()?;
    sync_parent_dir(path);
    Ok(file)
}

/// Persist a rename or create in the parent directory (no-op where unsupported)
fn sync_parent_dir(path: &Path) {
    if let Some(dir) = path.parent() {
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }
}
