//! WAL Reader
//!
//! Streams entries from the WAL file, stopping at the log's logical end.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{EngineError, Result};

use super::entry::{read_file_header, RecordHeader, FILE_HEADER_SIZE, HEADER_SIZE, MAX_RECORD_SIZE};
use super::WalEntry;

/// Why reading stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEnd {
    /// Every byte of the file belonged to a valid record
    Clean,

    /// The final record is incomplete or fails its checksum with nothing after it
    TornTail { offset: u64 },

    /// A record failed validation and more bytes follow it
    Corrupt { offset: u64, reason: String },
}

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    file_len: u64,
    /// Offset just past the last valid record
    position: u64,
    /// LSN the first record must carry
    base_lsn: u64,
    /// LSN the next record must carry
    expected_lsn: u64,
    end: Option<LogEnd>,
    /// Complete records that failed validation
    corrupted: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let (base_lsn, position, end) = match read_file_header(&mut reader)? {
            Some(base) => (base, FILE_HEADER_SIZE, None),
            // Missing or partial header: an empty log
            None if file_len == 0 => (1, 0, Some(LogEnd::Clean)),
            None => (1, 0, Some(LogEnd::TornTail { offset: 0 })),
        };

        Ok(Self {
            reader,
            file_len,
            position,
            base_lsn,
            expected_lsn: base_lsn,
            end,
            corrupted: 0,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at the logical end; `log_end()` then says why.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        if self.end.is_some() {
            return Ok(None);
        }

        let remaining = self.file_len - self.position;
        if remaining == 0 {
            self.end = Some(LogEnd::Clean);
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            self.end = Some(LogEnd::TornTail { offset: self.position });
            return Ok(None);
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header_bytes)?;
        let header = RecordHeader::decode(&header_bytes);

        let record_len = HEADER_SIZE as u64 + header.len as u64;
        if header.len > MAX_RECORD_SIZE {
            self.stop_corrupt(format!("record length {} exceeds limit", header.len), record_len);
            return Ok(None);
        }
        if record_len > remaining {
            // Crash mid-write: the record never completed
            self.end = Some(LogEnd::TornTail { offset: self.position });
            return Ok(None);
        }

        let mut body = vec![0u8; header.len as usize];
        self.reader.read_exact(&mut body)?;

        let entry = match WalEntry::from_parts(&header, &body) {
            Ok(entry) => entry,
            Err(EngineError::Corruption(reason)) => {
                self.stop_corrupt(reason, record_len);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if entry.lsn != self.expected_lsn {
            self.stop_corrupt(
                format!("sequence gap: expected lsn {}, found {}", self.expected_lsn, entry.lsn),
                record_len,
            );
            return Ok(None);
        }

        self.position += record_len;
        self.expected_lsn += 1;
        Ok(Some(entry))
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> Replay {
        self.replay(0)
    }

    /// Lazily iterate over entries with `lsn >= from_lsn`
    pub fn replay(self, from_lsn: u64) -> Replay {
        Replay {
            reader: self,
            from_lsn,
        }
    }

    /// Why reading stopped, once it has
    pub fn log_end(&self) -> Option<&LogEnd> {
        self.end.as_ref()
    }

    /// Offset just past the last valid record
    pub fn valid_len(&self) -> u64 {
        self.position
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// LSN carried by the first record in the file
    pub fn base_lsn(&self) -> u64 {
        self.base_lsn
    }

    /// LSN of the last valid record read so far (`base_lsn - 1` if none)
    pub fn last_lsn(&self) -> u64 {
        self.expected_lsn - 1
    }

    /// Complete records that failed validation (scanning stops at the first)
    pub fn corrupted_records(&self) -> u64 {
        self.corrupted
    }

    fn stop_corrupt(&mut self, reason: String, record_len: u64) {
        self.corrupted += 1;
        let record_end = self.position + record_len;
        self.end = Some(if record_end >= self.file_len {
            LogEnd::TornTail { offset: self.position }
        } else {
            LogEnd::Corrupt {
                offset: self.position,
                reason,
            }
        });
    }
}

/// Lazy, finite iterator over WAL entries
pub struct Replay {
    reader: WalReader,
    from_lsn: u64,
}

impl Replay {
    /// Why the replay stopped, once it has
    pub fn log_end(&self) -> Option<&LogEnd> {
        self.reader.log_end()
    }

    pub fn last_lsn(&self) -> u64 {
        self.reader.last_lsn()
    }
}

impl Iterator for Replay {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.next_entry() {
                Ok(Some(entry)) if entry.lsn < self.from_lsn => continue,
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
