//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and the file header.

use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentId};
use crate::error::{EngineError, Result};

/// Record header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// File header: Magic (4) + Version (2) + BaseLsn (8)
pub const FILE_HEADER_SIZE: u64 = 14;

/// Magic bytes identifying a DocStore WAL file
pub(crate) const MAGIC: &[u8; 4] = b"DWAL";

/// Current WAL format version
pub(crate) const VERSION: u16 = 1;

/// Largest record body accepted when reading (guards against garbage lengths)
pub(crate) const MAX_RECORD_SIZE: u32 = 256 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - strictly increasing, gap-free
    pub lsn: u64,

    /// The mutation to apply
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Mutations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// A new document (full snapshot)
    Insert { document: Document },

    /// A new version of an existing document (full snapshot)
    Update { document: Document },

    /// Tombstone a document (id only)
    Delete { id: DocumentId, deleted_at: u64 },
}

impl Operation {
    /// Id of the document this operation targets
    pub fn document_id(&self) -> DocumentId {
        match self {
            Operation::Insert { document } | Operation::Update { document } => document.id,
            Operation::Delete { id, .. } => *id,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
        }
    }
}

impl WalEntry {
    /// Create an entry stamped with the current wall clock
    pub fn new(lsn: u64, operation: Operation) -> Self {
        Self {
            lsn,
            operation,
            timestamp: now_millis(),
        }
    }

    /// Serialize to `[lsn][crc][len][body]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(&(self.timestamp, &self.operation))?;
        let len = u32::try_from(body.len())
            .ok()
            .filter(|&len| len <= MAX_RECORD_SIZE)
            .ok_or_else(|| {
                EngineError::validation("content", format!("WAL record of {} bytes is too large", body.len()))
            })?;
        let crc = compute_crc(self.lsn, len, &body);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Deserialize a complete record, verifying its checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(EngineError::corruption(format!(
                "WAL record truncated: {} bytes, header needs {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        let header = RecordHeader::decode(&bytes[..HEADER_SIZE]);
        let body = &bytes[HEADER_SIZE..];
        if body.len() != header.len as usize {
            return Err(EngineError::corruption(format!(
                "WAL record length mismatch: header says {}, got {}",
                header.len,
                body.len()
            )));
        }
        Self::from_parts(&header, body)
    }

    /// Verify and decode a body whose header was read separately
    pub(crate) fn from_parts(header: &RecordHeader, body: &[u8]) -> Result<Self> {
        let actual = compute_crc(header.lsn, header.len, body);
        if actual != header.crc {
            return Err(EngineError::corruption(format!(
                "WAL checksum mismatch at lsn {}: expected 0x{:08x}, got 0x{:08x}",
                header.lsn, header.crc, actual
            )));
        }
        let (timestamp, operation): (u64, Operation) = bincode::deserialize(body)
            .map_err(|e| EngineError::corruption(format!("undecodable WAL body at lsn {}: {}", header.lsn, e)))?;
        Ok(Self {
            lsn: header.lsn,
            operation,
            timestamp,
        })
    }
}

/// Fixed-size header preceding each record body
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub lsn: u64,
    pub crc: u32,
    pub len: u32,
}

impl RecordHeader {
    pub fn decode(bytes: &[u8]) -> Self {
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&bytes[0..8]);
        crc.copy_from_slice(&bytes[8..12]);
        len.copy_from_slice(&bytes[12..16]);
        Self {
            lsn: u64::from_le_bytes(lsn),
            crc: u32::from_le_bytes(crc),
            len: u32::from_le_bytes(len),
        }
    }
}

/// CRC over lsn, length and body so a record cannot be replayed under another LSN
fn compute_crc(lsn: u64, len: u32, body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.update(body);
    hasher.finalize()
}

// =============================================================================
// File Header
// =============================================================================

/// Encode the file header for a log whose first record carries `base_lsn`
pub(crate) fn encode_file_header(base_lsn: u64) -> [u8; FILE_HEADER_SIZE as usize] {
    let mut header = [0u8; FILE_HEADER_SIZE as usize];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6..14].copy_from_slice(&base_lsn.to_le_bytes());
    header
}

/// Read the file header; `None` if the file is shorter than a header
pub(crate) fn read_file_header(reader: &mut impl Read) -> Result<Option<u64>> {
    let mut header = [0u8; FILE_HEADER_SIZE as usize];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            return Ok(None);
        }
        filled += n;
    }

    if &header[0..4] != MAGIC {
        return Err(EngineError::corruption(format!(
            "Invalid WAL magic: expected DWAL, got {:?}",
            &header[0..4]
        )));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(EngineError::corruption(format!("Unsupported WAL version: {}", version)));
    }
    let mut base = [0u8; 8];
    base.copy_from_slice(&header[6..14]);
    Ok(Some(u64::from_le_bytes(base)))
}

/// Wall clock in unix millis
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
