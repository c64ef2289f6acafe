//! Checkpoint snapshots
//!
//! A snapshot holds every live document as of `last_seq`. Once it is on disk
//! the WAL prefix up to `last_seq` can be truncated.
//!
//! ## File Format
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Header (22 bytes)                                             │
//! │   Magic "DSNP" (4) | Version u16 (2) | Count u64 (8)          │
//! │   LastSeq u64 (8)                                             │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                         │
//! │   [Len: u32][bincode (seq, Document)]                         │
//! │   ... repeated for each live document ...                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Footer (8 bytes)                                              │
//! │   DataCRC: u32 (4) | HeaderCRC: u32 (4)                       │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::document::Document;
use crate::error::{EngineError, Result};

/// Magic bytes identifying a DocStore snapshot file
const MAGIC: &[u8; 4] = b"DSNP";

/// Current snapshot format version
const VERSION: u16 = 2;

/// Header size: Magic (4) + Version (2) + Count (8) + LastSeq (8)
const HEADER_SIZE: usize = 22;

/// Footer size: DataCRC (4) + HeaderCRC (4)
const FOOTER_SIZE: usize = 8;

/// Offset of the entry count inside the header
const COUNT_OFFSET: u64 = 6;

/// A loaded snapshot
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// WAL sequence number the snapshot reflects
    pub last_seq: u64,
    /// Live documents with the LSN that produced each
    pub documents: Vec<(u64, Document)>,
}

/// Writes a snapshot to a temporary file and renames it into place on `finish`
pub struct SnapshotWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    last_seq: u64,
    data_hasher: crc32fast::Hasher,
}

impl SnapshotWriter {
    /// Start a snapshot reflecting the store as of `last_seq`
    pub fn create(path: &Path, last_seq: u64) -> Result<Self> {
        let tmp_path = path.with_extension("db.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        // Entry count is a placeholder until `finish`
        writer.write_all(&encode_header(0, last_seq))?;

        Ok(Self {
            final_path: path.to_path_buf(),
            tmp_path,
            writer,
            entry_count: 0,
            last_seq,
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Append one live document
    pub fn add(&mut self, seq: u64, document: &Document) -> Result<()> {
        let body = bincode::serialize(&(seq, document))?;
        let len = u32::try_from(body.len())
            .map_err(|_| EngineError::Serialization(format!("snapshot record of {} bytes", body.len())))?;
        let len_bytes = len.to_le_bytes();

        self.writer.write_all(&len_bytes)?;
        self.writer.write_all(&body)?;
        self.data_hasher.update(&len_bytes);
        self.data_hasher.update(&body);
        self.entry_count += 1;
        Ok(())
    }

    /// Write the footer, fsync, and atomically replace any previous snapshot
    pub fn finish(mut self) -> Result<u64> {
        let data_crc = self.data_hasher.finalize();
        let header_crc = crc32fast::hash(&encode_header(self.entry_count, self.last_seq));
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&header_crc.to_le_bytes())?;
        self.writer.flush()?;

        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| EngineError::Io(e.into_error()))?;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.final_path)?;
        if let Some(dir) = self.final_path.parent() {
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }
        Ok(self.entry_count)
    }
}

/// Loads and verifies snapshot files
pub struct SnapshotReader;

impl SnapshotReader {
    /// Load a snapshot, verifying magic, version, count and checksum
    pub fn load(path: &Path) -> Result<Snapshot> {
        let bytes = fs::read(path)?;
        if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(EngineError::corruption(format!(
                "snapshot {} is truncated ({} bytes)",
                path.display(),
                bytes.len()
            )));
        }

        let header = &bytes[..HEADER_SIZE];
        if &header[0..4] != MAGIC {
            return Err(EngineError::corruption(format!(
                "Invalid snapshot magic: expected DSNP, got {:?}",
                &header[0..4]
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(EngineError::corruption(format!("Unsupported snapshot version: {}", version)));
        }
        let entry_count = read_u64(&header[6..14]);
        let last_seq = read_u64(&header[14..22]);

        let data = &bytes[HEADER_SIZE..bytes.len() - FOOTER_SIZE];
        let footer = &bytes[bytes.len() - FOOTER_SIZE..];
        let stored_header_crc = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]);
        let actual_header_crc = crc32fast::hash(header);
        if stored_header_crc != actual_header_crc {
            return Err(EngineError::corruption(format!(
                "snapshot header checksum mismatch: expected 0x{:08x}, got 0x{:08x}",
                stored_header_crc, actual_header_crc
            )));
        }

        let stored_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let actual_crc = crc32fast::hash(data);
        if stored_crc != actual_crc {
            return Err(EngineError::corruption(format!(
                "snapshot checksum mismatch: expected 0x{:08x}, got 0x{:08x}",
                stored_crc, actual_crc
            )));
        }

        let mut documents = Vec::with_capacity((entry_count as usize).min(data.len() / 4));
        let mut pos = 0;
        while pos < data.len() {
            if pos + 4 > data.len() {
                return Err(EngineError::corruption("snapshot record header truncated"));
            }
            let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
            pos += 4;
            if pos + len > data.len() {
                return Err(EngineError::corruption("snapshot record body truncated"));
            }
            let record: (u64, Document) = bincode::deserialize(&data[pos..pos + len])
                .map_err(|e| EngineError::corruption(format!("undecodable snapshot record: {}", e)))?;
            documents.push(record);
            pos += len;
        }

        if documents.len() as u64 != entry_count {
            return Err(EngineError::corruption(format!(
                "snapshot holds {} records, header says {}",
                documents.len(),
                entry_count
            )));
        }

        Ok(Snapshot { last_seq, documents })
    }
}

fn encode_header(entry_count: u64, last_seq: u64) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6..14].copy_from_slice(&entry_count.to_le_bytes());
    header[14..22].copy_from_slice(&last_seq.to_le_bytes());
    header
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
