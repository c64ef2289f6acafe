//! Engine Module
//!
//! The coordinator that ties the WAL, the document store and both indexes
//! together.
//!
//! ## Responsibilities
//! - Validate mutations and run them through the write path in order
//! - Keep store and indexes in lockstep behind one lock
//! - Recover on startup: snapshot, then idempotent WAL replay
//! - Checkpoint: snapshot the store and truncate the WAL prefix
//! - Fall back to read-only mode when corruption is detected

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::document::{Document, DocumentId, DocumentPatch, NewDocument};
use crate::error::{EngineError, Result};
use crate::index::{PathIndex, TrigramIndex};
use crate::metrics::{SlowWrite, WriteLatencyStats, WriteLatencyTracker};
use crate::store::{DocumentStore, Slot, SnapshotReader, SnapshotWriter};
use crate::transaction::Transaction;
use crate::wal::{Operation, WalEntry, WalRecovery, WalWriter};

/// A change requested by a caller
#[derive(Debug, Clone)]
pub enum Mutation {
    Insert(NewDocument),
    Update { id: DocumentId, patch: DocumentPatch },
    Delete { id: DocumentId },
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Insert(_) => "insert",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// One ranked query result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    pub score: f64,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub document_count: usize,
    pub tombstone_count: usize,
    pub total_content_bytes: u64,
    pub trigram_count: usize,
    pub posting_count: usize,
    pub path_index_entries: usize,
    pub path_index_height: usize,
    pub wal_size_bytes: u64,
    /// LSN of the last mutation applied to the in-memory state
    pub last_sequence: u64,
    pub read_only: bool,
    pub write_latency: WriteLatencyStats,
}

/// Outcome of a committed mutation
struct Committed {
    lsn: u64,
    id: DocumentId,
    document: Option<Document>,
}

// =============================================================================
// In-Memory State
// =============================================================================

/// Store and indexes, always mutated together
struct State {
    store: DocumentStore,
    trigram: TrigramIndex,
    paths: PathIndex,
    /// Highest LSN reflected in the state
    last_seq: u64,
}

impl State {
    fn new(btree_order: usize) -> Self {
        Self {
            store: DocumentStore::new(),
            trigram: TrigramIndex::new(),
            paths: PathIndex::new(btree_order),
            last_seq: 0,
        }
    }

    /// Rebuild both indexes from the store
    fn rebuild_indexes(&mut self) -> Result<()> {
        self.trigram.clear();
        self.paths.clear();
        for (document, _) in self.store.scan() {
            self.paths.insert(&document.path, document.id).map_err(|e| {
                EngineError::corruption(format!("rebuilding path index: {}", e))
            })?;
            self.trigram.insert(document);
        }
        Ok(())
    }

    /// Apply a logged operation to store, then indexes
    ///
    /// Returns `Ok(false)` if the store already reflects `lsn` or later, so
    /// replaying the same record any number of times converges.
    fn apply(&mut self, operation: &Operation, lsn: u64, tx: &mut Transaction) -> Result<bool> {
        match operation {
            Operation::Insert { document } | Operation::Update { document } => {
                if self.store.applied_seq(&document.id).is_some_and(|seq| seq >= lsn) {
                    return Ok(false);
                }
                if let Ok(holder) = self.paths.lookup(&document.path) {
                    if holder != document.id {
                        return Err(EngineError::Conflict {
                            path: document.path.clone(),
                            existing: holder,
                        });
                    }
                }

                let previous_path = self.store.get(&document.id).ok().map(|d| d.path.clone());
                self.store.put(document.clone(), lsn);
                tx.store_applied()?;

                if let Some(old) = previous_path.filter(|old| *old != document.path) {
                    if self.paths.remove(&old) != Some(document.id) {
                        return Err(EngineError::corruption(format!(
                            "path index did not map '{}' to document {}",
                            old, document.id
                        )));
                    }
                }
                self.paths.insert(&document.path, document.id)?;
                self.trigram.insert(document);
                tx.indexes_applied()?;
            }
            Operation::Delete { id, deleted_at } => {
                let path = match self.store.slot(id) {
                    Some(slot) if slot.seq() >= lsn => return Ok(false),
                    Some(Slot::Live { document, .. }) => document.path.clone(),
                    _ => return Err(EngineError::document_not_found(id)),
                };

                self.store.delete(id, lsn, *deleted_at)?;
                tx.store_applied()?;

                if self.paths.remove(&path) != Some(*id) {
                    return Err(EngineError::corruption(format!(
                        "path index did not map '{}' to document {}",
                        path, id
                    )));
                }
                self.trigram.remove(id);
                tx.indexes_applied()?;
            }
        }

        self.last_seq = self.last_seq.max(lsn);
        Ok(true)
    }

    /// Check that both indexes agree with the store
    fn check_consistency(&self) -> Result<()> {
        let live = self.store.live_count();
        if self.paths.len() != live {
            return Err(EngineError::corruption(format!(
                "path index holds {} entries for {} live documents",
                self.paths.len(),
                live
            )));
        }
        if self.trigram.len() != live {
            return Err(EngineError::corruption(format!(
                "trigram index holds {} documents, store has {}",
                self.trigram.len(),
                live
            )));
        }

        for (document, _) in self.store.scan() {
            match self.paths.lookup(&document.path) {
                Ok(id) if id == document.id => {}
                _ => {
                    return Err(EngineError::corruption(format!(
                        "path '{}' does not resolve to document {}",
                        document.path, document.id
                    )))
                }
            }
            if self.trigram.indexed_version(&document.id) != Some(document.updated_at) {
                return Err(EngineError::corruption(format!(
                    "trigram index is stale for document {}",
                    document.id
                )));
            }
        }

        self.paths.validate()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The document engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes**: serialized by `write_lock`
///   - validate against a read view, append to the WAL, then take the state
///     write lock only to apply to store and indexes
/// - **Reads**: share the state read lock and see either the state before a
///   mutation or after it, never in between
pub struct Engine {
    config: Config,

    /// Write-ahead log (appends happen without the state lock held)
    wal: Mutex<WalWriter>,

    /// Store + indexes
    state: RwLock<State>,

    /// Serializes mutations, checkpoints and close
    write_lock: Mutex<()>,

    /// Last timestamp issued (unix millis)
    clock: AtomicU64,

    read_only: AtomicBool,
    read_only_reason: Mutex<Option<String>>,

    /// Timings of calls through the write path
    latency: Mutex<WriteLatencyTracker>,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const SNAPSHOT_FILENAME: &'static str = "snapshot.db";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Load the last snapshot and rebuild indexes from it
    /// 3. Repair the WAL and replay records newer than the snapshot
    /// 4. Position the writer after the last known sequence number
    ///
    /// A damaged WAL opens the engine read-only; a damaged snapshot is an error.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let snapshot_path = config.data_dir.join(Self::SNAPSHOT_FILENAME);

        let mut state = State::new(config.btree_order);
        let mut clock = 0;

        // Step 1: Snapshot
        let snapshot_seq = if snapshot_path.exists() {
            let snapshot = SnapshotReader::load(&snapshot_path)?;
            for (seq, document) in snapshot.documents {
                clock = clock.max(document.updated_at);
                state.store.put(document, seq);
            }
            info!(
                documents = state.store.live_count(),
                last_seq = snapshot.last_seq,
                "snapshot loaded"
            );
            snapshot.last_seq
        } else {
            0
        };
        state.rebuild_indexes()?;
        state.last_seq = snapshot_seq;

        // Step 2: WAL replay
        let mut read_only_reason = None;
        let mut replayed = 0u64;
        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;
            if recovery.mid_log_corruption {
                read_only_reason = Some(format!(
                    "WAL corrupted mid-log at offset {}",
                    recovery.truncated_at.unwrap_or_default()
                ));
            }

            for entry in entries.into_iter().filter(|e| e.lsn > snapshot_seq) {
                clock = clock.max(entry.timestamp);
                match replay_entry(&mut state, &entry) {
                    Ok(true) => replayed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(lsn = entry.lsn, error = %e, "WAL replay stopped");
                        read_only_reason = Some(format!("replay of lsn {} failed: {}", entry.lsn, e));
                        break;
                    }
                }
            }
        }

        // Step 3: Writer
        let mut wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        if wal.base_lsn() > snapshot_seq + 1 {
            read_only_reason.get_or_insert_with(|| {
                format!(
                    "sequence gap: snapshot ends at {}, WAL starts at {}",
                    snapshot_seq,
                    wal.base_lsn()
                )
            });
        }
        if wal.last_lsn() < snapshot_seq {
            wal.truncate(snapshot_seq)?;
        }

        info!(
            data_dir = %config.data_dir.display(),
            documents = state.store.live_count(),
            replayed,
            last_seq = state.last_seq,
            next_lsn = wal.current_lsn(),
            "engine opened"
        );

        let latency = WriteLatencyTracker::new(config.latency_window, config.slow_write_threshold);
        let engine = Self {
            config,
            wal: Mutex::new(wal),
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
            clock: AtomicU64::new(clock),
            read_only: AtomicBool::new(false),
            read_only_reason: Mutex::new(None),
            latency: Mutex::new(latency),
        };
        if let Some(reason) = read_only_reason {
            engine.enter_read_only(reason);
        }
        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Run a mutation through the write path, returning its LSN
    pub fn apply(&self, mutation: Mutation) -> Result<u64> {
        self.execute(mutation).map(|committed| committed.lsn)
    }

    /// Insert a new document
    ///
    /// Fails with `Validation` naming the first missing field (path, title,
    /// content) or `Conflict` if the path is taken.
    pub fn insert(&self, document: NewDocument) -> Result<DocumentId> {
        self.execute(Mutation::Insert(document)).map(|committed| committed.id)
    }

    /// Apply `patch` to a live document, returning the new version
    pub fn update(&self, id: DocumentId, patch: DocumentPatch) -> Result<Document> {
        let committed = self.execute(Mutation::Update { id, patch })?;
        committed
            .document
            .ok_or_else(|| EngineError::corruption(format!("update of {} produced no document", id)))
    }

    /// Delete a document; `false` if there was no live document to remove
    pub fn delete(&self, id: DocumentId) -> Result<bool> {
        match self.execute(Mutation::Delete { id }) {
            Ok(_) => Ok(true),
            Err(EngineError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a live document by id
    pub fn get(&self, id: DocumentId) -> Result<Document> {
        self.state.read().store.get(&id).cloned()
    }

    /// Get a live document by its path
    pub fn get_by_path(&self, path: &str) -> Result<Document> {
        let state = self.state.read();
        let id = state.paths.lookup(path)?;
        state.store.get(&id).cloned()
    }

    /// Documents whose path starts with `prefix`, in path order
    pub fn list_prefix(&self, prefix: &str) -> Vec<Document> {
        let state = self.state.read();
        state
            .paths
            .prefix_scan(prefix)
            .filter_map(|(_, id)| state.store.get(&id).ok().cloned())
            .collect()
    }

    /// Ranked full-text search
    ///
    /// `limit` must be in `1..=max_query_limit`. With a tag filter, only
    /// documents carrying every listed tag are returned.
    pub fn query(&self, text: &str, limit: usize, tags: Option<&[String]>) -> Result<Vec<SearchHit>> {
        if limit == 0 || limit > self.config.max_query_limit {
            return Err(EngineError::validation(
                "limit",
                format!("must be between 1 and {}", self.config.max_query_limit),
            ));
        }

        let state = self.state.read();
        let matches_tags = |id: &DocumentId| match tags {
            None => true,
            Some(tags) => state.store.get(id).is_ok_and(|d| d.has_all_tags(tags)),
        };
        let hits: Vec<SearchHit> = state
            .trigram
            .search(text, limit, matches_tags)
            .into_iter()
            .filter_map(|(id, score)| {
                let document = state.store.get(&id).ok()?.clone();
                Some(SearchHit { document, score })
            })
            .collect();
        Ok(hits)
    }

    pub fn stats(&self) -> EngineStats {
        let wal_size_bytes = self.wal.lock().size_bytes();
        let state = self.state.read();
        EngineStats {
            document_count: state.store.live_count(),
            tombstone_count: state.store.tombstone_count(),
            total_content_bytes: state.store.total_content_bytes(),
            trigram_count: state.trigram.trigram_count(),
            posting_count: state.trigram.posting_count(),
            path_index_entries: state.paths.len(),
            path_index_height: state.paths.height(),
            wal_size_bytes,
            last_sequence: state.last_seq,
            read_only: self.is_read_only(),
            write_latency: self.latency.lock().stats(),
        }
    }

    /// Most recent writes slower than `Config::slow_write_threshold`
    pub fn slow_writes(&self) -> Vec<SlowWrite> {
        self.latency.lock().slow_writes()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Snapshot the store and drop the WAL prefix it covers
    pub fn checkpoint(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.checkpoint_locked()
    }

    /// Check that both indexes agree with the store
    ///
    /// A mismatch switches the engine to read-only mode.
    pub fn verify_integrity(&self) -> Result<()> {
        let result = self.state.read().check_consistency();
        if let Err(e) = &result {
            self.enter_read_only(format!("integrity check failed: {}", e));
        }
        result
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Why the engine is read-only, if it is
    pub fn read_only_reason(&self) -> Option<String> {
        self.read_only_reason.lock().clone()
    }

    /// Leave read-only mode (operator decision)
    pub fn resume_writes(&self) {
        let _write_guard = self.write_lock.lock();
        if let Some(reason) = self.read_only_reason.lock().take() {
            warn!(%reason, "writes resumed by operator");
        }
        self.read_only.store(false, Ordering::Release);
    }

    /// Close the engine gracefully
    ///
    /// Writes a checkpoint when configured (and writable), otherwise syncs the WAL.
    pub fn close(self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        if self.config.checkpoint_on_close && !self.is_read_only() {
            self.checkpoint_locked()?;
        } else {
            self.wal.lock().sync()?;
        }
        self.latency.lock().log_summary();
        info!(data_dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn wal_path(&self) -> PathBuf {
        self.config.data_dir.join(Self::WAL_FILENAME)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.config.data_dir.join(Self::SNAPSHOT_FILENAME)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    fn execute(&self, mutation: Mutation) -> Result<Committed> {
        let kind = mutation.kind();
        let started = Instant::now();
        let result = self.write_path(mutation);
        let elapsed = started.elapsed();

        let mut latency = self.latency.lock();
        match &result {
            Ok(committed) => latency.record_write(kind, committed.lsn, elapsed),
            Err(_) => latency.record_failure(),
        }
        result
    }

    fn write_path(&self, mutation: Mutation) -> Result<Committed> {
        let _write_guard = self.write_lock.lock();
        self.ensure_writable()?;

        let timestamp = self.next_timestamp();
        let operation = self.prepare(mutation, timestamp)?;
        let id = operation.document_id();
        let mut tx = Transaction::new(operation.kind(), id);

        // Step 1: WAL (durability point)
        let appended = self.wal.lock().append(operation.clone());
        let lsn = match appended {
            Ok(lsn) => lsn,
            Err(e) => {
                tx.fail(&e.to_string());
                if e.is_corruption() {
                    self.enter_read_only(format!("WAL append failed: {}", e));
                }
                return Err(e);
            }
        };
        tx.wal_written(lsn)?;

        // Step 2: store + indexes, atomically for readers
        let applied = self.state.write().apply(&operation, lsn, &mut tx);
        match applied {
            Ok(true) => {}
            Ok(false) => {
                tx.fail("already applied");
                let reason = format!("lsn {} was already reflected in the store", lsn);
                self.enter_read_only(reason.clone());
                return Err(EngineError::corruption(reason));
            }
            Err(e) => {
                tx.fail(&e.to_string());
                let reason = format!("lsn {} logged but not applied: {}", lsn, e);
                self.enter_read_only(reason.clone());
                return Err(EngineError::corruption(reason));
            }
        }
        let lsn = tx.commit()?;
        debug!(lsn, kind = operation.kind(), document = %id, "mutation committed");

        // Step 3: compaction when the log has grown too large. The mutation
        // is committed; a failed checkpoint is reported but not returned.
        if self.wal.lock().size_bytes() > self.config.checkpoint_wal_bytes {
            if let Err(e) = self.checkpoint_locked() {
                warn!(lsn, error = %e, "automatic checkpoint failed");
                if e.is_corruption() {
                    self.enter_read_only(format!("automatic checkpoint failed: {}", e));
                }
            }
        }

        let document = match operation {
            Operation::Insert { document } | Operation::Update { document } => Some(document),
            Operation::Delete { .. } => None,
        };
        Ok(Committed { lsn, id, document })
    }

    /// Validate a mutation against the current state and build its log record
    fn prepare(&self, mutation: Mutation, timestamp: u64) -> Result<Operation> {
        let max_size = self.config.max_document_size;
        let state = self.state.read();

        match mutation {
            Mutation::Insert(input) => {
                input.validate(max_size)?;
                if let Ok(existing) = state.paths.lookup(&input.path) {
                    return Err(EngineError::Conflict {
                        path: input.path,
                        existing,
                    });
                }
                let document = Document::from_new(DocumentId::new(), input, timestamp);
                Ok(Operation::Insert { document })
            }
            Mutation::Update { id, patch } => {
                if patch.is_empty() {
                    return Err(EngineError::validation("patch", "no fields to update"));
                }
                patch.validate(max_size)?;
                let current = state.store.get(&id)?;
                if let Some(path) = &patch.path {
                    match state.paths.lookup(path) {
                        Ok(existing) if existing != id => {
                            return Err(EngineError::Conflict {
                                path: path.clone(),
                                existing,
                            })
                        }
                        _ => {}
                    }
                }
                let document = current.patched(patch, timestamp);
                Ok(Operation::Update { document })
            }
            Mutation::Delete { id } => {
                state.store.get(&id)?;
                Ok(Operation::Delete {
                    id,
                    deleted_at: timestamp,
                })
            }
        }
    }

    /// Called with `write_lock` held
    fn checkpoint_locked(&self) -> Result<()> {
        self.ensure_writable()?;
        let snapshot_path = self.snapshot_path();

        // Readers keep going; writers are excluded by write_lock
        let (last_seq, count) = {
            let state = self.state.read();
            let mut writer = SnapshotWriter::create(&snapshot_path, state.last_seq)?;
            for (document, seq) in state.store.scan() {
                writer.add(seq, document)?;
            }
            (state.last_seq, writer.finish()?)
        };

        let wal_size = {
            let mut wal = self.wal.lock();
            wal.truncate(last_seq)?;
            wal.size_bytes()
        };
        let purged = self.state.write().store.purge_tombstones();

        info!(last_seq, documents = count, purged, wal_size, "checkpoint complete");
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            let reason = self
                .read_only_reason()
                .unwrap_or_else(|| "engine is in safe mode".to_string());
            return Err(EngineError::ReadOnly(reason));
        }
        Ok(())
    }

    fn enter_read_only(&self, reason: String) {
        error!(%reason, "entering read-only mode");
        *self.read_only_reason.lock() = Some(reason);
        self.read_only.store(true, Ordering::Release);
    }

    /// Strictly increasing unix millis; called with `write_lock` held
    fn next_timestamp(&self) -> u64 {
        let now = crate::wal::now_millis();
        let last = self.clock.load(Ordering::Acquire);
        let timestamp = now.max(last + 1);
        self.clock.store(timestamp, Ordering::Release);
        timestamp
    }
}

/// Replay one recovered record through the runtime apply path
fn replay_entry(state: &mut State, entry: &WalEntry) -> Result<bool> {
    let mut tx = Transaction::new(entry.operation.kind(), entry.operation.document_id());
    tx.wal_written(entry.lsn)?;
    match state.apply(&entry.operation, entry.lsn, &mut tx) {
        Ok(true) => {
            tx.commit()?;
            Ok(true)
        }
        Ok(false) => Ok(false),
        // A delete for a document the state never saw changes nothing
        Err(EngineError::NotFound { what }) => {
            warn!(lsn = entry.lsn, %what, "replayed delete found no live document");
            tx.fail("nothing to delete");
            state.last_seq = state.last_seq.max(entry.lsn);
            Ok(false)
        }
        Err(e) => {
            tx.fail(&e.to_string());
            Err(e)
        }
    }
}
