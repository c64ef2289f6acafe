//! Configuration for DocStore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Main configuration for a DocStore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log          (write-ahead log)
    ///     └── snapshot.db      (last checkpoint)
    pub data_dir: PathBuf,

    /// Largest accepted document content (in bytes)
    pub max_document_size: usize,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// WAL size that triggers an automatic checkpoint (in bytes)
    pub checkpoint_wal_bytes: u64,

    /// Write a checkpoint when the engine is closed
    pub checkpoint_on_close: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Maximum keys per path index node
    pub btree_order: usize,

    /// Largest result count a query may ask for
    pub max_query_limit: usize,

    // -------------------------------------------------------------------------
    // Write Latency Tracking
    // -------------------------------------------------------------------------
    /// Writes slower than this are logged and kept as outliers
    pub slow_write_threshold: Duration,

    /// Number of recent write durations percentiles are computed over
    pub latency_window: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./docstore_data"),
            max_document_size: 16 * 1024 * 1024, // 16 MB
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            checkpoint_wal_bytes: 64 * 1024 * 1024, // 64 MB
            checkpoint_on_close: true,
            btree_order: 64,
            max_query_limit: 1000,
            slow_write_threshold: Duration::from_millis(50),
            latency_window: 1000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that all parameters are usable
    pub fn validate(&self) -> Result<()> {
        if self.btree_order < 3 {
            return Err(EngineError::Config("btree_order must be >= 3".into()));
        }
        if self.max_query_limit == 0 {
            return Err(EngineError::Config("max_query_limit must be > 0".into()));
        }
        if self.max_document_size == 0 {
            return Err(EngineError::Config("max_document_size must be > 0".into()));
        }
        if self.checkpoint_wal_bytes == 0 {
            return Err(EngineError::Config("checkpoint_wal_bytes must be > 0".into()));
        }
        if self.latency_window == 0 {
            return Err(EngineError::Config("latency_window must be > 0".into()));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(EngineError::Config(
                "EveryNEntries sync count must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL size that triggers a checkpoint (in bytes)
    pub fn checkpoint_wal_bytes(mut self, bytes: u64) -> Self {
        self.config.checkpoint_wal_bytes = bytes;
        self
    }

    /// Enable or disable the checkpoint written by `close`
    pub fn checkpoint_on_close(mut self, enabled: bool) -> Self {
        self.config.checkpoint_on_close = enabled;
        self
    }

    /// Set the maximum keys per path index node
    pub fn btree_order(mut self, order: usize) -> Self {
        self.config.btree_order = order;
        self
    }

    /// Set the largest result count a query may ask for
    pub fn max_query_limit(mut self, limit: usize) -> Self {
        self.config.max_query_limit = limit;
        self
    }

    /// Set the largest accepted document content (in bytes)
    pub fn max_document_size(mut self, size: usize) -> Self {
        self.config.max_document_size = size;
        self
    }

    /// Set the duration above which a write counts as slow
    pub fn slow_write_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_write_threshold = threshold;
        self
    }

    /// Set how many recent writes latency percentiles cover
    pub fn latency_window(mut self, window: usize) -> Self {
        self.config.latency_window = window;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
