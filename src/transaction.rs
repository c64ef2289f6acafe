//! Transaction Module
//!
//! Tracks one mutation through the write path.
//!
//! ## State Machine
//! ```text
//! Pending ──▶ WalWritten ──▶ StoreApplied ──▶ IndexesApplied ──▶ Committed
//!    │            │               │                 │
//!    └────────────┴───────────────┴─────────────────┴──▶ Failed
//! ```
//!
//! A mutation that fails while `Pending` never happened. One that fails after
//! `WalWritten` is durable in the log and is completed by the next recovery.

use std::fmt;

use tracing::debug;

use crate::document::DocumentId;
use crate::error::{EngineError, Result};

/// Stage a mutation has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    WalWritten,
    StoreApplied,
    IndexesApplied,
    Committed,
    Failed,
}

impl MutationState {
    /// Whether moving from `self` to `next` is legal
    pub fn can_transition_to(self, next: MutationState) -> bool {
        use MutationState::*;
        matches!(
            (self, next),
            (Pending, WalWritten)
                | (WalWritten, StoreApplied)
                | (StoreApplied, IndexesApplied)
                | (IndexesApplied, Committed)
                | (Pending | WalWritten | StoreApplied | IndexesApplied, Failed)
        )
    }

    /// No further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Committed | MutationState::Failed)
    }

    /// The mutation is in the WAL and will survive a crash
    pub fn is_durable(self) -> bool {
        !matches!(self, MutationState::Pending | MutationState::Failed)
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationState::Pending => "pending",
            MutationState::WalWritten => "wal_written",
            MutationState::StoreApplied => "store_applied",
            MutationState::IndexesApplied => "indexes_applied",
            MutationState::Committed => "committed",
            MutationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A single mutation in flight
#[derive(Debug)]
pub struct Transaction {
    kind: &'static str,
    document: DocumentId,
    state: MutationState,
    lsn: Option<u64>,
    /// Set if the transaction failed after reaching the WAL
    failed_after_wal: bool,
}

impl Transaction {
    pub fn new(kind: &'static str, document: DocumentId) -> Self {
        Self {
            kind,
            document,
            state: MutationState::Pending,
            lsn: None,
            failed_after_wal: false,
        }
    }

    /// Record the LSN the WAL assigned
    pub fn wal_written(&mut self, lsn: u64) -> Result<()> {
        self.advance(MutationState::WalWritten)?;
        self.lsn = Some(lsn);
        Ok(())
    }

    pub fn store_applied(&mut self) -> Result<()> {
        self.advance(MutationState::StoreApplied)
    }

    pub fn indexes_applied(&mut self) -> Result<()> {
        self.advance(MutationState::IndexesApplied)
    }

    /// Finish the mutation, returning its LSN
    pub fn commit(&mut self) -> Result<u64> {
        self.advance(MutationState::Committed)?;
        self.lsn.ok_or_else(|| {
            EngineError::corruption(format!("{} committed without a WAL sequence number", self.kind))
        })
    }

    /// Abandon the mutation
    ///
    /// Returns whether it was already durable (recovery will finish it).
    pub fn fail(&mut self, reason: &str) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.failed_after_wal = self.state.is_durable();
        debug!(
            kind = self.kind,
            document = %self.document,
            from = %self.state,
            lsn = ?self.lsn,
            reason,
            "mutation failed"
        );
        self.state = MutationState::Failed;
        self.failed_after_wal
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn lsn(&self) -> Option<u64> {
        self.lsn
    }

    pub fn document(&self) -> DocumentId {
        self.document
    }

    pub fn failed_after_wal(&self) -> bool {
        self.failed_after_wal
    }

    fn advance(&mut self, next: MutationState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::corruption(format!(
                "illegal {} transition {} -> {} for document {}",
                self.kind, self.state, next, self.document
            )));
        }
        debug!(kind = self.kind, document = %self.document, from = %self.state, to = %next, "mutation state");
        self.state = next;
        Ok(())
    }
}
