//! Molcurate record store
//!
//! A small relational store for deposited structures and everything derived
//! from them:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          DATABASE                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  Transaction ──► validate ──► census.wal ──► Tables (committed)  │
//! │  (buffered       (whole        (fsync'd      │                   │
//! │   mutations)      batch)        frames)      ▼                   │
//! │                                          checkpoint              │
//! │                                              │                   │
//! │                                              ▼                   │
//! │                                         tables.bin               │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Atomic**: a transaction is validated as a whole before anything is
//!   logged or applied
//! - **Durable**: committed batches survive a crash via the write-ahead log
//! - **Typed**: every table is keyed by its own surrogate id type

pub mod ids;
pub mod persistence;
pub mod record;
pub mod schema;
pub mod tables;


pub use ids::*;
pub use record::*;
pub use schema::*;
pub use tables::{Mutation, TableCounts, Tables};

use persistence::{WalEntry, WriteAheadLog};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{table} {key} does not exist")]
    MissingRow { table: &'static str, key: String },

    #[error("{table} {key} already exists")]
    DuplicateRow { table: &'static str, key: String },

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Invalid record {record}: {message}")]
    InvalidRecord { record: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt store file: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// fsync the log after every commit
    pub sync_writes: bool,
    /// Write a snapshot and truncate the log after this many commits (0 = never)
    pub checkpoint_after_commits: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_writes: true,
            checkpoint_after_commits: 0,
        }
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// Buffered writes. Nothing is visible until [`Database::commit`].
#[derive(Debug, Clone)]
pub struct Transaction {
    id: u64,
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl Extend<Mutation> for Transaction {
    fn extend<I: IntoIterator<Item = Mutation>>(&mut self, iter: I) {
        self.mutations.extend(iter);
    }
}

// ============================================================================
// Database
// ============================================================================

struct DiskStorage {
    dir: PathBuf,
    wal: WriteAheadLog,
}

pub struct Database {
    tables: Tables,
    sequences: IdSequences,
    disk: Option<DiskStorage>,
    config: StoreConfig,
    next_tx_id: u64,
    commits_since_checkpoint: usize,
}

impl Database {
    /// A store with no files behind it.
    pub fn in_memory() -> Self {
        Self {
            tables: Tables::default(),
            sequences: IdSequences::default(),
            disk: None,
            config: StoreConfig::default(),
            next_tx_id: 1,
            commits_since_checkpoint: 0,
        }
    }

    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::open_with_config(dir, StoreConfig::default())
    }

    /// Open (or create) the store in `dir` and recover committed state.
    pub fn open_with_config(dir: &Path, config: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;

        let mut tables = persistence::read_snapshot(dir)?;
        let wal = WriteAheadLog::open(&dir.join(persistence::WAL_FILE))?;
        let (replayed, max_tx_id) = persistence::recover(&wal, &mut tables)?;

        tracing::debug!(
            dir = %dir.display(),
            structures = tables.counts().structures,
            replayed,
            "Opened store"
        );

        Ok(Self {
            sequences: tables.id_high_water(),
            tables,
            disk: Some(DiskStorage {
                dir: dir.to_path_buf(),
                wal,
            }),
            config,
            next_tx_id: max_tx_id + 1,
            commits_since_checkpoint: replayed,
        })
    }

    /// Committed state.
    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Id sequences for rows about to be inserted.
    pub fn ids(&mut self) -> &mut IdSequences {
        &mut self.sequences
    }

    pub fn path(&self) -> Option<&Path> {
        self.disk.as_ref().map(|d| d.dir.as_path())
    }

    pub fn begin(&mut self) -> Transaction {
        let id = self.next_tx_id;
        self.next_tx_id += 1;
        Transaction {
            id,
            mutations: Vec::new(),
        }
    }

    /// Validate, log, and apply `tx` as one unit.
    pub fn commit(&mut self, tx: Transaction) -> Result<(), StoreError> {
        if tx.is_empty() {
            return Ok(());
        }

        self.tables.validate(&tx.mutations)?;

        if let Some(disk) = &self.disk {
            let mut entries = Vec::with_capacity(tx.mutations.len() + 2);
            entries.push(WalEntry::BeginTx {
                tx_id: tx.id,
                timestamp: chrono::Utc::now().timestamp(),
            });
            entries.extend(tx.mutations.iter().cloned().map(|mutation| WalEntry::Apply {
                tx_id: tx.id,
                mutation,
            }));
            entries.push(WalEntry::CommitTx { tx_id: tx.id });
            disk.wal.append_all(&entries, self.config.sync_writes)?;
        }

        let count = tx.mutations.len();
        for mutation in tx.mutations {
            self.tables.apply(mutation);
        }
        tracing::trace!(tx_id = tx.id, mutations = count, "Committed transaction");

        self.commits_since_checkpoint += 1;
        if self.config.checkpoint_after_commits > 0
            && self.commits_since_checkpoint >= self.config.checkpoint_after_commits
        {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Discard `tx`. Nothing was logged, so there is nothing to undo.
    pub fn rollback(&mut self, tx: Transaction) {
        tracing::debug!(tx_id = tx.id, discarded = tx.len(), "Rolled back transaction");
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Tables, &mut IdSequences, &mut Transaction) -> Result<T, E>,
    {
        let mut tx = self.begin();
        match f(&self.tables, &mut self.sequences, &mut tx) {
            Ok(value) => {
                self.commit(tx)?;
                Ok(value)
            }
            Err(err) => {
                self.rollback(tx);
                Err(err)
            }
        }
    }

    /// Write a snapshot and truncate the log.
    pub fn checkpoint(&mut self) -> Result<(), StoreError> {
        if let Some(disk) = &self.disk {
            persistence::write_snapshot(&disk.dir, &self.tables)?;
            disk.wal.truncate()?;
            tracing::info!(dir = %disk.dir.display(), "Checkpointed store");
        }
        self.commits_since_checkpoint = 0;
        Ok(())
    }
}
