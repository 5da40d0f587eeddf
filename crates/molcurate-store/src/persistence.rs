//! Write-ahead log and snapshots.
//!
//! A store directory holds two files:
//!
//! ```text
//! <dir>/tables.bin    bincode snapshot of every table, written at checkpoint
//! <dir>/census.wal    length-prefixed bincode frames of committed batches
//! ```
//!
//! Opening a store loads the snapshot and replays every batch in the log that
//! reached its commit marker. A batch without a marker, or a torn final frame
//! left by a crash mid-append, is dropped.

use crate::tables::{Mutation, Tables};
use crate::StoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE: &str = "tables.bin";
pub const WAL_FILE: &str = "census.wal";

/// Magic bytes for the snapshot file ("MCTB")
pub const SNAPSHOT_MAGIC: [u8; 4] = [0x4D, 0x43, 0x54, 0x42];
pub const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Write-Ahead Log
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    BeginTx { tx_id: u64, timestamp: i64 },
    Apply { tx_id: u64, mutation: Mutation },
    CommitTx { tx_id: u64 },
}

pub struct WriteAheadLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl WriteAheadLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch of entries as consecutive frames.
    pub fn append_all(&self, entries: &[WalEntry], sync: bool) -> Result<u64, StoreError> {
        let mut buffer = Vec::new();
        for entry in entries {
            let data = bincode::serialize(entry)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let len = u32::try_from(data.len()).map_err(|_| {
                StoreError::Serialization(format!("WAL frame of {} bytes is too large", data.len()))
            })?;
            buffer.extend_from_slice(&len.to_le_bytes());
            buffer.extend_from_slice(&data);
        }

        let mut file = self.file.lock();
        file.write_all(&buffer)?;
        if sync {
            file.sync_data()?;
        }
        Ok(buffer.len() as u64)
    }

    /// Replay every complete frame in order.
    pub fn replay<F: FnMut(WalEntry) -> Result<(), StoreError>>(
        &self,
        mut handler: F,
    ) -> Result<(), StoreError> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;

        loop {
            let frame_start = file.stream_position()?;
            let mut len_bytes = [0u8; 4];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    // Partial length prefix; drop it so later appends stay framed.
                    file.set_len(frame_start)?;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match file.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    tracing::warn!(
                        path = %self.path.display(),
                        frame_len = len,
                        "Dropping torn frame at end of write-ahead log"
                    );
                    file.set_len(frame_start)?;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let entry: WalEntry = bincode::deserialize(&data)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))?;
            handler(entry)?;
        }

        Ok(())
    }

    /// Truncate the log after a checkpoint.
    pub fn truncate(&self) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.sync_data()?;
        Ok(())
    }
}

/// Replay `wal` into `tables`, applying committed batches in commit order.
///
/// Returns the number of batches applied and the highest transaction id seen.
pub fn recover(wal: &WriteAheadLog, tables: &mut Tables) -> Result<(usize, u64), StoreError> {
    let mut pending: HashMap<u64, Vec<Mutation>> = HashMap::new();
    let mut applied = 0;
    let mut max_tx_id = 0;

    wal.replay(|entry| {
        match entry {
            WalEntry::BeginTx { tx_id, .. } => {
                max_tx_id = max_tx_id.max(tx_id);
                pending.insert(tx_id, Vec::new());
            }
            WalEntry::Apply { tx_id, mutation } => {
                pending.entry(tx_id).or_default().push(mutation);
            }
            WalEntry::CommitTx { tx_id } => {
                for mutation in pending.remove(&tx_id).unwrap_or_default() {
                    tables.apply(mutation);
                }
                applied += 1;
            }
        }
        Ok(())
    })?;

    if !pending.is_empty() {
        tracing::warn!(
            path = %wal.path().display(),
            batches = pending.len(),
            "Discarding uncommitted batches from write-ahead log"
        );
    }

    Ok((applied, max_tx_id))
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Serialize)]
struct SnapshotRef<'a> {
    magic: [u8; 4],
    version: u32,
    tables: &'a Tables,
}

#[derive(Deserialize)]
struct Snapshot {
    magic: [u8; 4],
    version: u32,
    tables: Tables,
}

/// Write a snapshot atomically: temp file, fsync, rename.
pub fn write_snapshot(dir: &Path, tables: &Tables) -> Result<(), StoreError> {
    let data = bincode::serialize(&SnapshotRef {
        magic: SNAPSHOT_MAGIC,
        version: SNAPSHOT_VERSION,
        tables,
    })
    .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let path = dir.join(SNAPSHOT_FILE);
    let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Load the snapshot in `dir`, or empty tables if there is none yet.
pub fn read_snapshot(dir: &Path) -> Result<Tables, StoreError> {
    let path = dir.join(SNAPSHOT_FILE);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Tables::default()),
        Err(e) => return Err(e.into()),
    };

    let snapshot: Snapshot = bincode::deserialize(&data)
        .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
    if snapshot.magic != SNAPSHOT_MAGIC {
        return Err(StoreError::Corrupt(format!(
            "{}: not a molcurate snapshot",
            path.display()
        )));
    }
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::Corrupt(format!(
            "{}: snapshot version {} is not supported (expected {})",
            path.display(),
            snapshot.version,
            SNAPSHOT_VERSION
        )));
    }
    Ok(snapshot.tables)
}
