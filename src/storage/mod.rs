//! Storage engine: atom interning, the four-index record store, the WAL,
//! checkpointing, and the non-recursive reader-writer lock. This module is
//! the low-level engine; [`crate::store::QuadStore`] is the transactional
//! facade built on top of it, appending to the WAL before updating the
//! in-memory indexes.

pub mod checkpoint;
pub mod error;
pub mod index;
pub mod lock;
pub mod record;
pub mod wal;

pub use error::{CorruptionError, StorageError};

use std::path::{Path, PathBuf};

use crate::atom::AtomStore;
use index::RecordStore;
use record::QuadRecord;
use wal::{WalRecord, WalWriter};

/// `(currentTxId, lastCheckpointTxId, walSize)`, polled by callers that
/// want to trigger compaction.
#[derive(Clone, Copy, Debug)]
pub struct StorageStats {
    pub current_tx_id: u64,
    pub last_checkpoint_tx_id: u64,
    pub wal_size: u64,
}

/// Owns the atom store, the four indexes, and the WAL writer. Not
/// thread-safe by itself — [`crate::store::QuadStore`] serializes access
/// through [`lock::StoreLock`].
pub struct Engine {
    dir: PathBuf,
    atoms: AtomStore,
    records: RecordStore,
    wal: WalWriter,
    next_tx_id: u64,
    last_checkpoint_tx_id: u64,
}

impl Engine {
    /// Runs the recovery protocol at open: load the latest valid
    /// checkpoint, replay the WAL tail after it, drop partial batches,
    /// apply everything else in order, and resume tx-id numbering after
    /// the last committed transaction.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let (mut atoms, mut records, checkpoint_tx_id) =
            match checkpoint::latest_checkpoint(&dir)? {
                Some((tx_id, path)) => {
                    tracing::info!(tx_id, "loading checkpoint image");
                    let image = checkpoint::load_image(&path)?;
                    (image.atoms, image.records, image.tx_id)
                }
                None => (AtomStore::new(), RecordStore::new(), 0),
            };

        let wal_path = dir.join("wal.log");
        let tail = wal::replay(&wal_path)?;
        let last_committed = apply_wal_tail(&mut atoms, &mut records, tail, checkpoint_tx_id);

        let next_tx_id = last_committed + 1;
        let wal = WalWriter::open(&wal_path)?;
        tracing::info!(next_tx_id, "store recovered");

        Ok(Self {
            dir,
            atoms,
            records,
            wal,
            next_tx_id,
            last_checkpoint_tx_id: checkpoint_tx_id,
        })
    }

    pub fn atoms(&self) -> &AtomStore {
        &self.atoms
    }

    pub fn atoms_mut(&mut self) -> &mut AtomStore {
        &mut self.atoms
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Interns `text`, journaling the intern if it allocated a new id.
    pub fn intern(&mut self, text: &str) -> Result<u32, StorageError> {
        if let Some(id) = self.atoms.lookup(text) {
            return Ok(id);
        }
        let id = self.atoms.intern(text);
        self.wal
            .append(&WalRecord::AtomIntern { id, text: text.to_owned() })?;
        Ok(id)
    }

    /// Appends one quad record, fsyncing immediately: every single-record
    /// commit gets its own fsync.
    pub fn add_record(&mut self, record: QuadRecord) -> Result<index::RecordId, StorageError> {
        self.wal.append(&WalRecord::QuadAdd {
            s: record.s,
            p: record.p,
            o: record.o,
            g: record.g,
            valid_from: record.valid_from,
            valid_to: record.valid_to,
            flags: record.flags,
        })?;
        self.wal.fsync()?;
        Ok(self.records.append(record))
    }

    pub fn begin_batch(&mut self) -> Result<u64, StorageError> {
        let tx_id = self.next_tx_id;
        self.next_tx_id += 1;
        self.wal.append(&WalRecord::BatchBegin { tx_id })?;
        Ok(tx_id)
    }

    /// Appends a record within an open batch without fsyncing — the whole
    /// batch fsyncs once, at `commit_batch`.
    pub fn add_record_in_batch(&mut self, record: QuadRecord) -> Result<index::RecordId, StorageError> {
        let wal_record = if record.is_deleted() {
            WalRecord::QuadDelete {
                s: record.s,
                p: record.p,
                o: record.o,
                g: record.g,
                valid_from: record.valid_from,
                valid_to: record.valid_to,
            }
        } else {
            WalRecord::QuadAdd {
                s: record.s,
                p: record.p,
                o: record.o,
                g: record.g,
                valid_from: record.valid_from,
                valid_to: record.valid_to,
                flags: record.flags,
            }
        };
        self.wal.append(&wal_record)?;
        Ok(self.records.append(record))
    }

    pub fn commit_batch(&mut self, tx_id: u64) -> Result<(), StorageError> {
        self.wal.append(&WalRecord::BatchCommit { tx_id })?;
        self.wal.fsync()?;
        tracing::debug!(tx_id, "batch committed");
        Ok(())
    }

    pub fn abort_batch(&mut self, tx_id: u64) -> Result<(), StorageError> {
        self.wal.append(&WalRecord::BatchAbort { tx_id })?;
        self.wal.fsync()?;
        tracing::debug!(tx_id, "batch aborted");
        Ok(())
    }

    /// Writes a fresh checkpoint image and truncates the WAL up to it
    ///.
    pub fn checkpoint(&mut self) -> Result<(), StorageError> {
        let tx_id = self.next_tx_id.saturating_sub(1);
        let path = checkpoint::write_image(&self.dir, tx_id, &self.atoms, &self.records)?;
        self.wal.append(&WalRecord::Checkpoint {
            tx_id,
            image_path: path.to_string_lossy().into_owned(),
        })?;
        self.wal.fsync()?;
        wal::truncate(self.wal.path())?;
        self.last_checkpoint_tx_id = tx_id;
        tracing::info!(tx_id, "checkpoint complete, WAL truncated");
        Ok(())
    }

    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            current_tx_id: self.next_tx_id.saturating_sub(1),
            last_checkpoint_tx_id: self.last_checkpoint_tx_id,
            wal_size: self.wal.len_bytes()?,
        })
    }
}

/// Applies the WAL tail after the checkpoint, dropping any `BatchBegin`
/// whose matching `BatchCommit` is missing, and
/// returns the highest committed `tx_id` seen (or the checkpoint's tx_id
/// if none).
fn apply_wal_tail(
    atoms: &mut AtomStore,
    records: &mut RecordStore,
    tail: Vec<WalRecord>,
    checkpoint_tx_id: u64,
) -> u64 {
    use std::collections::{HashMap, HashSet};

    let mut committed = HashSet::new();
    let mut began = HashSet::new();
    for record in &tail {
        match record {
            WalRecord::BatchBegin { tx_id } => {
                began.insert(*tx_id);
            }
            WalRecord::BatchCommit { tx_id } => {
                committed.insert(*tx_id);
            }
            _ => {}
        }
    }
    // Partial batches are begun but never committed or aborted.
    let partial: HashSet<u64> = began
        .iter()
        .copied()
        .filter(|tx_id| !committed.contains(tx_id))
        .collect();
    if !partial.is_empty() {
        tracing::warn!(count = partial.len(), "dropping partial batches on recovery");
    }

    // Track which physical record each WAL op belongs to so a whole batch
    // drops together: we interleave by re-scanning in a second pass and
    // only materialize records/atoms whose containing batch (if any)
    // committed.
    let mut current_tx: Option<u64> = None;
    let mut last_committed = checkpoint_tx_id;
    let mut pending: HashMap<u64, (Vec<(u32, String)>, Vec<QuadRecord>)> = HashMap::new();

    for record in tail {
        match record {
            WalRecord::BatchBegin { tx_id } => {
                current_tx = Some(tx_id);
                pending.entry(tx_id).or_default();
            }
            WalRecord::AtomIntern { id, text } => {
                if let Some(tx_id) = current_tx {
                    pending.entry(tx_id).or_default().0.push((id, text));
                } else {
                    atoms.restore(id, &text);
                }
            }
            WalRecord::QuadAdd {
                s,
                p,
                o,
                g,
                valid_from,
                valid_to,
                flags,
            } => {
                let mut rec = QuadRecord::new(s, p, o, g, valid_from, valid_to);
                rec.flags = flags;
                if let Some(tx_id) = current_tx {
                    pending.entry(tx_id).or_default().1.push(rec);
                } else {
                    records.append(rec);
                }
            }
            WalRecord::QuadDelete {
                s,
                p,
                o,
                g,
                valid_from,
                valid_to,
            } => {
                let rec = QuadRecord::tombstone(s, p, o, g, valid_from, valid_to);
                if let Some(tx_id) = current_tx {
                    pending.entry(tx_id).or_default().1.push(rec);
                } else {
                    records.append(rec);
                }
            }
            WalRecord::BatchCommit { tx_id } => {
                if let Some((atom_ops, record_ops)) = pending.remove(&tx_id) {
                    for (id, text) in atom_ops {
                        atoms.restore(id, &text);
                    }
                    for rec in record_ops {
                        records.append(rec);
                    }
                }
                last_committed = last_committed.max(tx_id);
                current_tx = None;
            }
            WalRecord::BatchAbort { tx_id } => {
                pending.remove(&tx_id);
                current_tx = None;
            }
            WalRecord::Checkpoint { tx_id, .. } => {
                last_committed = last_committed.max(tx_id);
            }
        }
    }
    last_committed
}
