//! Write-ahead log: append-only, checksummed, fsynced mutation journal.
//!
//! Frame layout on disk: `[u32 length][u32 crc32][payload]`. `crc32fast`
//! provides the checksum — the same integrity role `oxigraph`'s on-disk
//! backend delegates to RocksDB's block checksums, and the same role
//! `aeternusdb`-style from-scratch engines give every WAL record and
//! SSTable block.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;

use super::StorageError;

/// One durable mutation event. `bytes` is the opaque, already-serialized
/// payload produced by `encode_*`; `decode` turns it back into a `WalRecord`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WalRecord {
    AtomIntern { id: u32, text: String },
    QuadAdd {
        s: u32,
        p: u32,
        o: u32,
        g: u32,
        valid_from: i64,
        valid_to: i64,
        flags: u8,
    },
    QuadDelete {
        s: u32,
        p: u32,
        o: u32,
        g: u32,
        valid_from: i64,
        valid_to: i64,
    },
    BatchBegin { tx_id: u64 },
    BatchCommit { tx_id: u64 },
    BatchAbort { tx_id: u64 },
    Checkpoint { tx_id: u64, image_path: String },
}

const TAG_ATOM_INTERN: u8 = 1;
const TAG_QUAD_ADD: u8 = 2;
const TAG_QUAD_DELETE: u8 = 3;
const TAG_BATCH_BEGIN: u8 = 4;
const TAG_BATCH_COMMIT: u8 = 5;
const TAG_BATCH_ABORT: u8 = 6;
const TAG_CHECKPOINT: u8 = 7;

impl WalRecord {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::AtomIntern { id, text } => {
                buf.push(TAG_ATOM_INTERN);
                buf.extend_from_slice(&id.to_le_bytes());
                write_str(&mut buf, text);
            }
            Self::QuadAdd {
                s,
                p,
                o,
                g,
                valid_from,
                valid_to,
                flags,
            } => {
                buf.push(TAG_QUAD_ADD);
                for v in [s, p, o, g] {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                buf.extend_from_slice(&valid_from.to_le_bytes());
                buf.extend_from_slice(&valid_to.to_le_bytes());
                buf.push(*flags);
            }
            Self::QuadDelete {
                s,
                p,
                o,
                g,
                valid_from,
                valid_to,
            } => {
                buf.push(TAG_QUAD_DELETE);
                for v in [s, p, o, g] {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                buf.extend_from_slice(&valid_from.to_le_bytes());
                buf.extend_from_slice(&valid_to.to_le_bytes());
            }
            Self::BatchBegin { tx_id } => {
                buf.push(TAG_BATCH_BEGIN);
                buf.extend_from_slice(&tx_id.to_le_bytes());
            }
            Self::BatchCommit { tx_id } => {
                buf.push(TAG_BATCH_COMMIT);
                buf.extend_from_slice(&tx_id.to_le_bytes());
            }
            Self::BatchAbort { tx_id } => {
                buf.push(TAG_BATCH_ABORT);
                buf.extend_from_slice(&tx_id.to_le_bytes());
            }
            Self::Checkpoint { tx_id, image_path } => {
                buf.push(TAG_CHECKPOINT);
                buf.extend_from_slice(&tx_id.to_le_bytes());
                write_str(&mut buf, image_path);
            }
        }
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        let mut r = Cursor { buf, pos: 0 };
        let tag = r.read_u8()?;
        Some(match tag {
            TAG_ATOM_INTERN => Self::AtomIntern {
                id: r.read_u32()?,
                text: r.read_str()?,
            },
            TAG_QUAD_ADD => Self::QuadAdd {
                s: r.read_u32()?,
                p: r.read_u32()?,
                o: r.read_u32()?,
                g: r.read_u32()?,
                valid_from: r.read_i64()?,
                valid_to: r.read_i64()?,
                flags: r.read_u8()?,
            },
            TAG_QUAD_DELETE => Self::QuadDelete {
                s: r.read_u32()?,
                p: r.read_u32()?,
                o: r.read_u32()?,
                g: r.read_u32()?,
                valid_from: r.read_i64()?,
                valid_to: r.read_i64()?,
            },
            TAG_BATCH_BEGIN => Self::BatchBegin {
                tx_id: r.read_u64()?,
            },
            TAG_BATCH_COMMIT => Self::BatchCommit {
                tx_id: r.read_u64()?,
            },
            TAG_BATCH_ABORT => Self::BatchAbort {
                tx_id: r.read_u64()?,
            },
            TAG_CHECKPOINT => Self::Checkpoint {
                tx_id: r.read_u64()?,
                image_path: r.read_str()?,
            },
            _ => return None,
        })
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(slice)
    }

    fn read_u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.read_bytes(4)?.try_into().ok()?))
    }

    fn read_u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.read_bytes(8)?.try_into().ok()?))
    }

    fn read_i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.read_bytes(8)?.try_into().ok()?))
    }

    fn read_str(&mut self) -> Option<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

/// The append-only log writer. Fsyncs on every single-record commit, every
/// `BatchCommit`, and every `Checkpoint`.
pub struct WalWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl WalWriter {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one frame. Does not fsync by itself — callers batch the
    /// fsync decision around a whole transaction or checkpoint.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), StorageError> {
        let payload = record.encode();
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&checksum.to_le_bytes())?;
        self.file.write_all(&payload)?;
        tracing::trace!(bytes = payload.len(), "wal frame appended");
        Ok(())
    }

    pub fn fsync(&mut self) -> Result<(), StorageError> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(())
    }

    pub fn len_bytes(&self) -> Result<u64, StorageError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// Reads every well-formed frame from the start of the log. A torn final
/// frame (bad checksum or truncated length) is treated as end-of-log, not
/// corruption.
pub fn replay(path: &Path) -> Result<Vec<WalRecord>, StorageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).is_err() {
            break; // clean or torn end-of-log
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut crc_buf = [0u8; 4];
        if reader.read_exact(&mut crc_buf).is_err() {
            break;
        }
        let expected_crc = u32::from_le_bytes(crc_buf);
        let mut payload = vec![0u8; len];
        if reader.read_exact(&mut payload).is_err() {
            tracing::warn!("torn WAL frame (truncated payload), stopping replay");
            break;
        }
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != expected_crc {
            tracing::warn!("torn WAL frame (checksum mismatch), stopping replay");
            break;
        }
        match WalRecord::decode(&payload) {
            Some(record) => records.push(record),
            None => {
                tracing::warn!("unreadable WAL frame tag, stopping replay");
                break;
            }
        }
    }
    Ok(records)
}

/// Truncates the log file to zero length, used right after a successful
/// checkpoint has durably captured everything the log held.
pub fn truncate(path: &Path) -> io::Result<()> {
    let _ = OpenOptions::new().write(true).truncate(true).open(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_every_record_kind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut writer = WalWriter::open(&path).unwrap();
        let records = vec![
            WalRecord::AtomIntern {
                id: 1,
                text: "<http://x>".into(),
            },
            WalRecord::QuadAdd {
                s: 1,
                p: 2,
                o: 3,
                g: 0,
                valid_from: 10,
                valid_to: 20,
                flags: 0,
            },
            WalRecord::QuadDelete {
                s: 1,
                p: 2,
                o: 3,
                g: 0,
                valid_from: 10,
                valid_to: 20,
            },
            WalRecord::BatchBegin { tx_id: 7 },
            WalRecord::BatchCommit { tx_id: 7 },
            WalRecord::BatchAbort { tx_id: 8 },
            WalRecord::Checkpoint {
                tx_id: 7,
                image_path: "checkpoint.7.image".into(),
            },
        ];
        for r in &records {
            writer.append(r).unwrap();
        }
        writer.fsync().unwrap();
        let replayed = replay(&path).unwrap();
        assert_eq!(replayed, records);
    }

    #[test]
    fn torn_tail_is_treated_as_end_of_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut writer = WalWriter::open(&path).unwrap();
        writer
            .append(&WalRecord::BatchBegin { tx_id: 1 })
            .unwrap();
        writer.fsync().unwrap();
        // Append a truncated / garbage frame.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        let replayed = replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
    }
}
