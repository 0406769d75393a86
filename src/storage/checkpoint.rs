//! Checkpoint manager: periodically snapshots the
//! atom table and indexes, and lets the WAL be truncated up to the last
//! durable checkpoint.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::atom::AtomStore;
use crate::storage::index::RecordStore;
use crate::storage::record::QuadRecord;
use crate::storage::StorageError;

const MAGIC: &[u8; 4] = b"CGI1";

/// Serializes the atom table then the index dump, in that order.
pub fn write_image(
    dir: &Path,
    tx_id: u64,
    atoms: &AtomStore,
    records: &RecordStore,
) -> Result<PathBuf, StorageError> {
    let path = dir.join(format!("checkpoint.{tx_id}.image"));
    let tmp_path = dir.join(format!("checkpoint.{tx_id}.image.tmp"));
    {
        let mut w = BufWriter::new(File::create(&tmp_path)?);
        w.write_all(MAGIC)?;
        w.write_all(&tx_id.to_le_bytes())?;

        let atom_count = atoms.len() as u32;
        w.write_all(&atom_count.to_le_bytes())?;
        for (id, text) in atoms.iter() {
            w.write_all(&id.to_le_bytes())?;
            w.write_all(&(text.len() as u32).to_le_bytes())?;
            w.write_all(text.as_bytes())?;
        }

        let record_count = records.len() as u32;
        w.write_all(&record_count.to_le_bytes())?;
        for (_, r) in records.iter_all() {
            w.write_all(&r.s.to_le_bytes())?;
            w.write_all(&r.p.to_le_bytes())?;
            w.write_all(&r.o.to_le_bytes())?;
            w.write_all(&r.g.to_le_bytes())?;
            w.write_all(&r.valid_from.to_le_bytes())?;
            w.write_all(&r.valid_to.to_le_bytes())?;
            w.write_all(&[r.flags])?;
        }
        w.flush()?;
        w.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;
    tracing::info!(tx_id, path = %path.display(), "checkpoint written");
    Ok(path)
}

pub struct LoadedImage {
    pub tx_id: u64,
    pub atoms: AtomStore,
    pub records: RecordStore,
}

pub fn load_image(path: &Path) -> Result<LoadedImage, StorageError> {
    let mut r = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|_| crate::storage::error::CorruptionError::msg("truncated checkpoint header"))?;
    if &magic != MAGIC {
        return Err(crate::storage::error::CorruptionError::msg(
            "bad checkpoint magic",
        )
        .into());
    }
    let tx_id = read_u64(&mut r)?;

    let mut atoms = AtomStore::new();
    let atom_count = read_u32(&mut r)?;
    for _ in 0..atom_count {
        let id = read_u32(&mut r)?;
        let len = read_u32(&mut r)? as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)
            .map_err(|_| crate::storage::error::CorruptionError::msg("truncated atom entry"))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| crate::storage::error::CorruptionError::msg("non-utf8 atom text"))?;
        atoms.restore(id, &text);
    }

    let mut records = RecordStore::new();
    let record_count = read_u32(&mut r)?;
    for _ in 0..record_count {
        let s = read_u32(&mut r)?;
        let p = read_u32(&mut r)?;
        let o = read_u32(&mut r)?;
        let g = read_u32(&mut r)?;
        let valid_from = read_i64(&mut r)?;
        let valid_to = read_i64(&mut r)?;
        let mut flags_buf = [0u8; 1];
        r.read_exact(&mut flags_buf)
            .map_err(|_| crate::storage::error::CorruptionError::msg("truncated record flags"))?;
        let mut record = QuadRecord::new(s, p, o, g, valid_from, valid_to);
        record.flags = flags_buf[0];
        records.append(record);
    }

    Ok(LoadedImage {
        tx_id,
        atoms,
        records,
    })
}

/// Finds the checkpoint with the highest `txId` in `dir`, if any.
pub fn latest_checkpoint(dir: &Path) -> Result<Option<(u64, PathBuf)>, StorageError> {
    let mut best: Option<(u64, PathBuf)> = None;
    if !dir.exists() {
        return Ok(None);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(rest) = name
            .strip_prefix("checkpoint.")
            .and_then(|s| s.strip_suffix(".image"))
        {
            if let Ok(tx_id) = rest.parse::<u64>() {
                if best.as_ref().map_or(true, |(best_id, _)| tx_id > *best_id) {
                    best = Some((tx_id, entry.path()));
                }
            }
        }
    }
    Ok(best)
}

fn read_u32(r: &mut impl Read) -> Result<u32, StorageError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)
        .map_err(|_| crate::storage::error::CorruptionError::msg("truncated u32 field"))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64, StorageError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)
        .map_err(|_| crate::storage::error::CorruptionError::msg("truncated u64 field"))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64(r: &mut impl Read) -> Result<i64, StorageError> {
    Ok(read_u64(r)? as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_atoms_and_records() {
        let dir = tempdir().unwrap();
        let mut atoms = AtomStore::new();
        let a = atoms.intern("<http://example.com/a>");
        let b = atoms.intern("<http://example.com/b>");
        let mut records = RecordStore::new();
        records.append(QuadRecord::new(a, b, a, 0, 0, 100));

        let path = write_image(dir.path(), 42, &atoms, &records).unwrap();
        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.tx_id, 42);
        assert_eq!(loaded.atoms.len(), 2);
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.atoms.resolve(a), "<http://example.com/a>");
    }

    #[test]
    fn latest_checkpoint_picks_highest_tx_id() {
        let dir = tempdir().unwrap();
        let atoms = AtomStore::new();
        let records = RecordStore::new();
        write_image(dir.path(), 1, &atoms, &records).unwrap();
        write_image(dir.path(), 5, &atoms, &records).unwrap();
        write_image(dir.path(), 3, &atoms, &records).unwrap();
        let (tx_id, _) = latest_checkpoint(dir.path()).unwrap().unwrap();
        assert_eq!(tx_id, 5);
    }
}
