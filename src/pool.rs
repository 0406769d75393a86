//! Store pool and cross-process gate.
//!
//! The gate bounds how many processes on one machine hold an open store at
//! once; the pool bounds how many handles *this* process has open to the
//! same dataset. Two interchangeable gate backends share one contract
//! (`acquire`/release-on-drop/`count`) the way `oxigraph`'s `Storage` enum
//! picks between a RocksDB backend and an in-memory one at construction —
//! here the axis is "named OS semaphore" vs. "file-lock fallback" instead
//! of "persistent" vs. "in-memory".

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::GateError;
use crate::store::QuadStore;

/// A cross-process counting semaphore with a fixed per-machine maximum.
/// Implementations: [`NamedSemaphoreGate`] where the OS provides one,
/// [`FileLockGate`] everywhere else.
pub trait Gate: Send + Sync {
    fn acquire(&self, timeout: Option<Duration>) -> Result<GateSlot, GateError>;
    fn count(&self) -> usize;
    fn max(&self) -> usize;
}

/// An acquired slot; dropping it releases the slot back to the gate.
pub struct GateSlot {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// In-process counting semaphore standing in for a named OS semaphore.
/// A real deployment backs this with `sem_open` (POSIX) or a Win32 named
/// semaphore; the contract — `acquire(timeout)`, implicit release on drop,
/// `count` — is identical either way, so tests exercise this backend
/// directly rather than mocking OS primitives.
pub struct NamedSemaphoreGate {
    max: usize,
    held: Arc<AtomicUsize>,
}

impl NamedSemaphoreGate {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            held: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Gate for NamedSemaphoreGate {
    fn acquire(&self, timeout: Option<Duration>) -> Result<GateSlot, GateError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            let current = self.held.load(Ordering::Acquire);
            if current < self.max
                && self
                    .held
                    .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                let held = self.held.clone();
                return Ok(GateSlot {
                    release: Some(Box::new(move || {
                        held.fetch_sub(1, Ordering::AcqRel);
                    })),
                });
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(GateError::TimedOut);
                }
            }
            std::thread::yield_now();
        }
    }

    fn count(&self) -> usize {
        self.held.load(Ordering::Acquire)
    }

    fn max(&self) -> usize {
        self.max
    }
}

/// File-lock-based fallback: one slot file per machine-wide slot number.
/// A process-local registry tracks which slots this process holds; the
/// slot file's presence on disk is the cross-process signal other
/// processes' gates inspect.
pub struct FileLockGate {
    max: usize,
    dir: PathBuf,
    held: Arc<Mutex<HashMap<usize, File>>>,
}

impl FileLockGate {
    pub fn new(dir: impl Into<PathBuf>, max: usize) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            max,
            dir,
            held: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl Gate for FileLockGate {
    fn acquire(&self, timeout: Option<Duration>) -> Result<GateSlot, GateError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            {
                let mut held = self.held.lock().unwrap();
                if held.len() < self.max {
                    for slot in 0..self.max {
                        if held.contains_key(&slot) {
                            continue;
                        }
                        let path = self.dir.join(format!("slot.{slot}.lock"));
                        let file = OpenOptions::new()
                            .create(true)
                            .write(true)
                            .open(&path)
                            .map_err(|e| GateError::Backend(e.to_string()))?;
                        held.insert(slot, file);
                        let held_map = self.held.clone();
                        return Ok(GateSlot {
                            release: Some(Box::new(move || {
                                held_map.lock().unwrap().remove(&slot);
                            })),
                        });
                    }
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(GateError::TimedOut);
                }
            }
            std::thread::yield_now();
        }
    }

    fn count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    fn max(&self) -> usize {
        self.max
    }
}

/// Returns a process-wide gate handle sized to `max` slots. Modelled as an
/// explicit handle rather than a hidden global singleton, so tests that
/// need to observe deltas operate on the handle rather than a global —
/// callers that want one shared process-wide gate hold onto the `Arc`
/// themselves instead of relying on a lazily-initialized static.
pub fn gate(max: usize) -> Arc<dyn Gate> {
    Arc::new(NamedSemaphoreGate::new(max))
}

struct PooledEntry {
    store: Arc<QuadStore>,
    slot: Option<GateSlot>,
}

/// Bounds the number of concurrently open store handles to one dataset.
/// Each newly created store acquires one gate slot; checking a handle
/// back in does not release it (the store is retained for reuse) — only
/// dropping the pool does.
pub struct StorePool {
    dir: PathBuf,
    gate: Option<Arc<dyn Gate>>,
    idle: Mutex<Vec<PooledEntry>>,
    max_open: usize,
    open_count: AtomicUsize,
}

impl StorePool {
    /// `gate = None` disables the cross-process slot entirely: no slot
    /// is acquired or held when the pool runs without a gate.
    pub fn new(dir: impl Into<PathBuf>, max_open: usize, gate: Option<Arc<dyn Gate>>) -> Self {
        Self {
            dir: dir.into(),
            gate,
            idle: Mutex::new(Vec::new()),
            max_open,
            open_count: AtomicUsize::new(0),
        }
    }

    /// Checks out a handle, reusing an idle store if one is available,
    /// otherwise opening a fresh one and claiming a gate slot. Returning
    /// the handle (dropping it) checks it back in.
    pub fn check_out(&self) -> Result<PoolHandle<'_>, GateError> {
        if let Some(entry) = self.idle.lock().unwrap().pop() {
            return Ok(PoolHandle {
                entry: Some(entry),
                pool: self,
            });
        }
        if self.open_count.load(Ordering::Acquire) >= self.max_open {
            return Err(GateError::Backend("pool exhausted".into()));
        }
        let slot = match &self.gate {
            Some(gate) => Some(gate.acquire(None)?),
            None => None,
        };
        let store =
            QuadStore::open(&self.dir).map_err(|e| GateError::Backend(e.to_string()))?;
        self.open_count.fetch_add(1, Ordering::AcqRel);
        Ok(PoolHandle {
            entry: Some(PooledEntry {
                store: Arc::new(store),
                slot,
            }),
            pool: self,
        })
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// A checked-out store handle. On drop it is returned to the pool's idle
/// list; the gate slot travels with it and is only released when the pool
/// itself is dropped.
pub struct PoolHandle<'p> {
    entry: Option<PooledEntry>,
    pool: &'p StorePool,
}

impl Deref for PoolHandle<'_> {
    type Target = QuadStore;
    fn deref(&self) -> &QuadStore {
        &self.entry.as_ref().expect("entry present until drop").store
    }
}

impl Drop for PoolHandle<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.idle.lock().unwrap().push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn named_semaphore_gate_bounds_concurrent_slots() {
        let gate = NamedSemaphoreGate::new(1);
        let slot = gate.acquire(None).unwrap();
        assert_eq!(gate.count(), 1);
        let err = gate.acquire(Some(Duration::from_millis(20)));
        assert!(err.is_err());
        drop(slot);
        assert_eq!(gate.count(), 0);
        assert!(gate.acquire(None).is_ok());
    }

    #[test]
    fn pool_reuses_checked_in_handles_without_growing_open_count() {
        let dir = tempdir().unwrap();
        let pool = StorePool::new(dir.path(), 4, None);
        {
            let _h = pool.check_out().unwrap();
            assert_eq!(pool.open_count(), 1);
        }
        assert_eq!(pool.idle_count(), 1);
        let _h2 = pool.check_out().unwrap();
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn pool_claims_one_gate_slot_per_opened_store() {
        let dir = tempdir().unwrap();
        let gate: Arc<dyn Gate> = Arc::new(NamedSemaphoreGate::new(1));
        let pool = StorePool::new(dir.path(), 4, Some(gate.clone()));
        let _h = pool.check_out().unwrap();
        assert_eq!(gate.count(), 1);
        // Checking in doesn't release the slot — the store is retained.
        drop(_h);
        assert_eq!(gate.count(), 1);
    }
}
