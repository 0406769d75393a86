//! The quad-store facade: the single entry point
//! that owns the atom store, the four indexes, and the WAL writer, holds
//! the reader-writer lock, and recovers at open. Every mutation funnels
//! through here and reaches the WAL before the in-memory indexes are
//! updated, mirroring how `oxigraph`'s `Storage::transaction` is the only
//! door into its backend.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::atom::AtomStore;
use crate::error::{ChronographError, LockError, Result};
use crate::model::{Quad, Term};
use crate::storage::index::RecordStore;
use crate::storage::lock::StoreLock;
use crate::storage::record::{now_tick, QuadRecord, OPEN_FUTURE};
use crate::storage::{Engine, StorageStats};

/// How a `QuadPattern`'s graph slot restricts matching. Unlike `subject`/
/// `predicate`/`object` — where `None` simply means "unbound" — a quad's
/// graph has a third state: the *default* graph is itself a specific,
/// meaningful value (`g == 0`), distinct from "don't filter by graph at
/// all". Collapsing those two into one `Option<&Term>` is what used to
/// make bare `{ ?s ?p ?o }` patterns match every named graph instead of
/// just the default one.
#[derive(Clone, Debug, Default)]
pub enum GraphConstraint<'a> {
    /// No graph filter: matches the default graph and every named graph.
    #[default]
    Any,
    /// Matches only the store's default graph.
    DefaultGraph,
    /// Matches only this named graph.
    Named(&'a Term),
}

/// A `(s,p,o,g)` match pattern. `None` in the `subject`/`predicate`/
/// `object` slots means "unbound" — the reserved atom-id `0` wildcard,
/// surfaced at the API boundary as an `Option<&Term>` so callers don't
/// need to know about atom ids. `graph` is a [`GraphConstraint`] rather
/// than `Option<&Term>` for the same reason: "default graph" and
/// "unconstrained" are different things.
#[derive(Clone, Debug, Default)]
pub struct QuadPattern<'a> {
    pub subject: Option<&'a Term>,
    pub predicate: Option<&'a Term>,
    pub object: Option<&'a Term>,
    pub graph: GraphConstraint<'a>,
}

impl<'a> QuadPattern<'a> {
    /// Fully unconstrained: matches every `(s,p,o)` in every graph.
    pub fn any() -> Self {
        Self::default()
    }

    /// Unconstrained on `(s,p,o)`, restricted to the store's default graph.
    pub fn default_graph() -> Self {
        Self {
            graph: GraphConstraint::DefaultGraph,
            ..Self::default()
        }
    }
}

/// A resolved quad returned from a query: the decoded `Term`s plus its
/// validity interval and tombstone flag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QuadRow {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: Option<Term>,
    pub valid_from: i64,
    pub valid_to: i64,
    pub is_deleted: bool,
}

pub struct QuadStore {
    lock: StoreLock<Engine>,
    disposed: AtomicBool,
}

impl QuadStore {
    /// Opens (or creates) a store directory, running the engine's
    /// recovery protocol. Recovery failures are fatal: the store does
    /// not open.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let engine = Engine::open(dir.as_ref())?;
        Ok(Self {
            lock: StoreLock::new(engine),
            disposed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ChronographError::Disposed);
        }
        Ok(())
    }

    /// Marks the store read-only-disposed after a fatal storage error: a
    /// disposed store rejects every further operation.
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    pub fn acquire_read_lock(&self) -> Result<crate::storage::lock::ReadLease<'_, Engine>> {
        self.check_open()?;
        Ok(self.lock.acquire_read().map_err(ChronographError::from)?)
    }

    /// Adds one quad, fsyncing immediately as its own single-record
    /// commit. Returns `true`: adds always succeed unless the store is
    /// disposed or storage fails.
    pub fn add(&self, quad: &Quad) -> Result<bool> {
        self.check_open()?;
        let mut engine = self.lock.acquire_write().map_err(ChronographError::from)?;
        let result = (|| -> Result<bool> {
            let (s, p, o, g) = intern_quad(&mut engine, quad)?;
            engine.add_record(QuadRecord::new(s, p, o, g, quad.valid_from, quad.valid_to))?;
            Ok(true)
        })();
        if result.is_err() {
            drop(engine);
            self.dispose();
        }
        result
    }

    /// Writes a tombstone for the live version of `(s,p,o,g)`, if any.
    /// Deleting an already-deleted or nonexistent triple returns `false`
    /// but is not an error.
    pub fn delete(&self, subject: &Term, predicate: &Term, object: &Term, graph: Option<&Term>) -> Result<bool> {
        self.check_open()?;
        let mut engine = self.lock.acquire_write().map_err(ChronographError::from)?;
        let result = (|| -> Result<bool> {
            let s = match engine.atoms().lookup(&subject.to_canonical_form()) {
                Some(id) => id,
                None => return Ok(false),
            };
            let p = match engine.atoms().lookup(&predicate.to_canonical_form()) {
                Some(id) => id,
                None => return Ok(false),
            };
            let o = match engine.atoms().lookup(&object.to_canonical_form()) {
                Some(id) => id,
                None => return Ok(false),
            };
            let g = match graph {
                Some(term) => match engine.atoms().lookup(&term.to_canonical_form()) {
                    Some(id) => id,
                    None => return Ok(false),
                },
                None => 0,
            };
            let now = now_tick();
            let live = current_live_record(engine.records(), s, p, o, g, now);
            if live.is_none() {
                return Ok(false);
            }
            engine.add_record(QuadRecord::tombstone(s, p, o, g, now, OPEN_FUTURE))?;
            Ok(true)
        })();
        if result.is_err() {
            drop(engine);
            self.dispose();
        }
        result
    }

    /// Runs `f` as a single atomic batch: the write lock is held for the
    /// batch's entire lifetime, and a storage failure mid batch leaves an
    /// aborted (not partially applied) WAL trace that recovery will
    /// discard.
    pub fn batch<T>(&self, f: impl FnOnce(&mut BatchWriter<'_>) -> Result<T>) -> Result<T> {
        self.check_open()?;
        let mut engine = self.lock.acquire_write().map_err(ChronographError::from)?;
        let tx_id = engine.begin_batch()?;
        let mut writer = BatchWriter {
            engine: &mut engine,
            affected: 0,
        };
        match f(&mut writer) {
            Ok(value) => {
                let commit = engine.commit_batch(tx_id);
                if let Err(e) = commit {
                    self.dispose();
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                let _ = engine.abort_batch(tx_id);
                Err(e)
            }
        }
    }

    /// As `batch`, but fails fast if the write lock cannot be acquired
    /// within `timeout`.
    pub fn batch_timeout<T>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&mut BatchWriter<'_>) -> Result<T>,
    ) -> Result<T> {
        self.check_open()?;
        let mut engine = self
            .lock
            .acquire_write_timeout(timeout)
            .map_err(ChronographError::from)?;
        let tx_id = engine.begin_batch()?;
        let mut writer = BatchWriter {
            engine: &mut engine,
            affected: 0,
        };
        match f(&mut writer) {
            Ok(value) => {
                engine.commit_batch(tx_id)?;
                Ok(value)
            }
            Err(e) => {
                let _ = engine.abort_batch(tx_id);
                Err(e)
            }
        }
    }

    /// `queryAsOf(now())`: current state is just the `now` instant of
    /// time travel.
    pub fn query_current(&self, pattern: &QuadPattern<'_>) -> Result<Vec<QuadRow>> {
        self.query_as_of(pattern, now_tick())
    }

    pub fn query_as_of(&self, pattern: &QuadPattern<'_>, tau: i64) -> Result<Vec<QuadRow>> {
        self.check_open()?;
        let engine = self.lock.acquire_read().map_err(ChronographError::from)?;
        let (s, p, o, g) = lookup_pattern(engine.atoms(), pattern);
        let Some((s, p, o, g)) = (s, p, o, g).transpose_pattern() else {
            return Ok(Vec::new());
        };
        let candidates = engine.records().scan(s, p, o, g);
        let mut groups: std::collections::HashMap<(u32, u32, u32, u32), Vec<&QuadRecord>> =
            std::collections::HashMap::new();
        for id in candidates {
            let r = engine.records().get(id);
            groups.entry(r.spog_key()).or_default().push(r);
        }
        let mut rows = Vec::new();
        for (_, mut versions) in groups {
            versions.sort_by_key(|r| r.valid_from);
            if let Some(latest) = versions.iter().rev().find(|r| r.valid_from <= tau) {
                if !latest.is_deleted() && tau < latest.valid_to {
                    rows.push(decode_row(engine.atoms(), latest));
                }
            }
        }
        Ok(rows)
    }

    /// Facts whose interval overlaps `[range_start, range_end)`:
    /// `f < range_end && t > range_start`. Every overlapping record
    /// version is returned, tombstones included.
    pub fn query_changes(
        &self,
        pattern: &QuadPattern<'_>,
        range_start: i64,
        range_end: i64,
    ) -> Result<Vec<QuadRow>> {
        self.check_open()?;
        let engine = self.lock.acquire_read().map_err(ChronographError::from)?;
        let (s, p, o, g) = lookup_pattern(engine.atoms(), pattern);
        let Some((s, p, o, g)) = (s, p, o, g).transpose_pattern() else {
            return Ok(Vec::new());
        };
        let mut ids = engine.records().scan(s, p, o, g);
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .map(|id| engine.records().get(id))
            .filter(|r| r.overlaps(range_start, range_end))
            .map(|r| decode_row(engine.atoms(), r))
            .collect())
    }

    /// Every record ever written for the matching pattern, in insertion
    /// order, ignoring validity and tombstones.
    pub fn query_evolution(&self, pattern: &QuadPattern<'_>) -> Result<Vec<QuadRow>> {
        self.check_open()?;
        let engine = self.lock.acquire_read().map_err(ChronographError::from)?;
        let (s, p, o, g) = lookup_pattern(engine.atoms(), pattern);
        let Some((s, p, o, g)) = (s, p, o, g).transpose_pattern() else {
            return Ok(Vec::new());
        };
        let mut ids = engine.records().scan(s, p, o, g);
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .map(|id| decode_row(engine.atoms(), engine.records().get(id)))
            .collect())
    }

    /// Every named graph that has ever held a quad, for `GRAPH ?g { ... }`
    /// enumeration. Doesn't filter out graphs whose quads have since been
    /// tombstoned entirely — a query against such a graph simply matches
    /// nothing.
    pub fn distinct_graphs(&self) -> Result<Vec<Term>> {
        self.check_open()?;
        let engine = self.lock.acquire_read().map_err(ChronographError::from)?;
        Ok(engine
            .records()
            .distinct_graphs()
            .into_iter()
            .filter_map(|id| Term::parse_canonical(engine.atoms().resolve(id)))
            .collect())
    }

    pub fn stats(&self) -> Result<StorageStats> {
        self.check_open()?;
        let engine = self.lock.acquire_read().map_err(ChronographError::from)?;
        Ok(engine.stats()?)
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.check_open()?;
        let mut engine = self.lock.acquire_write().map_err(ChronographError::from)?;
        engine.checkpoint()?;
        Ok(())
    }

    /// Disposes the store. After this, every operation returns
    /// `ChronographError::Disposed`.
    pub fn close(&self) {
        self.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// The write handle passed into `QuadStore::batch`'s closure. All writes
/// made through it share the batch's single WAL transaction and fsync.
pub struct BatchWriter<'a> {
    engine: &'a mut Engine,
    affected: usize,
}

impl BatchWriter<'_> {
    pub fn add(&mut self, quad: &Quad) -> Result<()> {
        let (s, p, o, g) = intern_quad(self.engine, quad)?;
        self.engine
            .add_record_in_batch(QuadRecord::new(s, p, o, g, quad.valid_from, quad.valid_to))?;
        self.affected += 1;
        Ok(())
    }

    pub fn delete(&mut self, subject: &Term, predicate: &Term, object: &Term, graph: Option<&Term>) -> Result<bool> {
        let s = match self.engine.atoms().lookup(&subject.to_canonical_form()) {
            Some(id) => id,
            None => return Ok(false),
        };
        let p = match self.engine.atoms().lookup(&predicate.to_canonical_form()) {
            Some(id) => id,
            None => return Ok(false),
        };
        let o = match self.engine.atoms().lookup(&object.to_canonical_form()) {
            Some(id) => id,
            None => return Ok(false),
        };
        let g = match graph {
            Some(term) => match self.engine.atoms().lookup(&term.to_canonical_form()) {
                Some(id) => id,
                None => return Ok(false),
            },
            None => 0,
        };
        let now = now_tick();
        if current_live_record(self.engine.records(), s, p, o, g, now).is_none() {
            return Ok(false);
        }
        self.engine
            .add_record_in_batch(QuadRecord::tombstone(s, p, o, g, now, OPEN_FUTURE))?;
        self.affected += 1;
        Ok(true)
    }

    /// Tombstones every live quad matching `pattern` as of now; used by
    /// the update executor's `CLEAR`/`DROP`.
    pub fn clear_matching(&mut self, pattern: &QuadPattern<'_>) -> Result<usize> {
        let (s, p, o, g) = lookup_pattern(self.engine.atoms(), pattern);
        let Some((s, p, o, g)) = (s, p, o, g).transpose_pattern() else {
            return Ok(0);
        };
        let now = now_tick();
        let ids = self.engine.records().scan(s, p, o, g);
        let mut groups: std::collections::HashMap<(u32, u32, u32, u32), Vec<(usize, QuadRecord)>> =
            std::collections::HashMap::new();
        for id in ids {
            let r = *self.engine.records().get(id);
            groups.entry(r.spog_key()).or_default().push((id, r));
        }
        let mut tombstones = Vec::new();
        for (_, mut versions) in groups {
            versions.sort_by_key(|(_, r)| r.valid_from);
            if let Some((_, latest)) = versions.iter().rev().find(|(_, r)| r.valid_from <= now) {
                if !latest.is_deleted() && now < latest.valid_to {
                    tombstones.push((latest.s, latest.p, latest.o, latest.g));
                }
            }
        }
        let count = tombstones.len();
        for (s, p, o, g) in tombstones {
            self.engine
                .add_record_in_batch(QuadRecord::tombstone(s, p, o, g, now, OPEN_FUTURE))?;
        }
        self.affected += count;
        Ok(count)
    }

    pub fn intern(&mut self, term: &Term) -> Result<u32> {
        Ok(self.engine.intern(&term.to_canonical_form())?)
    }

    pub fn affected_count(&self) -> usize {
        self.affected
    }

    pub fn engine(&self) -> &Engine {
        self.engine
    }
}

fn intern_quad(engine: &mut Engine, quad: &Quad) -> Result<(u32, u32, u32, u32)> {
    let s = engine.intern(&quad.subject.to_canonical_form())?;
    let p = engine.intern(&quad.predicate.to_canonical_form())?;
    let o = engine.intern(&quad.object.to_canonical_form())?;
    let g = match &quad.graph {
        Some(term) => engine.intern(&term.to_canonical_form())?,
        None => 0,
    };
    Ok((s, p, o, g))
}

fn lookup_pattern(
    atoms: &AtomStore,
    pattern: &QuadPattern<'_>,
) -> (Option<u32>, Option<u32>, Option<u32>, Option<u32>) {
    let lookup_or_unbound = |term: Option<&Term>| -> Option<u32> {
        match term {
            None => Some(0),
            Some(t) => atoms.lookup(&t.to_canonical_form()),
        }
    };
    let g = match pattern.graph {
        GraphConstraint::Any => Some(crate::storage::index::GRAPH_WILDCARD),
        GraphConstraint::DefaultGraph => Some(0),
        GraphConstraint::Named(t) => atoms.lookup(&t.to_canonical_form()),
    };
    (
        lookup_or_unbound(pattern.subject),
        lookup_or_unbound(pattern.predicate),
        lookup_or_unbound(pattern.object),
        g,
    )
}

trait TransposePattern {
    fn transpose_pattern(self) -> Option<(u32, u32, u32, u32)>;
}

impl TransposePattern for (Option<u32>, Option<u32>, Option<u32>, Option<u32>) {
    fn transpose_pattern(self) -> Option<(u32, u32, u32, u32)> {
        Some((self.0?, self.1?, self.2?, self.3?))
    }
}

fn current_live_record(
    records: &RecordStore,
    s: u32,
    p: u32,
    o: u32,
    g: u32,
    tau: i64,
) -> Option<QuadRecord> {
    let ids = records.scan(s, p, o, g);
    let mut versions: Vec<&QuadRecord> = ids
        .iter()
        .map(|&id| records.get(id))
        .filter(|r| r.spog_key() == (s, p, o, g))
        .collect();
    versions.sort_by_key(|r| r.valid_from);
    versions
        .into_iter()
        .rev()
        .find(|r| r.valid_from <= tau)
        .filter(|r| !r.is_deleted() && tau < r.valid_to)
        .copied()
}

fn decode_row(atoms: &AtomStore, record: &QuadRecord) -> QuadRow {
    QuadRow {
        subject: Term::parse_canonical(atoms.resolve(record.s)).expect("interned term decodes"),
        predicate: Term::parse_canonical(atoms.resolve(record.p)).expect("interned term decodes"),
        object: Term::parse_canonical(atoms.resolve(record.o)).expect("interned term decodes"),
        graph: if record.g == 0 {
            None
        } else {
            Term::parse_canonical(atoms.resolve(record.g))
        },
        valid_from: record.valid_from,
        valid_to: record.valid_to,
        is_deleted: record.is_deleted(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn quad(s: &str, p: &str, o: &str) -> Quad {
        Quad::new(Term::named_node(s), Term::named_node(p), Term::named_node(o), None)
            .with_interval(0, OPEN_FUTURE)
    }

    #[test]
    fn default_graph_pattern_excludes_named_graphs() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        store.add(&quad("http://s", "http://p", "http://default")).unwrap();
        let named = Quad::new(
            Term::named_node("http://s"),
            Term::named_node("http://p"),
            Term::named_node("http://named"),
            Some(Term::named_node("http://e/g1")),
        )
        .with_interval(0, OPEN_FUTURE);
        store.add(&named).unwrap();

        let default_rows = store.query_current(&QuadPattern::default_graph()).unwrap();
        assert_eq!(default_rows.len(), 1);
        assert_eq!(default_rows[0].object, Term::named_node("http://default"));

        let all_rows = store.query_current(&QuadPattern::any()).unwrap();
        assert_eq!(all_rows.len(), 2);
    }

    #[test]
    fn add_then_query_current_round_trips() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        let q = quad("http://s", "http://p", "http://o");
        store.add(&q).unwrap();
        let rows = store.query_current(&QuadPattern::any()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject, q.subject);
    }

    #[test]
    fn delete_then_query_current_is_empty_but_evolution_keeps_tombstone() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        let q = quad("http://s", "http://p", "http://o");
        store.add(&q).unwrap();
        let deleted = store
            .delete(&q.subject, &q.predicate, &q.object, None)
            .unwrap();
        assert!(deleted);
        assert!(store.query_current(&QuadPattern::any()).unwrap().is_empty());
        let history = store.query_evolution(&QuadPattern::any()).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[1].is_deleted);
    }

    #[test]
    fn deleting_nonexistent_triple_returns_false_not_error() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        let q = quad("http://s", "http://p", "http://o");
        let deleted = store
            .delete(&q.subject, &q.predicate, &q.object, None)
            .unwrap();
        assert!(!deleted);
    }

    #[test]
    fn temporal_boundary_scenario_a() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        let q = quad("http://s", "http://p", "http://o").with_interval(1000, 2000);
        store.add(&q).unwrap();
        assert_eq!(store.query_as_of(&QuadPattern::any(), 1000).unwrap().len(), 1);
        assert_eq!(store.query_as_of(&QuadPattern::any(), 2000).unwrap().len(), 0);
        assert_eq!(store.query_as_of(&QuadPattern::any(), 1999).unwrap().len(), 1);
    }

    #[test]
    fn zero_duration_scenario_b() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        let q = quad("http://s", "http://p", "http://o").with_interval(500, 500);
        store.add(&q).unwrap();
        assert_eq!(store.query_as_of(&QuadPattern::any(), 500).unwrap().len(), 0);
        assert_eq!(store.query_changes(&QuadPattern::any(), 499, 501).unwrap().len(), 1);
        assert_eq!(store.query_evolution(&QuadPattern::any()).unwrap().len(), 1);
    }

    #[test]
    fn batch_is_atomic_and_counts_affected() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        let affected = store
            .batch(|b| {
                for i in 0..50 {
                    b.add(&quad(
                        &format!("http://s{i}"),
                        "http://p",
                        "http://o",
                    ))?;
                }
                Ok(b.affected_count())
            })
            .unwrap();
        assert_eq!(affected, 50);
        assert_eq!(store.query_current(&QuadPattern::any()).unwrap().len(), 50);
    }

    #[test]
    fn recovery_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = QuadStore::open(dir.path()).unwrap();
            store
                .batch(|b| {
                    for i in 0..50 {
                        b.add(&quad(&format!("http://s{i}"), "http://p", "http://o"))?;
                    }
                    Ok(())
                })
                .unwrap();
        }
        let store = QuadStore::open(dir.path()).unwrap();
        assert_eq!(store.query_current(&QuadPattern::any()).unwrap().len(), 50);
    }

    #[test]
    fn write_recursion_inside_a_batch_is_reported() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        let result = store.batch(|_b| {
            // Attempting to re-enter the write lock from the same flow.
            store.add(&quad("http://s", "http://p", "http://o"))?;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(ChronographError::Concurrency(LockError::Recursion))
        ));
    }

    #[test]
    fn disposed_store_rejects_further_operations() {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        store.close();
        let result = store.add(&quad("http://s", "http://p", "http://o"));
        assert!(matches!(result, Err(ChronographError::Disposed)));
    }
}
