//! Solution bindings: a caller-owned arena of rows, indexed by interned
//! variable names. Iterators produce and consume row indices rather than
//! cloning whole rows between combinators, so a long pipe of joins pays
//! for variable slots once per row rather than once per stage.

use std::collections::HashMap;
use std::sync::Arc;

use super::value::Value;

/// Interns variable names to small indices shared by every row in a
/// table, the same way [`crate::atom::AtomStore`] interns term text —
/// bindings reference variables by position, never by name, once built.
#[derive(Clone, Debug, Default)]
pub struct VariableSet {
    names: Vec<Arc<str>>,
    index: HashMap<Arc<str>, usize>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.names.len();
        let arc: Arc<str> = Arc::from(name);
        self.names.push(arc.clone());
        self.index.insert(arc, idx);
        idx
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.as_ref())
    }
}

/// One solution: a fixed-width row of `Value`s, one slot per variable in
/// the owning table's [`VariableSet`].
#[derive(Clone, Debug)]
pub struct Row {
    slots: Vec<Value>,
}

impl Row {
    pub fn empty(width: usize) -> Self {
        Self {
            slots: (0..width).map(|_| Value::Unbound).collect(),
        }
    }

    pub fn get(&self, idx: usize) -> &Value {
        self.slots.get(idx).unwrap_or(&Value::Unbound)
    }

    pub fn set(&mut self, idx: usize, value: Value) {
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, Value::Unbound);
        }
        self.slots[idx] = value;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Merges `other` into `self` if every variable bound in both rows
    /// agrees (the natural-join compatibility test); returns `None` on
    /// conflict, matching SPARQL's BGP join semantics.
    pub fn merge(&self, other: &Row) -> Option<Row> {
        let width = self.slots.len().max(other.slots.len());
        let mut merged = Row::empty(width);
        for i in 0..width {
            let a = self.get(i);
            let b = other.get(i);
            match (a.is_bound(), b.is_bound()) {
                (true, true) => {
                    if a != b {
                        return None;
                    }
                    merged.set(i, a.clone());
                }
                (true, false) => merged.set(i, a.clone()),
                (false, true) => merged.set(i, b.clone()),
                (false, false) => {}
            }
        }
        Some(merged)
    }
}

/// A table of rows sharing one [`VariableSet`]: a caller-owned arena,
/// since a query execution holds one `BindingTable` for its whole
/// pipeline rather than allocating fresh rows at every stage.
#[derive(Clone, Debug, Default)]
pub struct BindingTable {
    pub vars: VariableSet,
    pub rows: Vec<Row>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-row table with no bindings — the identity element for
    /// joins, produced by an empty `{}` group graph pattern.
    pub fn unit() -> Self {
        Self {
            vars: VariableSet::new(),
            rows: vec![Row::empty(0)],
        }
    }

    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn var_index(&mut self, name: &str) -> usize {
        self.vars.intern(name)
    }
}
