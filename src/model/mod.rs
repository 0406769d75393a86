//! RDF term and quad model types shared between the storage engine and the
//! SPARQL layer.

mod term;

pub use term::{Literal, Term};

/// A temporal quad as seen by callers: resolved terms plus a validity
/// interval, the decoded counterpart of `storage::record::QuadRecord`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    /// `None` denotes the default graph.
    pub graph: Option<Term>,
    pub valid_from: i64,
    pub valid_to: i64,
}

impl Quad {
    pub fn new(subject: Term, predicate: Term, object: Term, graph: Option<Term>) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph,
            valid_from: crate::storage::record::now_tick(),
            valid_to: crate::storage::record::OPEN_FUTURE,
        }
    }

    pub fn with_interval(mut self, valid_from: i64, valid_to: i64) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }
}
