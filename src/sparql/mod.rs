//! SPARQL 1.1 query and update engine: a zero-copy parser, an expression
//! evaluator, an iterator-model executor, and an update executor, all
//! layered on top of [`crate::store::QuadStore`].

pub mod aggregate;
pub mod algebra;
pub mod binding;
pub mod expression;
pub mod iterators;
pub mod lexer;
pub mod parser;
pub mod plan;
pub mod update;
pub mod value;

use std::fmt;

/// A syntax error raised while parsing a query or update string. Carries
/// the byte offset into the source text so callers can point a caret at
/// the failure.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

/// An error raised while evaluating an otherwise well-formed query: an
/// unknown function, a malformed built-in argument that can't be coerced
/// away by the effective-boolean-value rules, or a reference to an
/// undefined prefix. Unlike [`ParseError`], the offending span is always
/// inside an already-parsed plan rather than raw source text.
#[derive(Debug, Clone)]
pub struct QueryError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query error at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for QueryError {}

impl From<QueryError> for crate::error::ChronographError {
    fn from(e: QueryError) -> Self {
        Self::Syntax {
            offset: e.offset,
            message: e.message,
        }
    }
}

pub use algebra::Query;
pub use binding::BindingTable;
pub use plan::{QueryResults, SolutionRow};
pub use update::Update;

use crate::error::Result;
use crate::store::QuadStore;

/// Parses and executes a SELECT/ASK/CONSTRUCT query against `store`.
pub fn query(store: &QuadStore, text: &str) -> Result<QueryResults> {
    let parsed = parser::parse_query(text).map_err(crate::error::ChronographError::from)?;
    plan::execute_query(store, text, &parsed).map_err(Into::into)
}

/// Parses and executes a SPARQL Update request against `store`.
pub fn update(store: &QuadStore, text: &str) -> Result<()> {
    let parsed = parser::parse_update(text).map_err(crate::error::ChronographError::from)?;
    update::execute_update(store, text, &parsed).map_err(Into::into)
}
