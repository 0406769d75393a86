//! Chronograph: an embedded, temporal RDF quad store with a SPARQL 1.1
//! query/update engine.
//!
//! A store keeps every quad's full history: an `add` opens a validity
//! interval `[validFrom, validTo)`, a `delete` closes it, and nothing is
//! ever overwritten in place. [`store::QuadStore`] is the facade most
//! callers reach for — it owns the WAL, the in-memory indexes, and the
//! reader-writer lock, and recovers automatically at `open`. [`sparql`]
//! layers a SPARQL 1.1 parser, expression evaluator, and query/update
//! executor on top of it; [`io`] handles N-Quads framing and SPARQL
//! result serialization at the process boundary.
//!
//! ```no_run
//! use chronograph::store::QuadStore;
//!
//! let store = QuadStore::open("/tmp/example-store")?;
//! chronograph::sparql::update(&store, "INSERT DATA { <http://example.com/s> <http://example.com/p> \"o\" }")?;
//! let results = chronograph::sparql::query(&store, "SELECT ?o WHERE { <http://example.com/s> <http://example.com/p> ?o }")?;
//! # Ok::<(), chronograph::error::ChronographError>(())
//! ```

pub mod atom;
pub mod error;
pub mod io;
pub mod model;
pub mod pool;
pub mod sparql;
pub mod storage;
pub mod store;

pub use error::{ChronographError, Result};
pub use model::{Literal, Quad, Term};
pub use store::QuadStore;
