//! External-interface collaborators: N-Quads stream framing and SPARQL
//! result serialization. Both are "external" in the sense that their
//! wire grammars are standards, not chronograph inventions, but the
//! framing/serialization code itself lives here rather than being
//! pulled in as a dependency.

pub mod nquads;
pub mod results;
