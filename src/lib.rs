//! Disk-resident RDF triple store answering basic graph pattern SPARQL queries.
//!
//! A build pass dictionary-encodes a file of whitespace-separated `s p o .`
//! lines and writes six memory-mapped index arrays: per-predicate sorted
//! subject- and object-sets, and per-entity predicate maps pointing at sorted
//! adjacency lists. At query time a `SELECT … WHERE { … } [LIMIT n]` subset of
//! SPARQL is parsed, lowered into a variable-ordered join plan and executed by
//! a backtracking leapfrog triejoin over the sorted id sequences.
//!
//! ```no_run
//! use std::path::Path;
//! use tripod::Store;
//!
//! # fn main() -> Result<(), tripod::Error> {
//! let data_dir = Path::new("DB_DATA_ARCHIVE");
//! Store::create(data_dir, "example", Path::new("example.nt"), 4)?;
//! let store = Store::open(data_dir, "example")?;
//! let out = store.query("SELECT ?who WHERE { ?who <knows> <alice> . } LIMIT 10")?;
//! for row in &out.rows {
//!     println!("{}", row.join(" "));
//! }
//! # Ok(())
//! # }
//! ```

// storage primitives: mapped word files, id sequences, sorted-run chains
pub mod containers;
// term <-> id mapping partitioned by role
pub mod dictionary;
// the six on-disk index arrays: builder and retriever
pub mod index;
// planning, leapfrog intersection, execution, materialisation
pub mod query;
// lexer and parser for the SPARQL subset
pub mod sparql;
mod store;

pub use query::QueryOutput;
pub use store::{Error, Store};
