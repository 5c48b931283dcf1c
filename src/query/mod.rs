//! Query layer
//!
//! Typed, parameterized queries over the corpus graph:
//! - `ast`: the query catalogue, with OpenCypher rendering
//! - `executor`: in-process execution against `GraphStore`
//! - `record`: result rows and parameters

pub mod ast;
pub mod error;
pub mod executor;
pub mod record;

// Re-export main types
pub use ast::Query;
pub use error::{QueryError, QueryResult};
pub use executor::QueryEngine;
pub use record::{Params, Record};
