//! CI pipeline job graphs: needs unwrapping, transitive reduction and
//! layering for the layered pipeline view, plus stage and build seeding.

pub mod config;
pub mod error;
pub mod graph;
pub mod seed;

pub use error::{CiDagError, Result};
