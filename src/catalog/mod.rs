//! Catalog module for schema metadata.
//!
//! The catalog describes table groups, the tables they contain, row count
//! statistics, and the indexes available on each table. Planners read an
//! immutable [`CatalogSnapshot`] so that one query sees consistent metadata.

mod manager;
mod schema;
mod types;

pub use manager::{Catalog, CatalogSnapshot};
pub use schema::{CatalogError, GroupDef, TableBuilder, TableDef};
pub use types::{IndexColumn, IndexDef};
