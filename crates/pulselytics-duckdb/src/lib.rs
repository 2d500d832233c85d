//! DuckDB-backed event storage.
//!
//! One embedded database file holds the `sites` registry and the `events`
//! fact table. [`DuckDbBackend`] implements the `EventStore` trait from
//! `pulselytics-core`; everything SQL-shaped lives in this crate.

pub mod backend;
pub mod schema;
pub mod site;

pub use backend::DuckDbBackend;
pub use site::{CreateSiteParams, Site};

// Re-exported so downstream crates stay on the bundled build without
// pinning duckdb themselves.
pub use duckdb;
