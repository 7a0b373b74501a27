#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` persistence for scraped annuity records.
//!
//! Records are written to a single table whose columns are derived from the
//! records themselves: position metadata first, then every data column with
//! an inferred SQL type, then the `_links` columns as JSON text.

pub mod records_db;

use std::path::Path;

use duckdb::Connection;

pub use records_db::{SaveOptions, infer_column_types, save_records};

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Link list encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opens (or creates) the `DuckDB` file at `path`, creating parent
/// directories as needed.
///
/// # Errors
///
/// Returns [`DbError`] if the directory or connection cannot be created.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }

    log::debug!("Opening DuckDB at {}", path.display());
    Ok(Connection::open(path)?)
}
