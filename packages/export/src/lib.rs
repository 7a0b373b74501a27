#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! JSON and CSV output for scraped records.
//!
//! JSON is the lossless format: a pretty-printed array of flat record
//! objects that [`read_json`] parses back into identical records. CSV is
//! the spreadsheet format: one row per record, metadata columns first, then
//! the preferred column order, then any remaining columns in the order they
//! were first seen. Link lists are written as JSON text in their
//! `<column>_links` cell.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use annuity_models::{METADATA_KEYS, Record, links_key};
use strum_macros::{AsRefStr, Display, EnumString};

/// Errors that can occur while writing or reading output files.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV encoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Supported output file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    /// Pretty-printed JSON array.
    Json,
    /// Comma-separated values with a header row.
    Csv,
}

impl OutputFormat {
    /// File extension for this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

/// Default output file name: `annuity_data_<unix-timestamp>.<ext>`.
#[must_use]
pub fn default_file_name(format: OutputFormat, timestamp: i64) -> String {
    format!("annuity_data_{timestamp}.{}", format.extension())
}

/// Output path inside `dir` stamped with the current time.
#[must_use]
pub fn timestamped_path(dir: &Path, format: OutputFormat) -> PathBuf {
    dir.join(default_file_name(format, chrono::Utc::now().timestamp()))
}

// ── JSON ──────────────────────────────────────────────────────────────

/// Writes `records` as a pretty-printed JSON array to `writer`.
///
/// # Errors
///
/// Returns [`ExportError`] if encoding or writing fails.
pub fn write_json_to<W: Write>(writer: W, records: &[Record]) -> Result<(), ExportError> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Writes `records` as a pretty-printed JSON array to `path`.
///
/// # Errors
///
/// Returns [`ExportError`] if the file cannot be created or written.
pub fn write_json(path: &Path, records: &[Record]) -> Result<(), ExportError> {
    ensure_parent(path)?;
    write_json_to(File::create(path)?, records)?;
    log::info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

/// Parses a JSON file produced by [`write_json`] back into records.
///
/// # Errors
///
/// Returns [`ExportError`] if the file cannot be read or is not a record
/// array.
pub fn read_json(path: &Path) -> Result<Vec<Record>, ExportError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

// ── CSV ───────────────────────────────────────────────────────────────

/// Computes the CSV header.
///
/// Metadata keys come first, then each column of `preferred` that occurs in
/// at least one record, then the remaining columns in first-seen order. A
/// column that carries links in any record is followed by its `_links`
/// column.
#[must_use]
pub fn csv_columns(records: &[Record], preferred: &[String]) -> Vec<String> {
    let mut seen: Vec<&str> = Vec::new();
    let mut linked: BTreeSet<&str> = BTreeSet::new();
    for record in records {
        for cell in record.cells() {
            if !seen.contains(&cell.column.as_str()) {
                seen.push(&cell.column);
            }
            if !cell.links.is_empty() {
                linked.insert(&cell.column);
            }
        }
    }

    let ordered = preferred
        .iter()
        .map(String::as_str)
        .filter(|c| seen.contains(c))
        .chain(
            seen.iter()
                .copied()
                .filter(|c| !preferred.iter().any(|p| p.as_str() == *c)),
        );

    let mut columns: Vec<String> = METADATA_KEYS.iter().map(ToString::to_string).collect();
    for column in ordered {
        columns.push(column.to_string());
        if linked.contains(column) {
            columns.push(links_key(column));
        }
    }
    columns
}

fn csv_row(record: &Record, columns: &[String]) -> Result<Vec<String>, ExportError> {
    let mut row = vec![
        record.page_number().to_string(),
        record.table_index().to_string(),
        record.row_index().to_string(),
    ];

    let mut iter = columns.iter().skip(METADATA_KEYS.len()).peekable();
    while let Some(column) = iter.next() {
        row.push(record.get(column).unwrap_or_default().to_string());

        let links_column = links_key(column);
        if iter.peek().is_some_and(|next| **next == links_column) {
            iter.next();
            row.push(match record.links(column) {
                Some(links) => serde_json::to_string(links)?,
                None => String::new(),
            });
        }
    }

    Ok(row)
}

/// Writes `records` as CSV to `writer`, ordering columns with
/// [`csv_columns`].
///
/// # Errors
///
/// Returns [`ExportError`] if encoding or writing fails.
pub fn write_csv_to<W: Write>(
    writer: W,
    records: &[Record],
    preferred: &[String],
) -> Result<(), ExportError> {
    let columns = csv_columns(records, preferred);
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(&columns)?;
    for record in records {
        writer.write_record(csv_row(record, &columns)?)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `records` as CSV to `path`.
///
/// # Errors
///
/// Returns [`ExportError`] if the file cannot be created or written.
pub fn write_csv(path: &Path, records: &[Record], preferred: &[String]) -> Result<(), ExportError> {
    ensure_parent(path)?;
    write_csv_to(File::create(path)?, records, preferred)?;
    log::info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
