//! Post-extraction record cleanup.
//!
//! Listing tables interleave product rows with section header rows and use
//! positional column names. Cleanup drops the section rows, renames and
//! prunes columns, and removes rows repeated across pages. Records are
//! never modified in place; cleanup builds new ones with the same position
//! metadata.

use std::collections::BTreeSet;

use annuity_models::{Cell, Record};

use crate::site::CleanupConfig;

/// Whether `value` counts as "not filled".
fn is_placeholder(value: &str, config: &CleanupConfig) -> bool {
    let value = value.trim();
    value.is_empty() || config.placeholders.iter().any(|p| p.trim() == value)
}

/// Whether the record is a section header rather than a product row.
///
/// A row is a section header when fewer than `min_filled` of the key
/// columns hold a real value. Always `false` when no key columns are
/// configured.
#[must_use]
pub fn is_grouping_row(record: &Record, config: &CleanupConfig) -> bool {
    if config.key_columns.is_empty() {
        return false;
    }
    let filled = config
        .key_columns
        .iter()
        .filter(|col| {
            record
                .get(col)
                .is_some_and(|value| !is_placeholder(value, config))
        })
        .count();
    filled < config.min_filled
}

/// Column values (not metadata, not links) as a comparable key.
#[must_use]
pub fn content_signature(record: &Record) -> String {
    record
        .cells()
        .iter()
        .map(|c| format!("{}\u{1f}{}", c.column, c.value))
        .collect::<Vec<_>>()
        .join("\u{1e}")
}

/// Applies renames and drops to one record.
fn reshape(record: &Record, config: &CleanupConfig) -> Record {
    let cells: Vec<Cell> = record
        .cells()
        .iter()
        .filter(|c| !config.drop_columns.contains(&c.column))
        .map(|c| {
            let mut cell = c.clone();
            if let Some(rename) = config.renames.iter().find(|r| r.from == c.column) {
                cell.column.clone_from(&rename.to);
            }
            cell
        })
        .collect();
    record.with_cells(cells)
}

/// Runs every configured cleanup step over `records`, keeping order.
#[must_use]
pub fn clean_records(records: &[Record], config: &CleanupConfig) -> Vec<Record> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut grouping = 0_usize;
    let mut duplicates = 0_usize;

    let cleaned: Vec<Record> = records
        .iter()
        .filter(|r| {
            let skip = is_grouping_row(r, config);
            grouping += usize::from(skip);
            !skip
        })
        .map(|r| reshape(r, config))
        .filter(|r| {
            if !config.dedupe {
                return true;
            }
            let fresh = seen.insert(content_signature(r));
            duplicates += usize::from(!fresh);
            fresh
        })
        .collect();

    if grouping > 0 || duplicates > 0 {
        log::info!(
            "Cleanup kept {} of {} record(s) ({grouping} section row(s), {duplicates} duplicate(s))",
            cleaned.len(),
            records.len()
        );
    }

    cleaned
}
