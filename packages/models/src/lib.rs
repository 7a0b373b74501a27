#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Extracted record and run result types for the annuity scraper.
//!
//! A [`Record`] is one table row from one listing page, carrying its
//! position metadata (`page_number`, `table_index`, `row_index`) plus the
//! column values in header order. Columns whose cells contained anchors
//! also carry a `<column>_links` list of [`Link`]s.
//!
//! Records serialize to flat JSON objects:
//!
//! ```json
//! {
//!   "page_number": 1,
//!   "table_index": 3,
//!   "row_index": 0,
//!   "Company_Product": "Acme - Gold",
//!   "AM_Best": "A+",
//!   "AM_Best_links": [{ "text": "A+", "href": "/p/1" }]
//! }
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::{AsRefStr, Display};

/// Metadata key for the listing page number.
pub const PAGE_NUMBER_KEY: &str = "page_number";
/// Metadata key for the table position on the page.
pub const TABLE_INDEX_KEY: &str = "table_index";
/// Metadata key for the row position within the table.
pub const ROW_INDEX_KEY: &str = "row_index";
/// Suffix appended to a column name for its companion link list.
pub const LINKS_SUFFIX: &str = "_links";

/// The metadata keys present on every record, in output order.
pub const METADATA_KEYS: &[&str] = &[PAGE_NUMBER_KEY, TABLE_INDEX_KEY, ROW_INDEX_KEY];

/// An anchor found inside a table cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Visible anchor text, whitespace-collapsed.
    pub text: String,
    /// The raw `href` attribute, if the anchor had one.
    pub href: Option<String>,
}

/// A single column value of a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Column name taken from the table header.
    pub column: String,
    /// Trimmed cell text.
    pub value: String,
    /// Anchors contained in the cell, in document order.
    pub links: Vec<Link>,
}

impl Cell {
    /// Creates a cell with no links.
    #[must_use]
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
            links: Vec::new(),
        }
    }

    /// Attaches anchors to the cell.
    #[must_use]
    pub fn with_links(mut self, links: Vec<Link>) -> Self {
        self.links = links;
        self
    }

    /// Name of the companion link field (`<column>_links`).
    #[must_use]
    pub fn links_key(&self) -> String {
        links_key(&self.column)
    }
}

/// Returns the companion link field name for `column`.
#[must_use]
pub fn links_key(column: &str) -> String {
    format!("{column}{LINKS_SUFFIX}")
}

/// Hands out column names that stay distinct when compared without regard
/// to case, the way `DuckDB` compares identifiers.
///
/// The record metadata keys are reserved from the start.
#[derive(Debug, Clone)]
pub struct ColumnNamer {
    taken: BTreeSet<String>,
}

impl ColumnNamer {
    /// Creates a namer with only the metadata keys taken.
    #[must_use]
    pub fn new() -> Self {
        Self {
            taken: METADATA_KEYS.iter().map(|k| k.to_ascii_lowercase()).collect(),
        }
    }

    /// Whether `name` is taken, ignoring case.
    #[must_use]
    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(&name.to_ascii_lowercase())
    }

    /// Takes `candidate`, or the first free `candidate_2`, `candidate_3`,
    /// ... when it is already taken.
    pub fn claim(&mut self, candidate: &str) -> String {
        let name = self.first_free(candidate, |namer, name| !namer.is_taken(name));
        self.taken.insert(name.to_ascii_lowercase());
        name
    }

    /// Like [`Self::claim`], but also requires and reserves the name's
    /// `<name>_links` companion.
    pub fn claim_with_links(&mut self, candidate: &str) -> String {
        let name = self.first_free(candidate, |namer, name| {
            !namer.is_taken(name) && !namer.is_taken(&links_key(name))
        });
        self.taken.insert(name.to_ascii_lowercase());
        self.taken.insert(links_key(&name).to_ascii_lowercase());
        name
    }

    fn first_free(&self, candidate: &str, is_free: impl Fn(&Self, &str) -> bool) -> String {
        if is_free(self, candidate) {
            return candidate.to_string();
        }
        let mut n = 2u32;
        loop {
            let name = format!("{candidate}_{n}");
            if is_free(self, &name) {
                return name;
            }
            n += 1;
        }
    }
}

impl Default for ColumnNamer {
    fn default() -> Self {
        Self::new()
    }
}

/// One extracted table row.
///
/// Records are built once during extraction and never mutated; cleanup
/// steps produce new records through [`Record::with_cells`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    page_number: u32,
    table_index: u32,
    row_index: u32,
    cells: Vec<Cell>,
}

impl Record {
    /// Creates a record at the given page/table/row position.
    #[must_use]
    pub const fn new(page_number: u32, table_index: u32, row_index: u32, cells: Vec<Cell>) -> Self {
        Self {
            page_number,
            table_index,
            row_index,
            cells,
        }
    }

    /// Returns a new record at the same position with different cells.
    #[must_use]
    pub const fn with_cells(&self, cells: Vec<Cell>) -> Self {
        Self::new(self.page_number, self.table_index, self.row_index, cells)
    }

    /// The one-based listing page number this row came from.
    #[must_use]
    pub const fn page_number(&self) -> u32 {
        self.page_number
    }

    /// Zero-based position of the source table among the page's tables.
    #[must_use]
    pub const fn table_index(&self) -> u32 {
        self.table_index
    }

    /// Zero-based position of the row within its table's data rows.
    #[must_use]
    pub const fn row_index(&self) -> u32 {
        self.row_index
    }

    /// The column values in header order.
    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Looks up a column value by name.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cell(column).map(|c| c.value.as_str())
    }

    /// Looks up the anchors of a column. Returns `None` when the column is
    /// absent or its cell held no anchors.
    #[must_use]
    pub fn links(&self, column: &str) -> Option<&[Link]> {
        self.cell(column)
            .filter(|c| !c.links.is_empty())
            .map(|c| c.links.as_slice())
    }

    /// Looks up a whole cell by column name.
    #[must_use]
    pub fn cell(&self, column: &str) -> Option<&Cell> {
        self.cells.iter().find(|c| c.column == column)
    }

    /// Column names present on this record, in header order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|c| c.column.as_str())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let link_count = self.cells.iter().filter(|c| !c.links.is_empty()).count();
        let mut map =
            serializer.serialize_map(Some(METADATA_KEYS.len() + self.cells.len() + link_count))?;

        map.serialize_entry(PAGE_NUMBER_KEY, &self.page_number)?;
        map.serialize_entry(TABLE_INDEX_KEY, &self.table_index)?;
        map.serialize_entry(ROW_INDEX_KEY, &self.row_index)?;

        for cell in &self.cells {
            map.serialize_entry(&cell.column, &cell.value)?;
            if !cell.links.is_empty() {
                map.serialize_entry(&cell.links_key(), &cell.links)?;
            }
        }

        map.end()
    }
}

/// A non-metadata value in a serialized record.
#[derive(Deserialize)]
#[serde(untagged)]
enum FieldValue {
    Text(String),
    Links(Vec<Link>),
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = Record;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a flat record object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Record, A::Error> {
        use serde::de::Error as _;

        let mut page_number = None;
        let mut table_index = None;
        let mut row_index = None;
        let mut cells: Vec<Cell> = Vec::new();
        let mut pending_links: Vec<(String, Vec<Link>)> = Vec::new();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                PAGE_NUMBER_KEY => page_number = Some(map.next_value::<u32>()?),
                TABLE_INDEX_KEY => table_index = Some(map.next_value::<u32>()?),
                ROW_INDEX_KEY => row_index = Some(map.next_value::<u32>()?),
                _ => match map.next_value::<FieldValue>()? {
                    FieldValue::Text(value) => cells.push(Cell::new(key, value)),
                    FieldValue::Links(links) => pending_links.push((key, links)),
                },
            }
        }

        // Link lists normally follow their column, but object key order is
        // not guaranteed by every producer.
        for (key, links) in pending_links {
            let column = key.strip_suffix(LINKS_SUFFIX).unwrap_or(&key);
            let cell = cells
                .iter_mut()
                .find(|c| c.column == column)
                .ok_or_else(|| A::Error::custom(format!("'{key}' has no matching column")))?;
            cell.links = links;
        }

        Ok(Record {
            page_number: page_number.ok_or_else(|| A::Error::missing_field(PAGE_NUMBER_KEY))?,
            table_index: table_index.ok_or_else(|| A::Error::missing_field(TABLE_INDEX_KEY))?,
            row_index: row_index.ok_or_else(|| A::Error::missing_field(ROW_INDEX_KEY))?,
            cells,
        })
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}

/// What happened to a single listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PageStatus {
    /// A data table was found and its rows extracted.
    Extracted,
    /// The page rendered but no table qualified as product data.
    NoDataTable,
    /// The page kept failing to render and was skipped.
    Skipped,
    /// The page repeated the previous page's content (end of data).
    Repeated,
}

/// Storage type of a column when records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnType {
    /// Whole numbers, thousands separators ignored.
    Integer,
    /// Any number with a fractional part.
    Decimal,
    /// Everything else.
    Text,
}

/// Per-page outcome, in the order pages were attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReport {
    /// The listing page number.
    pub page_number: u32,
    /// How the page ended.
    pub status: PageStatus,
    /// Number of records kept from the page.
    pub record_count: usize,
    /// Number of load attempts spent on the page.
    pub attempts: u32,
}

/// Why a page is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RetryKind {
    /// The session expired; re-authenticate, then reload the page once.
    Reauthenticate,
    /// The page did not become ready in time.
    Navigation {
        /// One-based retry number for this page.
        attempt: u32,
    },
}

/// Pagination run state.
///
/// `NotStarted -> Authenticating -> ScrapingPage(n) -> [RetryPage(n) |
/// ScrapingPage(n + 1)] -> ... -> Completed | Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Nothing has happened yet.
    NotStarted,
    /// Logging in before the first page.
    Authenticating,
    /// Loading and extracting the given page.
    ScrapingPage(u32),
    /// Retrying the given page.
    RetryPage {
        /// The page being retried.
        page: u32,
        /// Why it is being retried.
        retry: RetryKind,
    },
    /// Every page in range was attempted.
    Completed,
    /// Authentication failed fatally; partial results are kept.
    Aborted,
}

/// The accumulated result of one scraping invocation.
///
/// Always returned, even when the run aborts; `records` then holds
/// whatever pages finished before the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// All records in page order.
    pub records: Vec<Record>,
    /// One report per attempted page.
    pub pages: Vec<PageReport>,
    /// Terminal state of the run.
    pub state: RunState,
    /// Human-readable cause when `state` is [`RunState::Aborted`].
    pub abort_reason: Option<String>,
}

impl RunResult {
    /// Creates an empty, not-yet-started result.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
            pages: Vec::new(),
            state: RunState::NotStarted,
            abort_reason: None,
        }
    }

    /// Whether the run ended in [`RunState::Aborted`].
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self.state, RunState::Aborted)
    }

    /// Whether the run ended in [`RunState::Completed`].
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.state, RunState::Completed)
    }

    /// Records extracted from a single page.
    pub fn page_records(&self, page_number: u32) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(move |r| r.page_number() == page_number)
    }

    /// Number of distinct pages that contributed at least one record.
    #[must_use]
    pub fn pages_with_records(&self) -> usize {
        self.pages.iter().filter(|p| p.record_count > 0).count()
    }
}

impl Default for RunResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_namer_ignores_case_and_reserves_metadata() {
        let mut namer = ColumnNamer::new();
        assert_eq!(namer.claim("Rate"), "Rate");
        assert_eq!(namer.claim("RATE"), "RATE_2");
        assert_eq!(namer.claim("rate_2"), "rate_2_2");
        assert_eq!(namer.claim("Page_Number"), "Page_Number_2");
        assert!(namer.is_taken("ROW_INDEX"));
    }

    #[test]
    fn column_namer_keeps_link_companions_free() {
        let mut namer = ColumnNamer::new();
        assert_eq!(namer.claim_with_links("AM_Best"), "AM_Best");
        assert_eq!(namer.claim_with_links("AM_Best_links"), "AM_Best_links_2");

        let mut namer = ColumnNamer::new();
        assert_eq!(namer.claim_with_links("X_links"), "X_links");
        assert_eq!(namer.claim_with_links("x"), "x_2");
    }

    fn sample() -> Record {
        Record::new(
            10,
            2,
            4,
            vec![
                Cell::new("Company_Product", "Acme - Gold"),
                Cell::new("AM_Best", "A+").with_links(vec![Link {
                    text: "A+".to_string(),
                    href: Some("/p/1".to_string()),
                }]),
                Cell::new("Current_Rate", "5.10%"),
            ],
        )
    }

    #[test]
    fn serializes_flat_object_with_links_companion() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "page_number": 10,
                "table_index": 2,
                "row_index": 4,
                "Company_Product": "Acme - Gold",
                "AM_Best": "A+",
                "AM_Best_links": [{"text": "A+", "href": "/p/1"}],
                "Current_Rate": "5.10%",
            })
        );
    }

    #[test]
    fn reparses_serialized_record_exactly() {
        let record = sample();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(
            parsed.columns().collect::<Vec<_>>(),
            vec!["Company_Product", "AM_Best", "Current_Rate"]
        );
    }

    #[test]
    fn numeric_looking_values_stay_strings() {
        let record = Record::new(1, 0, 0, vec![Cell::new("Min_Premium", "10,000")]);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get("Min_Premium"), Some("10,000"));
    }

    #[test]
    fn links_before_column_still_attach() {
        let parsed: Record = serde_json::from_str(
            r#"{"AM_Best_links":[{"text":"A","href":null}],"page_number":1,"table_index":0,"row_index":0,"AM_Best":"A"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.links("AM_Best").unwrap(),
            &[Link {
                text: "A".to_string(),
                href: None
            }]
        );
    }

    #[test]
    fn rejects_record_without_metadata() {
        let result: Result<Record, _> = serde_json::from_str(r#"{"AM_Best":"A"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn absent_columns_are_not_defaulted() {
        let record = Record::new(1, 0, 0, vec![Cell::new("A", "x")]);
        assert_eq!(record.get("B"), None);
        assert!(record.links("A").is_none());
    }

    #[test]
    fn column_type_names_are_snake_case() {
        assert_eq!(ColumnType::Decimal.to_string(), "decimal");
        let parsed: ColumnType = serde_json::from_str("\"integer\"").unwrap();
        assert_eq!(parsed, ColumnType::Integer);
    }

    #[test]
    fn run_result_filters_by_page() {
        let mut result = RunResult::new();
        result.records.push(sample());
        result.records.push(Record::new(11, 0, 0, vec![]));
        assert_eq!(result.page_records(10).count(), 1);
        assert_eq!(result.page_records(12).count(), 0);
        assert!(!result.is_aborted());
    }
}
