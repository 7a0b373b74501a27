//! Owned snapshot of the tables on a rendered page.
//!
//! [`scraper::Html`] is not `Send`, so documents are parsed inside plain
//! functions and converted into [`HtmlTable`]s before anything is awaited.
//! The snapshot keeps exactly what the locator and extractor need: rows,
//! cell text, `<th>` markup, and anchors.

use annuity_models::Link;
use scraper::{ElementRef, Html, Selector};

/// A single `<td>` or `<th>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCell {
    /// Whitespace-collapsed text content.
    pub text: String,
    /// Whether the cell is a `<th>`.
    pub is_header: bool,
    /// Anchors inside the cell, in document order.
    pub links: Vec<Link>,
}

/// A `<tr>` belonging directly to a table (not to a nested table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    /// Cells in column order.
    pub cells: Vec<TableCell>,
}

/// One `<table>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlTable {
    /// Zero-based position among every table on the page, in DOM order.
    pub index: u32,
    /// The table's own rows.
    pub rows: Vec<TableRow>,
}

impl HtmlTable {
    /// Number of rows, header rows included.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Total number of cells across all rows.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.rows.iter().map(|r| r.cells.len()).sum()
    }
}

/// Parses every table on the page, nested ones included, in DOM order.
#[must_use]
pub fn parse_tables(html: &str) -> Vec<HtmlTable> {
    let document = Html::parse_document(html);
    let table_sel = Selector::parse("table").unwrap_or_else(|_| unreachable!());
    let tr_sel = Selector::parse("tr").unwrap_or_else(|_| unreachable!());
    let a_sel = Selector::parse("a").unwrap_or_else(|_| unreachable!());

    document
        .select(&table_sel)
        .enumerate()
        .map(|(i, table)| HtmlTable {
            index: u32::try_from(i).unwrap_or(u32::MAX),
            rows: table
                .select(&tr_sel)
                .filter(|row| owning_table(*row).is_some_and(|t| t.id() == table.id()))
                .map(|row| parse_row(row, &a_sel))
                .collect(),
        })
        .collect()
}

/// Collapses runs of whitespace to single spaces and trims the ends.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-collapsed text of an element.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn parse_row(row: ElementRef<'_>, a_sel: &Selector) -> TableRow {
    let cells = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .map(|cell| TableCell {
            text: element_text(cell),
            is_header: cell.value().name() == "th",
            links: cell
                .select(a_sel)
                .map(|a| Link {
                    text: element_text(a),
                    href: a.value().attr("href").map(str::to_string),
                })
                .collect(),
        })
        .collect();

    TableRow { cells }
}

fn owning_table(row: ElementRef<'_>) -> Option<ElementRef<'_>> {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
}
