//! Row Extractor: turns the located table into [`Record`]s.

use annuity_models::{Cell, ColumnNamer, Record};

use crate::html_table::{HtmlTable, TableRow};

/// Fallback name for the column at zero-based `index`.
#[must_use]
pub fn generated_column_name(index: usize) -> String {
    format!("Column_{}", index + 1)
}

/// Extracts every data row of `table` as a record on page `page_number`.
///
/// The first row always supplies the column labels, whether it is marked
/// up with `<th>`/`<thead>` or uses plain `<td>` cells; blank labels are
/// named `Column_<n>`. Names are made unique ignoring case, never reuse a
/// metadata key, and keep their `<name>_links` companion free.
///
/// Each record holds one field per cell actually present: a row shorter
/// than the header leaves the trailing columns absent, and a longer row
/// names its extra cells `Column_<n>`. `row_index` is the position among
/// the table's data rows; rows without any cells are skipped but still
/// counted. A header-only table yields no records.
#[must_use]
pub fn extract_records(table: &HtmlTable, page_number: u32) -> Vec<Record> {
    let Some((header, data_rows)) = table.rows.split_first() else {
        return Vec::new();
    };

    let mut namer = ColumnNamer::new();
    let mut columns = header_names(header, &mut namer);

    let mut records = Vec::with_capacity(data_rows.len());
    for (row_index, row) in data_rows.iter().enumerate() {
        if row.cells.is_empty() {
            continue;
        }
        while columns.len() < row.cells.len() {
            let name = namer.claim_with_links(&generated_column_name(columns.len()));
            columns.push(name);
        }

        let cells = row
            .cells
            .iter()
            .zip(&columns)
            .map(|(cell, column)| {
                Cell::new(column.clone(), cell.text.clone()).with_links(cell.links.clone())
            })
            .collect();

        records.push(Record::new(
            page_number,
            table.index,
            u32::try_from(row_index).unwrap_or(u32::MAX),
            cells,
        ));
    }

    log::debug!(
        "Page {page_number}: extracted {} row(s) from table {} ({} column(s))",
        records.len(),
        table.index,
        columns.len()
    );

    records
}

fn header_names(row: &TableRow, namer: &mut ColumnNamer) -> Vec<String> {
    row.cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            if cell.text.is_empty() {
                namer.claim_with_links(&generated_column_name(i))
            } else {
                namer.claim_with_links(&cell.text)
            }
        })
        .collect()
}
