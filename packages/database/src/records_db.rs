//! Record table creation and bulk insertion.

use std::collections::{BTreeMap, BTreeSet};

use annuity_models::{
    ColumnNamer, ColumnType, PAGE_NUMBER_KEY, ROW_INDEX_KEY, Record, TABLE_INDEX_KEY, links_key,
};
use duckdb::Connection;

use crate::DbError;

/// Number of rows per INSERT chunk.
const CHUNK_SIZE: usize = 500;

/// Table and typing settings for [`save_records`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Target table name.
    pub table: String,
    /// Values treated as missing, both for inference and on insert.
    pub placeholders: Vec<String>,
    /// Column types that win over inference.
    pub column_types: BTreeMap<String, ColumnType>,
    /// Drop and recreate the table instead of appending.
    pub recreate: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            table: "annuities".to_string(),
            placeholders: ["", "-", "N/A", "NR"].map(String::from).to_vec(),
            column_types: BTreeMap::new(),
            recreate: true,
        }
    }
}

const fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "BIGINT",
        ColumnType::Decimal => "DOUBLE",
        ColumnType::Text => "TEXT",
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn is_placeholder(value: &str, placeholders: &[String]) -> bool {
    placeholders.iter().any(|p| p == value)
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_decimal(s: &str) -> bool {
    s.split_once('.').is_some_and(|(whole, frac)| {
        is_integer(whole) && !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit())
    })
}

/// Infers a type for every data column, in first-seen order.
///
/// A column is [`ColumnType::Integer`] when every present value (ignoring
/// placeholders, with commas stripped) is a whole number,
/// [`ColumnType::Decimal`] when all are numeric and at least one has a
/// fractional part, and [`ColumnType::Text`] otherwise or when it has no
/// values at all. `overrides` replace the inferred type.
#[must_use]
pub fn infer_column_types(
    records: &[Record],
    placeholders: &[String],
    overrides: &BTreeMap<String, ColumnType>,
) -> Vec<(String, ColumnType)> {
    let mut order: Vec<&str> = Vec::new();
    let mut inferred: BTreeMap<&str, Option<ColumnType>> = BTreeMap::new();

    for record in records {
        for cell in record.cells() {
            let column = cell.column.as_str();
            if !inferred.contains_key(column) {
                order.push(column);
                inferred.insert(column, None);
            }

            let value = cell.value.trim();
            if is_placeholder(value, placeholders) {
                continue;
            }
            let Some(slot) = inferred.get_mut(column) else {
                continue;
            };
            if *slot == Some(ColumnType::Text) {
                continue;
            }

            let number = value.replace(',', "");
            let candidate = if is_integer(&number) {
                ColumnType::Integer
            } else if is_decimal(&number) {
                ColumnType::Decimal
            } else {
                ColumnType::Text
            };

            *slot = Some(match (*slot, candidate) {
                (_, ColumnType::Text) => ColumnType::Text,
                (Some(ColumnType::Decimal), _) | (_, ColumnType::Decimal) => ColumnType::Decimal,
                _ => ColumnType::Integer,
            });
        }
    }

    order
        .into_iter()
        .map(|column| {
            let column_type = overrides
                .get(column)
                .copied()
                .or_else(|| inferred.get(column).copied().flatten())
                .unwrap_or(ColumnType::Text);
            (column.to_string(), column_type)
        })
        .collect()
}

/// A value converted for binding.
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Integer(Option<i64>),
    Double(Option<f64>),
    Text(Option<String>),
}

fn convert(value: Option<&str>, column_type: ColumnType, placeholders: &[String]) -> SqlValue {
    let present = value
        .map(str::trim)
        .filter(|v| !is_placeholder(v, placeholders));
    match column_type {
        ColumnType::Integer => {
            SqlValue::Integer(present.and_then(|v| v.replace(',', "").parse().ok()))
        }
        ColumnType::Decimal => SqlValue::Double(
            present
                .and_then(|v| v.replace(',', "").parse::<f64>().ok())
                .filter(|v| v.is_finite()),
        ),
        ColumnType::Text => SqlValue::Text(present.map(ToString::to_string)),
    }
}

/// Writes `records` to the configured table and returns the number of rows
/// inserted.
///
/// With [`SaveOptions::recreate`] the table is dropped first, so its schema
/// always matches the records being written.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn save_records(
    conn: &Connection,
    records: &[Record],
    options: &SaveOptions,
) -> Result<u64, DbError> {
    let columns = infer_column_types(records, &options.placeholders, &options.column_types);
    let linked: BTreeSet<&str> = records
        .iter()
        .flat_map(Record::cells)
        .filter(|c| !c.links.is_empty())
        .map(|c| c.column.as_str())
        .collect();
    let link_columns: Vec<&str> = columns
        .iter()
        .map(|(c, _)| c.as_str())
        .filter(|c| linked.contains(c))
        .collect();

    // DuckDB identifiers clash regardless of case, and records from
    // different pages may spell a header differently.
    let mut namer = ColumnNamer::new();
    let data_names: Vec<String> = columns.iter().map(|(c, _)| namer.claim(c)).collect();
    let link_names: Vec<String> = link_columns
        .iter()
        .map(|c| namer.claim(&links_key(c)))
        .collect();

    let table = quote_ident(&options.table);
    let mut defs = vec![
        format!("{} INTEGER NOT NULL", quote_ident(PAGE_NUMBER_KEY)),
        format!("{} INTEGER NOT NULL", quote_ident(TABLE_INDEX_KEY)),
        format!("{} INTEGER NOT NULL", quote_ident(ROW_INDEX_KEY)),
    ];
    defs.extend(
        data_names
            .iter()
            .zip(&columns)
            .map(|(name, (_, t))| format!("{} {}", quote_ident(name), sql_type(*t))),
    );
    defs.extend(link_names.iter().map(|name| format!("{} TEXT", quote_ident(name))));

    if options.recreate {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
    }
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} ({});",
        defs.join(", ")
    ))?;
    log::info!(
        "Table {} has {} data columns ({} with links)",
        options.table,
        columns.len(),
        link_columns.len()
    );

    if records.is_empty() {
        return Ok(0);
    }

    let names: Vec<String> = [PAGE_NUMBER_KEY, TABLE_INDEX_KEY, ROW_INDEX_KEY]
        .into_iter()
        .chain(data_names.iter().map(String::as_str))
        .chain(link_names.iter().map(String::as_str))
        .map(quote_ident)
        .collect();
    let row_placeholder = format!("({})", vec!["?"; names.len()].join(", "));

    let mut total_inserted = 0u64;

    for chunk in records.chunks(CHUNK_SIZE) {
        let mut sql = format!("INSERT INTO {table} ({}) VALUES ", names.join(", "));
        for i in 0..chunk.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&row_placeholder);
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut param_idx = 1usize;

        for record in chunk {
            stmt.raw_bind_parameter(param_idx, i64::from(record.page_number()))?;
            stmt.raw_bind_parameter(param_idx + 1, i64::from(record.table_index()))?;
            stmt.raw_bind_parameter(param_idx + 2, i64::from(record.row_index()))?;
            param_idx += 3;

            for (column, column_type) in &columns {
                match convert(record.get(column), *column_type, &options.placeholders) {
                    SqlValue::Integer(v) => stmt.raw_bind_parameter(param_idx, v)?,
                    SqlValue::Double(v) => stmt.raw_bind_parameter(param_idx, v)?,
                    SqlValue::Text(v) => stmt.raw_bind_parameter(param_idx, v)?,
                }
                param_idx += 1;
            }

            for column in &link_columns {
                let links = record
                    .links(column)
                    .map(serde_json::to_string)
                    .transpose()?;
                stmt.raw_bind_parameter(param_idx, links)?;
                param_idx += 1;
            }
        }

        let rows = stmt.raw_execute()?;
        total_inserted += u64::try_from(rows).unwrap_or(0);
    }

    log::info!("Inserted {total_inserted} rows into {}", options.table);
    Ok(total_inserted)
}

#[cfg(test)]
mod tests {
    use annuity_models::{Cell, Link};

    use super::*;

    fn records() -> Vec<Record> {
        vec![
            Record::new(
                1,
                2,
                0,
                vec![
                    Cell::new("Company", "Acme Life").with_links(vec![Link {
                        text: "Acme Life".to_string(),
                        href: Some("/co/1".to_string()),
                    }]),
                    Cell::new("Min_Premium", "10,000"),
                    Cell::new("Rate", "5.10"),
                    Cell::new("Term", "N/A"),
                    Cell::new("Year", "2024"),
                ],
            ),
            Record::new(
                1,
                2,
                1,
                vec![
                    Cell::new("Company", "Beta Mutual"),
                    Cell::new("Min_Premium", "5,000"),
                    Cell::new("Rate", "4"),
                    Cell::new("Term", "7"),
                    Cell::new("Year", "2023"),
                ],
            ),
        ]
    }

    fn placeholders() -> Vec<String> {
        SaveOptions::default().placeholders
    }

    #[test]
    fn infers_integer_decimal_and_text() {
        let types = infer_column_types(&records(), &placeholders(), &BTreeMap::new());
        assert_eq!(
            types,
            vec![
                ("Company".to_string(), ColumnType::Text),
                ("Min_Premium".to_string(), ColumnType::Integer),
                ("Rate".to_string(), ColumnType::Decimal),
                ("Term".to_string(), ColumnType::Integer),
                ("Year".to_string(), ColumnType::Integer),
            ]
        );
    }

    #[test]
    fn overrides_win_and_empty_columns_are_text() {
        let mut overrides = BTreeMap::new();
        overrides.insert("Year".to_string(), ColumnType::Text);
        let mut rows = records();
        rows.push(Record::new(2, 0, 0, vec![Cell::new("Notes", "-")]));

        let types: BTreeMap<String, ColumnType> =
            infer_column_types(&rows, &placeholders(), &overrides)
                .into_iter()
                .collect();
        assert_eq!(types["Year"], ColumnType::Text);
        assert_eq!(types["Notes"], ColumnType::Text);
    }

    #[test]
    fn percent_values_stay_text() {
        let rows = vec![Record::new(1, 0, 0, vec![Cell::new("Rate", "5.10%")])];
        let types = infer_column_types(&rows, &placeholders(), &BTreeMap::new());
        assert_eq!(types[0].1, ColumnType::Text);
    }

    #[test]
    fn converts_placeholders_and_garbage_to_null() {
        let p = placeholders();
        assert_eq!(
            convert(Some("1,234"), ColumnType::Integer, &p),
            SqlValue::Integer(Some(1234))
        );
        assert_eq!(
            convert(Some("N/A"), ColumnType::Integer, &p),
            SqlValue::Integer(None)
        );
        assert_eq!(
            convert(Some("abc"), ColumnType::Decimal, &p),
            SqlValue::Double(None)
        );
        assert_eq!(
            convert(None, ColumnType::Text, &p),
            SqlValue::Text(None)
        );
    }

    #[test]
    fn saves_typed_rows_with_link_json() {
        let conn = Connection::open_in_memory().unwrap();
        let inserted = save_records(&conn, &records(), &SaveOptions::default()).unwrap();
        assert_eq!(inserted, 2);

        let mut stmt = conn
            .prepare(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_name = 'annuities' ORDER BY ordinal_position",
            )
            .unwrap();
        let schema: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let names: Vec<&str> = schema.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "page_number",
                "table_index",
                "row_index",
                "Company",
                "Min_Premium",
                "Rate",
                "Term",
                "Year",
                "Company_links",
            ]
        );
        assert_eq!(schema[4].1, "BIGINT");
        assert_eq!(schema[5].1, "DOUBLE");

        let (premium, term, links): (Option<i64>, Option<i64>, Option<String>) = conn
            .query_row(
                "SELECT \"Min_Premium\", \"Term\", \"Company_links\" FROM annuities WHERE row_index = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(premium, Some(10_000));
        assert_eq!(term, None);
        assert_eq!(
            links.as_deref(),
            Some(r#"[{"text":"Acme Life","href":"/co/1"}]"#)
        );
    }

    #[test]
    fn recreate_replaces_previous_contents() {
        let conn = Connection::open_in_memory().unwrap();
        let options = SaveOptions::default();
        save_records(&conn, &records(), &options).unwrap();
        save_records(&conn, &records()[..1], &options).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM annuities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn appends_when_not_recreating() {
        let conn = Connection::open_in_memory().unwrap();
        let options = SaveOptions {
            recreate: false,
            ..SaveOptions::default()
        };
        save_records(&conn, &records(), &options).unwrap();
        save_records(&conn, &records(), &options).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM annuities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn empty_input_creates_metadata_only_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(save_records(&conn, &[], &SaveOptions::default()).unwrap(), 0);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM annuities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn headers_differing_only_in_case_get_separate_columns() {
        let rows = vec![
            Record::new(1, 0, 0, vec![Cell::new("Rate", "5.10")]),
            Record::new(
                2,
                0,
                0,
                vec![
                    Cell::new("RATE", "4.90"),
                    Cell::new("Page_Number", "x"),
                    Cell::new("Rate_links", "see notes"),
                    Cell::new("Rate", "4.80").with_links(vec![Link {
                        text: "4.80".to_string(),
                        href: None,
                    }]),
                ],
            ),
        ];
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(save_records(&conn, &rows, &SaveOptions::default()).unwrap(), 2);

        let mut stmt = conn
            .prepare(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_name = 'annuities' ORDER BY ordinal_position",
            )
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            names,
            vec![
                "page_number",
                "table_index",
                "row_index",
                "Rate",
                "RATE_2",
                "Page_Number_2",
                "Rate_links",
                "Rate_links_2",
            ]
        );

        let (rate, upper): (Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT \"Rate\", \"RATE_2\" FROM annuities WHERE page_number = 2",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!((rate.unwrap() - 4.80).abs() < 1e-9);
        assert!((upper.unwrap() - 4.90).abs() < 1e-9);
    }
}
