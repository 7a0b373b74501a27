//! Table Locator: picks the product table out of a page's tables.
//!
//! Listing pages carry several tables (layout, pager, legend, the product
//! grid). The selection is a pure function over the parsed tables, behind
//! [`TableSelectionPolicy`] so it can be tuned per site without touching
//! navigation or extraction.

use crate::html_table::HtmlTable;
use crate::site::LocatorConfig;

/// Chooses the data table among a page's tables.
pub trait TableSelectionPolicy: Send + Sync {
    /// Returns the table holding product data, or `None` when the page has
    /// no qualifying table. `None` is an empty page, not an error.
    fn select<'a>(&self, tables: &'a [HtmlTable]) -> Option<&'a HtmlTable>;
}

/// Row-threshold, header-keyword, widest-table policy.
///
/// 1. Tables with fewer than `min_rows` rows are dropped (pagers, nav).
/// 2. Tables whose header region mentions none of the keywords are
///    dropped (layout tables). The header region is the first
///    `header_rows` rows plus every `<th>` cell.
/// 3. The remaining table with the most cells wins; ties go to the first
///    in DOM order.
#[derive(Debug, Clone)]
pub struct KeywordTablePolicy {
    min_rows: usize,
    header_rows: usize,
    keywords: Vec<String>,
}

impl KeywordTablePolicy {
    /// Creates a policy. Keywords are matched case-insensitively; an empty
    /// keyword list disables the keyword filter.
    #[must_use]
    pub fn new(min_rows: usize, header_rows: usize, keywords: &[String]) -> Self {
        Self {
            min_rows,
            header_rows,
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Creates a policy from a site's locator settings.
    #[must_use]
    pub fn from_config(config: &LocatorConfig) -> Self {
        Self::new(config.min_rows, config.header_rows, &config.keywords)
    }

    /// Lowercased text of the table's header region.
    fn header_text(&self, table: &HtmlTable) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for (i, row) in table.rows.iter().enumerate() {
            for cell in &row.cells {
                if i < self.header_rows || cell.is_header {
                    parts.push(&cell.text);
                }
            }
        }
        parts.join(" ").to_lowercase()
    }

    fn qualifies(&self, table: &HtmlTable) -> bool {
        if table.row_count() < self.min_rows {
            return false;
        }
        if self.keywords.is_empty() {
            return true;
        }
        let header = self.header_text(table);
        self.keywords.iter().any(|k| header.contains(k.as_str()))
    }
}

impl TableSelectionPolicy for KeywordTablePolicy {
    fn select<'a>(&self, tables: &'a [HtmlTable]) -> Option<&'a HtmlTable> {
        tables
            .iter()
            .filter(|t| self.qualifies(t))
            .fold(None, |best: Option<&HtmlTable>, table| match best {
                Some(current) if current.cell_count() >= table.cell_count() => Some(current),
                _ => Some(table),
            })
    }
}
