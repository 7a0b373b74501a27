//! Page Navigator.
//!
//! Drives the browser to a listing page and waits until the client-side
//! script has rendered the data, polling for the readiness marker rather
//! than sleeping a fixed time. Layout tables render before the product
//! grid, so by default a page only counts as ready once the table policy
//! finds the data table in it.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tokio::time::Instant;

use crate::auth::is_login_page;
use crate::browser::Browser;
use crate::html_table::{collapse_whitespace, parse_tables};
use crate::locator::TableSelectionPolicy;
use crate::site::{ConfigError, ListingConfig, LoginConfig, ReadinessConfig};

static PAGE_OF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpage\s+\d+\s+of\s+(\d+)").expect("valid regex"));

static RECORDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d[\d,]*)\s+records\b").expect("valid regex"));

static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d[\d,]*)\s+total\b").expect("valid regex"));

/// Per-page load failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    /// The page rendered the login form; the session is gone.
    #[error("Session expired while loading page {page}")]
    SessionExpired {
        /// The page being loaded.
        page: u32,
    },

    /// The page never became ready, or the browser failed loading it.
    #[error("Page {page} failed to load: {reason}")]
    Navigation {
        /// The page being loaded.
        page: u32,
        /// What went wrong.
        reason: String,
    },
}

impl PageError {
    /// The page the error belongs to.
    #[must_use]
    pub const fn page(&self) -> u32 {
        match self {
            Self::SessionExpired { page } | Self::Navigation { page, .. } => *page,
        }
    }
}

/// A listing page that passed the readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// One-based page number.
    pub page_number: u32,
    /// URL that was requested.
    pub url: String,
    /// Rendered markup.
    pub html: String,
}

/// Loads listing pages and waits for them to render.
#[derive(Debug, Clone)]
pub struct Navigator {
    listing: ListingConfig,
    readiness: ReadinessConfig,
    login: LoginConfig,
}

impl Navigator {
    /// Creates a navigator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the readiness selector is not
    /// valid CSS.
    pub fn new(
        listing: ListingConfig,
        readiness: ReadinessConfig,
        login: LoginConfig,
    ) -> Result<Self, ConfigError> {
        Selector::parse(&readiness.selector).map_err(|e| {
            ConfigError::Invalid(format!(
                "invalid readiness selector '{}': {e}",
                readiness.selector
            ))
        })?;
        Ok(Self {
            listing,
            readiness,
            login,
        })
    }

    /// The listing settings.
    #[must_use]
    pub const fn listing(&self) -> &ListingConfig {
        &self.listing
    }

    /// URL of listing page `page`.
    #[must_use]
    pub fn page_url(&self, page: u32) -> String {
        self.listing.page_url(page)
    }

    /// Navigates to `page` and waits for the readiness marker and, unless
    /// `readiness.require_data_table` is off, for `policy` to find a data
    /// table.
    ///
    /// # Errors
    ///
    /// Returns [`PageError::SessionExpired`] if the login form shows up and
    /// [`PageError::Navigation`] if the page is not ready within the
    /// timeout or the browser fails.
    pub async fn load_page<B: Browser, P: TableSelectionPolicy>(
        &self,
        browser: &mut B,
        page: u32,
        policy: &P,
    ) -> Result<RenderedPage, PageError> {
        let url = self.page_url(page);
        let nav_err = |reason: String| PageError::Navigation { page, reason };

        log::debug!("Loading page {page}: {url}");
        browser.goto(&url).await.map_err(|e| nav_err(e.to_string()))?;

        let deadline = Instant::now() + self.readiness.timeout();
        let mut polls = 0u32;
        loop {
            polls += 1;
            let html = browser
                .page_source()
                .await
                .map_err(|e| nav_err(e.to_string()))?;

            if is_login_page(&html, &self.login) {
                log::warn!("Page {page} shows the login form");
                return Err(PageError::SessionExpired { page });
            }

            let rows = ready_rows(&html, &self.readiness.selector);
            let marker_ready = rows >= self.readiness.min_rows;
            if marker_ready && self.has_data_table(&html, policy) {
                log::trace!("Page {page} ready after {polls} poll(s) ({rows} rows)");
                return Ok(RenderedPage {
                    page_number: page,
                    url,
                    html,
                });
            }

            if Instant::now() >= deadline {
                let reason = if marker_ready {
                    format!(
                        "no data table after {}s ({polls} poll(s))",
                        self.readiness.timeout_secs
                    )
                } else {
                    format!(
                        "no '{}' with at least {} rows after {}s",
                        self.readiness.selector,
                        self.readiness.min_rows,
                        self.readiness.timeout_secs
                    )
                };
                return Err(nav_err(reason));
            }

            tokio::time::sleep(self.readiness.poll_interval()).await;
        }
    }

    fn has_data_table<P: TableSelectionPolicy>(&self, html: &str, policy: &P) -> bool {
        !self.readiness.require_data_table || policy.select(&parse_tables(html)).is_some()
    }
}

/// Largest `<tr>` count among elements matching `selector`.
#[must_use]
pub fn ready_rows(html: &str, selector: &str) -> usize {
    let Ok(marker_sel) = Selector::parse(selector) else {
        return 0;
    };
    let tr_sel = Selector::parse("tr").unwrap_or_else(|_| unreachable!());
    let document = Html::parse_document(html);

    document
        .select(&marker_sel)
        .map(|el| {
            if el.value().name() == "tr" {
                1
            } else {
                el.select(&tr_sel).count()
            }
        })
        .max()
        .unwrap_or(0)
}

/// Reads the total page count from a rendered listing page.
///
/// Understands `Page <n> of <N>`, and a record count written as
/// `<N> records` or `<N> total` (divided by `page_size`, rounded up).
/// Returns `None` when none of these is present.
#[must_use]
pub fn detect_total_pages(html: &str, page_size: u32) -> Option<u32> {
    let document = Html::parse_document(html);
    let text = collapse_whitespace(&document.root_element().text().collect::<String>());

    if let Some(total) = PAGE_OF_RE
        .captures(&text)
        .and_then(|c| c[1].parse::<u32>().ok())
        .filter(|n| *n > 0)
    {
        return Some(total);
    }

    if page_size == 0 {
        return None;
    }
    [&*RECORDS_RE, &*TOTAL_RE]
        .into_iter()
        .find_map(|re| {
            re.captures(&text)
                .and_then(|c| c[1].replace(',', "").parse::<u32>().ok())
                .filter(|n| *n > 0)
        })
        .map(|records| records.div_ceil(page_size))
}
