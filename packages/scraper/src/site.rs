//! Config-driven site definition.
//!
//! [`SiteDefinition`] captures everything specific to one members portal:
//! where the listing lives and how it paginates, how the login form looks,
//! what "rendered" means for a listing page, how to pick the product table
//! out of the layout tables, and how to tidy the extracted rows.
//!
//! The default definition is embedded at compile time from
//! `sites/annuity_rate_watch.toml`; a different one can be loaded from disk.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use annuity_models::ColumnType;
use serde::Deserialize;

/// TOML for the built-in AnnuityRateWatch definition.
const DEFAULT_SITE_TOML: &str = include_str!("../sites/annuity_rate_watch.toml");

/// Errors raised while loading a site definition or credentials.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("Invalid site definition: {0}")]
    Toml(#[from] toml::de::Error),

    /// The definition file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value parsed but makes no sense.
    #[error("Invalid configuration value: {0}")]
    Invalid(String),

    /// A credential was not supplied by any source.
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
}

// ── Top-level definition ─────────────────────────────────────────────────

/// A complete, config-driven site definition.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteDefinition {
    /// Short identifier (e.g. `"annuity_rate_watch"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Listing pages and their URL template.
    pub listing: ListingConfig,
    /// Login form layout.
    pub login: LoginConfig,
    /// Render readiness condition for listing pages.
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Product-table selection policy.
    #[serde(default)]
    pub locator: LocatorConfig,
    /// Retry budget, delays, and open-ended range limits.
    #[serde(default)]
    pub run: RunConfig,
    /// Post-extraction tidy-up.
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Column ordering and storage types for the outputs.
    #[serde(default)]
    pub output: OutputConfig,
}

impl SiteDefinition {
    /// Parses and validates a definition from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or a value is out of
    /// range.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let site: Self = toml::de::from_str(toml_str)?;
        site.validate()?;
        Ok(site)
    }

    /// Reads and parses a definition file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// The built-in AnnuityRateWatch definition.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the embedded TOML is invalid.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_SITE_TOML)
    }

    /// Checks cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let listing = &self.listing;
        if listing.start_page == 0 {
            return Err(ConfigError::Invalid(
                "listing.start_page must be at least 1".to_string(),
            ));
        }
        if let Some(max) = listing.max_page
            && max < listing.start_page
        {
            return Err(ConfigError::Invalid(format!(
                "listing.max_page ({max}) is before listing.start_page ({})",
                listing.start_page
            )));
        }
        if listing.page_size == 0 {
            return Err(ConfigError::Invalid(
                "listing.page_size must be positive".to_string(),
            ));
        }
        if let Pagination::Query { param } = &listing.pagination
            && param.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "listing.pagination.param must not be empty".to_string(),
            ));
        }
        if self.readiness.poll_interval_ms == 0 || self.login.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll intervals must be positive".to_string(),
            ));
        }
        if self.run.page_ceiling < listing.start_page {
            return Err(ConfigError::Invalid(format!(
                "run.page_ceiling ({}) is before listing.start_page ({})",
                self.run.page_ceiling, listing.start_page
            )));
        }
        Ok(())
    }
}

// ── Listing ──────────────────────────────────────────────────────────────

/// Where the listing pages live.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Listing URL without any page parameter.
    pub base_url: String,
    /// First page to scrape (one-based).
    #[serde(default = "default_start_page")]
    pub start_page: u32,
    /// Last page to scrape. When absent the bound is discovered from the
    /// first page or by end-of-data detection.
    #[serde(default)]
    pub max_page: Option<u32>,
    /// Rows per listing page, used for offsets and total-page discovery.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// URL template for page `n`.
    #[serde(default)]
    pub pagination: Pagination,
}

impl ListingConfig {
    /// Builds the URL of listing page `page` (one-based).
    #[must_use]
    pub fn page_url(&self, page: u32) -> String {
        match &self.pagination {
            Pagination::Query { param } => {
                let separator = if self.base_url.contains('?') { '&' } else { '?' };
                format!("{}{separator}{param}={page}", self.base_url)
            }
            Pagination::PathOffset => {
                let offset = u64::from(page.saturating_sub(1)) * u64::from(self.page_size);
                format!("{}/{offset}", self.base_url.trim_end_matches('/'))
            }
        }
    }
}

/// How a page number is encoded in the listing URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pagination {
    /// `<base>?<param>=<n>` (or `&` when the base already has a query).
    Query {
        /// Query parameter name.
        #[serde(default = "default_page_param")]
        param: String,
    },
    /// `<base>/<(n - 1) * page_size>`.
    PathOffset,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::Query {
            param: default_page_param(),
        }
    }
}

// ── Login ────────────────────────────────────────────────────────────────

/// Login form layout and success detection.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    /// Page that shows the login form. Defaults to the first listing page.
    #[serde(default)]
    pub url: Option<String>,
    /// `name` (or `id`) of the username input.
    pub username_field: String,
    /// `name` (or `id`) of the password input.
    pub password_field: String,
    /// `name` of the submit button, if it has one.
    #[serde(default)]
    pub submit_field: Option<String>,
    /// Lowercase text fragments that only appear once logged in.
    #[serde(default)]
    pub success_markers: Vec<String>,
    /// Lowercase text fragments that indicate a CAPTCHA or bot challenge.
    #[serde(default = "default_challenge_markers")]
    pub challenge_markers: Vec<String>,
    /// How long to wait for the post-login page.
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    /// Polling interval while confirming the login.
    #[serde(default = "default_login_poll_ms")]
    pub poll_interval_ms: u64,
}

impl LoginConfig {
    /// Confirmation timeout as a [`Duration`].
    #[must_use]
    pub const fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    /// Confirmation polling interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Readiness ────────────────────────────────────────────────────────────

/// What a fully rendered listing page looks like.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    /// CSS selector of the element that must be present.
    #[serde(default = "default_readiness_selector")]
    pub selector: String,
    /// Minimum `<tr>` count inside a matching element.
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
    /// Also wait until the locator policy finds a data table. When off, a
    /// page that only renders layout tables is reported as empty instead of
    /// timing out.
    #[serde(default = "default_true")]
    pub require_data_table: bool,
    /// Maximum wait per page load.
    #[serde(default = "default_readiness_timeout_secs")]
    pub timeout_secs: u64,
    /// Polling interval while waiting.
    #[serde(default = "default_readiness_poll_ms")]
    pub poll_interval_ms: u64,
}

impl ReadinessConfig {
    /// Readiness timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Readiness polling interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            selector: default_readiness_selector(),
            min_rows: default_min_rows(),
            require_data_table: true,
            timeout_secs: default_readiness_timeout_secs(),
            poll_interval_ms: default_readiness_poll_ms(),
        }
    }
}

// ── Locator ──────────────────────────────────────────────────────────────

/// Product-table selection policy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LocatorConfig {
    /// Tables with fewer rows are pager or layout tables.
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
    /// Leading rows searched for header keywords, in addition to any
    /// `<th>` cells.
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,
    /// Case-insensitive header keywords; at least one must appear.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            min_rows: default_min_rows(),
            header_rows: default_header_rows(),
            keywords: default_keywords(),
        }
    }
}

// ── Run policy ───────────────────────────────────────────────────────────

/// Retry budget, delays, and open-ended range limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Polite delay between successive page requests.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// Retries after a page fails to render.
    #[serde(default = "default_navigation_retries")]
    pub navigation_retries: u32,
    /// Delay before each navigation retry.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Consecutive empty or skipped pages that end an open-ended run.
    #[serde(default = "default_empty_page_limit")]
    pub empty_page_limit: u32,
    /// Hard upper bound for open-ended runs.
    #[serde(default = "default_page_ceiling")]
    pub page_ceiling: u32,
}

impl RunConfig {
    /// Delay between pages as a [`Duration`].
    #[must_use]
    pub const fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    /// Delay before a navigation retry as a [`Duration`].
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            page_delay_ms: default_page_delay_ms(),
            navigation_retries: default_navigation_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            empty_page_limit: default_empty_page_limit(),
            page_ceiling: default_page_ceiling(),
        }
    }
}

// ── Cleanup ──────────────────────────────────────────────────────────────

/// Post-extraction tidy-up rules. All steps are off by default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanupConfig {
    /// Column renames, applied in order.
    #[serde(default)]
    pub renames: Vec<ColumnRename>,
    /// Columns removed from every record.
    #[serde(default)]
    pub drop_columns: Vec<String>,
    /// Columns a real product row fills in (pre-rename names). Empty
    /// disables the grouping-row filter.
    #[serde(default)]
    pub key_columns: Vec<String>,
    /// Minimum number of filled key columns for a product row.
    #[serde(default)]
    pub min_filled: usize,
    /// Values that count as "not filled".
    #[serde(default)]
    pub placeholders: Vec<String>,
    /// Drop rows whose values repeat an earlier row.
    #[serde(default)]
    pub dedupe: bool,
}

/// A single column rename.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnRename {
    /// Extracted column name.
    pub from: String,
    /// Output column name.
    pub to: String,
}

// ── Output ───────────────────────────────────────────────────────────────

/// Column ordering and storage types.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Columns listed first in CSV output, in this order.
    #[serde(default)]
    pub preferred_columns: Vec<String>,
    /// Storage types that win over inference.
    #[serde(default)]
    pub column_types: BTreeMap<String, ColumnType>,
}

// ── Credentials ──────────────────────────────────────────────────────────

/// Portal login credentials.
#[derive(Clone)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] if either value is blank.
    pub fn new(username: String, password: String) -> Result<Self, ConfigError> {
        if username.trim().is_empty() {
            return Err(ConfigError::MissingCredential("username"));
        }
        if password.is_empty() {
            return Err(ConfigError::MissingCredential("password"));
        }
        Ok(Self { username, password })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ── Serde defaults ───────────────────────────────────────────────────────

const fn default_start_page() -> u32 {
    1
}

const fn default_page_size() -> u32 {
    50
}

fn default_page_param() -> String {
    "pageNo".to_string()
}

fn default_challenge_markers() -> Vec<String> {
    ["g-recaptcha", "captcha", "cf-challenge"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

const fn default_confirm_timeout_secs() -> u64 {
    15
}

const fn default_login_poll_ms() -> u64 {
    500
}

fn default_readiness_selector() -> String {
    "table".to_string()
}

const fn default_min_rows() -> usize {
    3
}

const fn default_true() -> bool {
    true
}

const fn default_readiness_timeout_secs() -> u64 {
    30
}

const fn default_readiness_poll_ms() -> u64 {
    1000
}

const fn default_header_rows() -> usize {
    2
}

fn default_keywords() -> Vec<String> {
    [
        "company", "product", "carrier", "am best", "rate", "yield", "premium",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

const fn default_page_delay_ms() -> u64 {
    1000
}

const fn default_navigation_retries() -> u32 {
    2
}

const fn default_retry_delay_ms() -> u64 {
    2000
}

const fn default_empty_page_limit() -> u32 {
    3
}

const fn default_page_ceiling() -> u32 {
    200
}
