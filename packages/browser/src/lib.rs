#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Concrete [`Browser`](annuity_scraper::Browser) backends.
//!
//! * [`webdriver::WebDriverBrowser`] drives a real Chrome through a
//!   WebDriver server, so client-side rendered listings work.
//! * [`http::HttpBrowser`] fetches pages with a cookie-keeping HTTP client.
//!   It never runs scripts and only suits server-rendered listings.

pub mod http;
pub mod webdriver;

use std::time::Duration;

use strum_macros::{AsRefStr, Display, EnumString};

/// Desktop Chrome user agent sent by both backends.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Which backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BackendKind {
    /// Chrome over WebDriver.
    #[default]
    Webdriver,
    /// Plain HTTP with a cookie store.
    Http,
}

/// Settings shared by the backends.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// WebDriver server URL (e.g. a local `chromedriver`).
    pub webdriver_url: String,
    /// Run Chrome without a window.
    pub headless: bool,
    /// User agent string.
    pub user_agent: String,
    /// Window size as `(width, height)`.
    pub window_size: (u32, u32),
    /// Maximum time a single page load may take.
    pub page_load_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_size: (1920, 1080),
            page_load_timeout: Duration::from_secs(60),
        }
    }
}

impl BrowserConfig {
    /// Sets the WebDriver server URL.
    #[must_use]
    pub fn with_webdriver_url(mut self, url: impl Into<String>) -> Self {
        self.webdriver_url = url.into();
        self
    }

    /// Shows or hides the Chrome window.
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Sets the page load timeout.
    #[must_use]
    pub const fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = timeout;
        self
    }
}
