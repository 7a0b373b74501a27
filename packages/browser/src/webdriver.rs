//! Chrome over WebDriver (`thirtyfour`).

use annuity_scraper::{Browser, BrowserError, FormSubmission};
use serde_json::json;
use thirtyfour::prelude::*;

use crate::BrowserConfig;

/// Sets a named input's value without typing into it (hidden inputs
/// cannot receive keys).
const SET_VALUE_SCRIPT: &str = "var el = document.getElementsByName(arguments[0])[0]; \
     if (el) { el.value = arguments[1]; return true; } return false;";

/// Submits the form that owns the password input.
const SUBMIT_SCRIPT: &str = "var el = document.querySelector('input[type=password]'); \
     if (el && el.form) { el.form.submit(); return true; } return false;";

/// Chrome command-line arguments for `config`.
#[must_use]
pub fn chrome_args(config: &BrowserConfig) -> Vec<String> {
    let mut args = Vec::new();
    if config.headless {
        args.push("--headless=new".to_string());
    }
    args.extend(
        ["--no-sandbox", "--disable-dev-shm-usage", "--disable-gpu"]
            .into_iter()
            .map(str::to_string),
    );
    args.push(format!(
        "--window-size={},{}",
        config.window_size.0, config.window_size.1
    ));
    args.push(format!("--user-agent={}", config.user_agent));
    args
}

/// A Chrome session driven through a WebDriver server.
pub struct WebDriverBrowser {
    driver: WebDriver,
}

impl WebDriverBrowser {
    /// Starts a Chrome session on the configured WebDriver server.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Backend`] if the capabilities are rejected or
    /// the server cannot start a session.
    pub async fn connect(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let mut caps = DesiredCapabilities::chrome();
        for arg in chrome_args(config) {
            caps.add_arg(&arg).map_err(BrowserError::backend)?;
        }

        log::info!(
            "Starting Chrome via {} (headless: {})",
            config.webdriver_url,
            config.headless
        );
        let driver = WebDriver::new(config.webdriver_url.as_str(), caps)
            .await
            .map_err(BrowserError::backend)?;
        driver
            .set_page_load_timeout(config.page_load_timeout)
            .await
            .map_err(BrowserError::backend)?;

        Ok(Self { driver })
    }

    async fn find_field(&self, name: &str) -> Result<WebElement, BrowserError> {
        if let Ok(element) = self.driver.find(By::Name(name)).await {
            return Ok(element);
        }
        self.driver
            .find(By::Id(name))
            .await
            .map_err(|_| BrowserError::ElementNotFound(name.to_string()))
    }
}

impl Browser for WebDriverBrowser {
    fn backend(&self) -> &'static str {
        "webdriver"
    }

    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.driver.goto(url).await.map_err(BrowserError::backend)
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        self.driver
            .current_url()
            .await
            .map(|url| url.to_string())
            .map_err(BrowserError::backend)
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        self.driver.source().await.map_err(BrowserError::backend)
    }

    async fn submit_form(&mut self, form: &FormSubmission) -> Result<(), BrowserError> {
        for (name, value) in &form.fields {
            if form.submit_field.as_deref() == Some(name.as_str()) {
                continue;
            }
            if form.is_hidden(name) {
                let ret = self
                    .driver
                    .execute(SET_VALUE_SCRIPT, vec![json!(name), json!(value)])
                    .await
                    .map_err(BrowserError::backend)?;
                if ret.json() != &json!(true) {
                    log::debug!("Hidden field '{name}' not present in the live form");
                }
                continue;
            }
            let element = self.find_field(name).await?;
            element.clear().await.map_err(BrowserError::backend)?;
            element
                .send_keys(value.as_str())
                .await
                .map_err(BrowserError::backend)?;
        }

        if let Some(submit) = &form.submit_field
            && let Ok(button) = self.find_field(submit).await
        {
            return button.click().await.map_err(BrowserError::backend);
        }

        let ret = self
            .driver
            .execute(SUBMIT_SCRIPT, Vec::new())
            .await
            .map_err(BrowserError::backend)?;
        if ret.json() == &json!(true) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(
                "login form submit control".to_string(),
            ))
        }
    }

    async fn close(self) -> Result<(), BrowserError> {
        log::debug!("Closing Chrome session");
        self.driver.quit().await.map_err(BrowserError::backend)
    }
}
