//! Cookie-keeping HTTP backend (`reqwest`).
//!
//! Navigation is a GET, form submission a URL-encoded POST of every field
//! (hidden tokens included). Responses are never script-rendered.

use annuity_scraper::{Browser, BrowserError, FormSubmission};

use crate::BrowserConfig;

/// A browsing session over plain HTTP.
pub struct HttpBrowser {
    client: reqwest::Client,
    current_url: String,
    current_html: String,
}

impl HttpBrowser {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Backend`] if the client cannot be built.
    pub fn new(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.as_str())
            .timeout(config.page_load_timeout)
            .build()
            .map_err(BrowserError::backend)?;
        Ok(Self {
            client,
            current_url: "about:blank".to_string(),
            current_html: String::new(),
        })
    }

    async fn load(&mut self, request: reqwest::RequestBuilder) -> Result<(), BrowserError> {
        let response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(BrowserError::backend)?;
        self.current_url = response.url().to_string();
        self.current_html = response.text().await.map_err(BrowserError::backend)?;
        log::trace!(
            "Loaded {} ({} bytes)",
            self.current_url,
            self.current_html.len()
        );
        Ok(())
    }
}

impl Browser for HttpBrowser {
    fn backend(&self) -> &'static str {
        "http"
    }

    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        let request = self.client.get(url);
        self.load(request).await
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self.current_url.clone())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        Ok(self.current_html.clone())
    }

    async fn submit_form(&mut self, form: &FormSubmission) -> Result<(), BrowserError> {
        let request = self
            .client
            .post(&form.action)
            .header(reqwest::header::REFERER, self.current_url.as_str())
            .form(&form.fields);
        self.load(request).await
    }

    async fn close(self) -> Result<(), BrowserError> {
        Ok(())
    }
}
