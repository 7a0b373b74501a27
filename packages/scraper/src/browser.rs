//! The browsing session seam.
//!
//! Every stage of the pipeline talks to the site through a [`Browser`]
//! handle that is passed explicitly. The handle owns the single rendered
//! page and the session cookies, so every operation takes `&mut self` and
//! nothing runs concurrently against it.
//!
//! Concrete backends (WebDriver, plain HTTP) live in the `annuity_browser`
//! crate; tests use scripted in-memory implementations.

use std::future::Future;

/// Errors raised by a browser backend.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// The underlying driver or HTTP client failed.
    #[error("Browser backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An element required for an interaction was not present.
    #[error("Element not found: {0}")]
    ElementNotFound(String),
}

impl BrowserError {
    /// Wraps any backend error.
    pub fn backend(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(error))
    }
}

/// A filled-in login form ready to be submitted.
///
/// `fields` holds every name/value pair in submission order, including
/// hidden anti-forgery tokens copied from the rendered form.
#[derive(Clone, PartialEq, Eq)]
pub struct FormSubmission {
    /// Absolute URL the form posts to.
    pub action: String,
    /// Every field to submit, in order.
    pub fields: Vec<(String, String)>,
    /// Names of fields that were hidden inputs in the rendered form.
    pub hidden_fields: Vec<String>,
    /// Name of the submit button, if the form has a named one.
    pub submit_field: Option<String>,
}

impl FormSubmission {
    /// Looks up a field value by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Whether the named field came from a hidden input.
    #[must_use]
    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden_fields.iter().any(|h| h == name)
    }
}

impl std::fmt::Debug for FormSubmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only field names; values include the password.
        let names: Vec<&str> = self.fields.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("FormSubmission")
            .field("action", &self.action)
            .field("fields", &names)
            .field("submit_field", &self.submit_field)
            .finish_non_exhaustive()
    }
}

/// A single, stateful browsing context.
pub trait Browser: Send {
    /// Short backend name for log messages (e.g. `"webdriver"`).
    fn backend(&self) -> &'static str;

    /// Navigates to `url` and returns once the initial document loaded.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] if navigation fails.
    fn goto(&mut self, url: &str) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// URL of the currently loaded document, after redirects.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] if the backend cannot report it.
    fn current_url(&mut self) -> impl Future<Output = Result<String, BrowserError>> + Send;

    /// The current (script-rendered, where supported) document markup.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] if the backend cannot read the DOM.
    fn page_source(&mut self) -> impl Future<Output = Result<String, BrowserError>> + Send;

    /// Submits a login form and returns once the response document loaded.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] if a field cannot be filled or the submit
    /// fails.
    fn submit_form(
        &mut self,
        form: &FormSubmission,
    ) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// Releases the session.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError`] if the backend fails to shut down cleanly.
    fn close(self) -> impl Future<Output = Result<(), BrowserError>> + Send
    where
        Self: Sized;
}
