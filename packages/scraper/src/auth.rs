//! Session/Auth Handler.
//!
//! Logs the shared browser session in by filling the portal's login form.
//! Hidden inputs (anti-forgery tokens, view state) are copied from the
//! rendered form and submitted alongside the credentials. The handler is
//! re-entrant: the pagination controller calls it again when a listing
//! page turns out to be the login page.

use scraper::{ElementRef, Html, Selector};
use tokio::time::Instant;

use crate::browser::{Browser, BrowserError, FormSubmission};
use crate::html_table::collapse_whitespace;
use crate::site::{Credentials, LoginConfig};

/// Fatal authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The login page did not contain a usable login form.
    #[error("Login form not found: {0}")]
    FormNotFound(String),

    /// The portal did not accept the credentials.
    #[error("Login rejected: {0}")]
    InvalidCredentials(String),

    /// A CAPTCHA or bot challenge was shown instead of the members area.
    #[error("Login blocked by challenge ({0})")]
    Challenge(String),

    /// The form action could not be resolved to a URL.
    #[error("Invalid login URL: {0}")]
    Url(#[from] url::ParseError),

    /// The browser failed while logging in.
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// The parts of a rendered login form needed to submit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Raw `action` attribute, if any.
    pub action: Option<String>,
    /// Named hidden inputs, in document order.
    pub hidden: Vec<(String, String)>,
    /// `value` of the configured submit button, if present.
    pub submit_value: Option<String>,
}

/// Finds the login form in a rendered page.
///
/// The login form is the first `<form>` holding a password input (or the
/// configured password field). Old table layouts can leave inputs outside
/// their form after HTML parsing; in that case a page-level password input
/// still counts and hidden inputs are collected from the whole page.
#[must_use]
pub fn find_login_form(html: &str, login: &LoginConfig) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let form_sel = Selector::parse("form").unwrap_or_else(|_| unreachable!());
    let input_sel = Selector::parse("input, button").unwrap_or_else(|_| unreachable!());

    let is_password = |input: &ElementRef<'_>| {
        let el = input.value();
        el.attr("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("password"))
            || el.attr("name") == Some(login.password_field.as_str())
            || el.attr("id") == Some(login.password_field.as_str())
    };

    let form = document
        .select(&form_sel)
        .find(|form| form.select(&input_sel).any(|i| is_password(&i)));

    let inputs: Vec<ElementRef<'_>> = match form {
        Some(form) => form.select(&input_sel).collect(),
        None => {
            let all: Vec<ElementRef<'_>> = document.select(&input_sel).collect();
            if !all.iter().any(is_password) {
                return None;
            }
            all
        }
    };

    let action = form
        .or_else(|| document.select(&form_sel).next())
        .and_then(|f| f.value().attr("action"))
        .map(str::to_string);

    let hidden = inputs
        .iter()
        .filter(|i| {
            i.value()
                .attr("type")
                .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
        })
        .filter_map(|i| {
            let name = i.value().attr("name")?;
            Some((
                name.to_string(),
                i.value().attr("value").unwrap_or_default().to_string(),
            ))
        })
        .collect();

    let submit_value = login.submit_field.as_deref().and_then(|submit| {
        inputs
            .iter()
            .find(|i| i.value().attr("name") == Some(submit))
            .map(|i| i.value().attr("value").unwrap_or_default().to_string())
    });

    Some(LoginForm {
        action,
        hidden,
        submit_value,
    })
}

/// Whether the rendered page shows the login form (logged-out state).
#[must_use]
pub fn is_login_page(html: &str, login: &LoginConfig) -> bool {
    find_login_form(html, login).is_some()
}

/// Elements whose text never shows on the page.
const HIDDEN_TEXT_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Lowercased visible text plus `class` and `id` values, for marker
/// matching. Script and style bodies are left out.
fn searchable(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        if let Some(text) = node.value().as_text() {
            let hidden = node
                .parent()
                .and_then(|parent| parent.value().as_element())
                .is_some_and(|el| HIDDEN_TEXT_TAGS.contains(&el.name()));
            if !hidden {
                parts.push(text);
            }
        } else if let Some(element) = node.value().as_element() {
            parts.extend(element.attr("class"));
            parts.extend(element.attr("id"));
        }
    }

    collapse_whitespace(&parts.join(" ")).to_lowercase()
}

fn find_marker<'a>(haystack: &str, markers: &'a [String]) -> Option<&'a str> {
    markers
        .iter()
        .map(String::as_str)
        .find(|m| !m.is_empty() && haystack.contains(&m.to_lowercase()))
}

/// Logs a browser session in.
#[derive(Debug, Clone)]
pub struct Authenticator {
    login: LoginConfig,
    login_url: String,
    credentials: Credentials,
}

impl Authenticator {
    /// Creates an authenticator that loads the login form from `login_url`.
    #[must_use]
    pub const fn new(login: LoginConfig, login_url: String, credentials: Credentials) -> Self {
        Self {
            login,
            login_url,
            credentials,
        }
    }

    /// Builds the submission for a rendered login form.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Url`] if the form action cannot be resolved
    /// against `page_url`.
    pub fn submission(&self, form: &LoginForm, page_url: &str) -> Result<FormSubmission, AuthError> {
        let base = url::Url::parse(page_url)?;
        let action = match form.action.as_deref().map(str::trim) {
            Some(action) if !action.is_empty() => base.join(action)?.to_string(),
            _ => base.to_string(),
        };

        let mut fields: Vec<(String, String)> = form
            .hidden
            .iter()
            .filter(|(name, _)| {
                *name != self.login.username_field && *name != self.login.password_field
            })
            .cloned()
            .collect();
        let hidden_fields = fields.iter().map(|(name, _)| name.clone()).collect();

        fields.push((
            self.login.username_field.clone(),
            self.credentials.username.clone(),
        ));
        fields.push((
            self.login.password_field.clone(),
            self.credentials.password.clone(),
        ));
        if let Some(submit) = &self.login.submit_field {
            fields.push((
                submit.clone(),
                form.submit_value.clone().unwrap_or_default(),
            ));
        }

        Ok(FormSubmission {
            action,
            fields,
            hidden_fields,
            submit_field: self.login.submit_field.clone(),
        })
    }

    /// Logs the session in.
    ///
    /// Succeeds immediately when the login page shows no login form (the
    /// session is already authenticated).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the form is missing, a challenge is shown,
    /// the portal keeps showing the login form, or the browser fails.
    pub async fn authenticate<B: Browser>(&self, browser: &mut B) -> Result<(), AuthError> {
        log::info!("Logging in as {}", self.credentials.username);
        browser.goto(&self.login_url).await?;

        let html = browser.page_source().await?;
        let Some(form) = find_login_form(&html, &self.login) else {
            if let Some(marker) = find_marker(&searchable(&html), &self.login.challenge_markers) {
                return Err(AuthError::Challenge(marker.to_string()));
            }
            if self.login.success_markers.is_empty()
                || find_marker(&searchable(&html), &self.login.success_markers).is_some()
            {
                log::info!("Session already authenticated");
                return Ok(());
            }
            return Err(AuthError::FormNotFound(self.login_url.clone()));
        };

        let page_url = browser.current_url().await?;
        let submission = self.submission(&form, &page_url)?;
        log::debug!(
            "Submitting login form to {} with {} hidden field(s)",
            submission.action,
            submission.hidden_fields.len()
        );
        browser.submit_form(&submission).await?;

        self.confirm(browser).await
    }

    /// Polls the post-login page until the members area shows up.
    async fn confirm<B: Browser>(&self, browser: &mut B) -> Result<(), AuthError> {
        let deadline = Instant::now() + self.login.confirm_timeout();
        let username = self.credentials.username.to_lowercase();

        loop {
            let html = browser.page_source().await?;
            let form_present = is_login_page(&html, &self.login);
            let haystack = searchable(&html);

            if !form_present {
                let marker = find_marker(&haystack, &self.login.success_markers);
                if self.login.success_markers.is_empty()
                    || marker.is_some()
                    || haystack.contains(&username)
                {
                    log::info!(
                        "Login successful{}",
                        marker.map_or_else(String::new, |m| format!(" (found '{m}')"))
                    );
                    return Ok(());
                }
            }

            if let Some(marker) = find_marker(&haystack, &self.login.challenge_markers) {
                return Err(AuthError::Challenge(marker.to_string()));
            }

            if Instant::now() >= deadline {
                let reason = if form_present {
                    "login form still shown after submitting credentials"
                } else {
                    "no account indicator found after submitting credentials"
                };
                return Err(AuthError::InvalidCredentials(reason.to_string()));
            }

            tokio::time::sleep(self.login.poll_interval()).await;
        }
    }
}
