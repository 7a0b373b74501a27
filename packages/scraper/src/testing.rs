//! In-memory browser and fixtures for tests.
//!
//! [`ScriptedBrowser`] behaves like the portal: while logged out every URL
//! renders the login page, submitting the form logs in (or not, depending
//! on the scripted response), and individual URLs can be made to expire
//! the session, render too slowly, or show a partial render first.

use std::collections::{BTreeMap, VecDeque};

use crate::auth::is_login_page;
use crate::browser::{Browser, BrowserError, FormSubmission};
use crate::site::{LoginConfig, SiteDefinition};

pub const LOGIN_URL: &str = "https://example.com/list.htm?pageNo=1";

pub const LOGIN_PAGE: &str = r#"
    <html><body>
      <form method="post" action="/login/do">
        <input type="hidden" name="csrf" value="tok-123">
        <input type="hidden" name="view" value="">
        <input type="text" id="username" name="username">
        <input type="password" id="userpass" name="userpass">
        <input type="submit" name="doLogin" value="Log In">
      </form>
    </body></html>
"#;

pub const MEMBERS_PAGE: &str =
    "<html><body><a href='/out'>Log Out</a><table><tr><td>x</td></tr></table></body></html>";

const NOT_READY_PAGE: &str = "<html><body><div id=\"grid\">Loading...</div></body></html>";

/// Site chrome rendered before the product grid: a three-row navigation
/// table and a loading placeholder.
pub const LAYOUT_ONLY_PAGE: &str = "<html><body>\
     <table><tr><td>Home</td></tr><tr><td>News</td></tr><tr><td>Help</td></tr></table>\
     <div id=\"grid\">Loading...</div>\
     </body></html>";

const NOT_FOUND_PAGE: &str = "<html><body>Not found</body></html>";

const TEST_SITE: &str = r#"
    id = "test"
    name = "Test portal"

    [listing]
    base_url = "https://example.com/list.htm"

    [login]
    username_field = "username"
    password_field = "userpass"
    submit_field = "doLogin"
    success_markers = ["log out"]
    confirm_timeout_secs = 0
    poll_interval_ms = 1

    [readiness]
    min_rows = 2
    timeout_secs = 0
    poll_interval_ms = 1

    [run]
    page_delay_ms = 0
    navigation_retries = 2
    retry_delay_ms = 0
    empty_page_limit = 3
    page_ceiling = 50
"#;

pub fn test_site() -> SiteDefinition {
    SiteDefinition::from_toml(TEST_SITE).unwrap()
}

pub fn login_config() -> LoginConfig {
    test_site().login
}

/// A rendered listing page with a layout table and a product table holding
/// one row per name.
pub fn listing_page(names: &[&str]) -> String {
    let rows: String = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                "<tr><td>{name}</td><td><a href=\"/rating/{i}\">A+</a></td><td>5.{i}0%</td></tr>"
            )
        })
        .collect();
    format!(
        "<html><body>\
         <table><tr><td>Home</td><td><a href=\"/logout\">Log Out</a></td></tr></table>\
         <table>\
         <tr><th>Company</th><th>AM Best</th><th>Current Rate</th></tr>\
         {rows}\
         </table>\
         </body></html>"
    )
}

#[derive(Debug)]
pub struct ScriptedBrowser {
    pages: BTreeMap<String, String>,
    login_page: String,
    login_responses: VecDeque<String>,
    expiries: BTreeMap<String, u32>,
    render_failures: BTreeMap<String, u32>,
    render_delays: BTreeMap<String, (String, u32)>,
    pending_render: Option<(String, u32)>,
    source_reads: u32,
    logged_in: bool,
    current_url: String,
    current_html: String,
    submissions: Vec<FormSubmission>,
    visits: Vec<String>,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            login_page: LOGIN_PAGE.to_string(),
            login_responses: VecDeque::new(),
            expiries: BTreeMap::new(),
            render_failures: BTreeMap::new(),
            render_delays: BTreeMap::new(),
            pending_render: None,
            source_reads: 0,
            logged_in: false,
            current_url: "about:blank".to_string(),
            current_html: String::new(),
            submissions: Vec::new(),
            visits: Vec::new(),
        }
    }

    /// Starts with an authenticated session.
    pub fn logged_in(mut self) -> Self {
        self.logged_in = true;
        self
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn with_login_page(mut self, html: &str) -> Self {
        html.clone_into(&mut self.login_page);
        self
    }

    /// Queues the page shown after the next form submission. Without a
    /// queued response the login succeeds.
    pub fn with_login_response(mut self, html: &str) -> Self {
        self.login_responses.push_back(html.to_string());
        self
    }

    /// Logs the session out on the next `times` visits to `url`.
    pub fn with_session_expiry(mut self, url: &str, times: u32) -> Self {
        self.expiries.insert(url.to_string(), times);
        self
    }

    /// Renders a not-ready page on the next `times` visits to `url`.
    pub fn with_render_failures(mut self, url: &str, times: u32) -> Self {
        self.render_failures.insert(url.to_string(), times);
        self
    }

    /// Makes `url` report a not-ready page for its first `polls` reads
    /// after each visit.
    pub fn with_render_delay(mut self, url: &str, polls: u32) -> Self {
        self.render_delays
            .insert(url.to_string(), (NOT_READY_PAGE.to_string(), polls));
        self
    }

    /// Makes `url` show `html` for its first `polls` reads after each visit
    /// before the full page.
    pub fn with_early_render(mut self, url: &str, html: &str, polls: u32) -> Self {
        self.render_delays
            .insert(url.to_string(), (html.to_string(), polls));
        self
    }

    pub const fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn submissions(&self) -> &[FormSubmission] {
        &self.submissions
    }

    pub fn visits(&self) -> &[String] {
        &self.visits
    }

    /// Number of `page_source` reads so far.
    pub const fn source_reads(&self) -> u32 {
        self.source_reads
    }
}

fn take_one(counters: &mut BTreeMap<String, u32>, url: &str) -> bool {
    match counters.get_mut(url) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

impl Browser for ScriptedBrowser {
    fn backend(&self) -> &'static str {
        "scripted"
    }

    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.visits.push(url.to_string());
        url.clone_into(&mut self.current_url);
        self.pending_render = None;

        if take_one(&mut self.expiries, url) {
            self.logged_in = false;
        }

        self.current_html = if !self.logged_in {
            self.login_page.clone()
        } else if take_one(&mut self.render_failures, url) {
            NOT_READY_PAGE.to_string()
        } else {
            self.pending_render = self.render_delays.get(url).cloned();
            self.pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| NOT_FOUND_PAGE.to_string())
        };
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self.current_url.clone())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        self.source_reads += 1;
        if let Some((html, remaining)) = &mut self.pending_render
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(html.clone());
        }
        Ok(self.current_html.clone())
    }

    async fn submit_form(&mut self, form: &FormSubmission) -> Result<(), BrowserError> {
        self.submissions.push(form.clone());
        let response = self
            .login_responses
            .pop_front()
            .unwrap_or_else(|| MEMBERS_PAGE.to_string());
        self.logged_in = !is_login_page(&response, &login_config()) && !response.contains("g-recaptcha");
        self.current_html = response;
        Ok(())
    }

    async fn close(self) -> Result<(), BrowserError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_browser_serves_login_page_until_logged_in() {
        let mut browser = ScriptedBrowser::new().with_page(LOGIN_URL, MEMBERS_PAGE);
        browser.goto(LOGIN_URL).await.unwrap();
        assert!(browser.page_source().await.unwrap().contains("userpass"));

        let mut browser = browser.logged_in();
        browser.goto(LOGIN_URL).await.unwrap();
        assert_eq!(browser.page_source().await.unwrap(), MEMBERS_PAGE);
        assert_eq!(browser.visits().len(), 2);
        browser.close().await.unwrap();
    }
}
