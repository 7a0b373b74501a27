//! Pagination Controller.
//!
//! Drives Auth -> Navigator -> Locator -> Extractor over the page range and
//! accumulates a [`RunResult`]. Retry handling is a set of explicit
//! [`RunState`] transitions:
//!
//! * `ScrapingPage(n)` loads, locates and extracts page `n`.
//! * A session expiry moves to `RetryPage { n, Reauthenticate }`, which logs
//!   in again and reloads `n` once. A second expiry on the same page, or a
//!   failed re-login, ends in `Aborted`.
//! * A render timeout moves to `RetryPage { n, Navigation { attempt } }`
//!   until the retry budget is spent; the page is then skipped.
//! * After every page the controller either advances to `ScrapingPage(n+1)`
//!   or stops in `Completed`.
//!
//! The returned [`RunResult`] always holds every record gathered before
//! the run stopped.

use std::sync::Arc;

use annuity_models::{PageReport, PageStatus, Record, RetryKind, RunResult, RunState};

use crate::auth::Authenticator;
use crate::browser::Browser;
use crate::cleanup::content_signature;
use crate::extract::extract_records;
use crate::html_table::parse_tables;
use crate::locator::{KeywordTablePolicy, TableSelectionPolicy};
use crate::navigator::{Navigator, PageError, RenderedPage, detect_total_pages};
use crate::progress::{ProgressCallback, null_progress};
use crate::site::{ConfigError, Credentials, RunConfig, SiteDefinition};

/// Per-page bookkeeping, reset whenever the controller moves on.
#[derive(Debug, Clone, Copy)]
struct PageContext {
    page: u32,
    attempts: u32,
    reauthenticated: bool,
}

impl PageContext {
    const fn new(page: u32) -> Self {
        Self {
            page,
            attempts: 0,
            reauthenticated: false,
        }
    }
}

/// Range-level bookkeeping across pages.
#[derive(Debug, Default)]
struct RangeTracker {
    /// Upper bound, configured or discovered.
    bound: Option<u32>,
    /// Whether total-page discovery already ran.
    discovery_done: bool,
    /// Consecutive pages that yielded nothing.
    empty_streak: u32,
    /// Content signature of the last page that yielded records.
    last_signature: Option<String>,
}

/// Result of extracting a rendered page.
struct Extraction {
    status: PageStatus,
    records: Vec<Record>,
}

/// Scrapes a contiguous range of listing pages over one browser session.
pub struct PaginationController<P: TableSelectionPolicy = KeywordTablePolicy> {
    authenticator: Authenticator,
    navigator: Navigator,
    policy: P,
    run: RunConfig,
    start_page: u32,
    max_page: Option<u32>,
    progress: Arc<dyn ProgressCallback>,
}

impl PaginationController<KeywordTablePolicy> {
    /// Builds a controller from a site definition, using its page range and
    /// the keyword table policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the definition's readiness selector is
    /// invalid.
    pub fn from_site(site: &SiteDefinition, credentials: Credentials) -> Result<Self, ConfigError> {
        let login_url = site
            .login
            .url
            .clone()
            .unwrap_or_else(|| site.listing.page_url(site.listing.start_page));
        let authenticator = Authenticator::new(site.login.clone(), login_url, credentials);
        let navigator = Navigator::new(
            site.listing.clone(),
            site.readiness.clone(),
            site.login.clone(),
        )?;
        Ok(Self::new(
            authenticator,
            navigator,
            KeywordTablePolicy::from_config(&site.locator),
            site.run.clone(),
        ))
    }
}

impl<P: TableSelectionPolicy> PaginationController<P> {
    /// Creates a controller. The page range defaults to the navigator's
    /// listing settings.
    #[must_use]
    pub fn new(authenticator: Authenticator, navigator: Navigator, policy: P, run: RunConfig) -> Self {
        let start_page = navigator.listing().start_page.max(1);
        let max_page = navigator.listing().max_page;
        Self {
            authenticator,
            navigator,
            policy,
            run,
            start_page,
            max_page,
            progress: null_progress(),
        }
    }

    /// Overrides the page range. `max_page = None` makes the run
    /// open-ended.
    #[must_use]
    pub fn with_page_range(mut self, start_page: u32, max_page: Option<u32>) -> Self {
        self.start_page = start_page.max(1);
        self.max_page = max_page;
        self
    }

    /// Reports page progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Authenticates and scrapes the page range.
    ///
    /// Never fails: fatal problems end the run in [`RunState::Aborted`]
    /// with the records gathered so far.
    pub async fn run<B: Browser>(&self, browser: &mut B) -> RunResult {
        let mut result = RunResult::new();
        let mut range = RangeTracker {
            bound: self.max_page,
            ..RangeTracker::default()
        };
        let mut ctx = PageContext::new(self.start_page);

        if let Some(bound) = range.bound {
            self.progress
                .set_total(u64::from(bound.saturating_sub(self.start_page) + 1));
        }

        loop {
            let next = match result.state {
                RunState::NotStarted => {
                    log::info!(
                        "Scraping pages {} through {}",
                        self.start_page,
                        range
                            .bound
                            .map_or_else(|| "end of data".to_string(), |b| b.to_string())
                    );
                    RunState::Authenticating
                }
                RunState::Authenticating => match self.authenticator.authenticate(browser).await {
                    Ok(()) => RunState::ScrapingPage(self.start_page),
                    Err(e) => {
                        result.abort_reason = Some(format!("authentication failed: {e}"));
                        RunState::Aborted
                    }
                },
                RunState::ScrapingPage(page) => {
                    if ctx.page != page {
                        ctx = PageContext::new(page);
                    }
                    self.scrape_page(browser, &mut ctx, &mut range, &mut result)
                        .await
                }
                RunState::RetryPage {
                    page,
                    retry: RetryKind::Reauthenticate,
                } => {
                    log::info!("Re-authenticating before retrying page {page}");
                    ctx.reauthenticated = true;
                    match self.authenticator.authenticate(browser).await {
                        Ok(()) => RunState::ScrapingPage(page),
                        Err(e) => {
                            result.abort_reason =
                                Some(format!("re-authentication failed on page {page}: {e}"));
                            RunState::Aborted
                        }
                    }
                }
                RunState::RetryPage {
                    page,
                    retry: RetryKind::Navigation { attempt },
                } => {
                    log::info!(
                        "Retrying page {page} (retry {attempt}/{})",
                        self.run.navigation_retries
                    );
                    tokio::time::sleep(self.run.retry_delay()).await;
                    RunState::ScrapingPage(page)
                }
                RunState::Completed | RunState::Aborted => break,
            };
            result.state = next;
        }

        self.finish(&result);
        result
    }

    /// One load attempt of `ctx.page`; returns the next state.
    async fn scrape_page<B: Browser>(
        &self,
        browser: &mut B,
        ctx: &mut PageContext,
        range: &mut RangeTracker,
        result: &mut RunResult,
    ) -> RunState {
        let page = ctx.page;
        ctx.attempts += 1;
        self.progress.set_message(format!("page {page}"));

        match self.navigator.load_page(browser, page, &self.policy).await {
            Ok(rendered) => {
                if !range.discovery_done {
                    range.discovery_done = true;
                    self.discover_bound(&rendered, range);
                }

                let Extraction { status, records } = self.extract(&rendered, range);
                let record_count = records.len();
                log::info!("Page {page}: {status} ({record_count} record(s))");

                self.report(result, ctx, status, record_count);
                result.records.extend(records);

                if status == PageStatus::Repeated {
                    log::info!("Page {page} repeats page {}; end of data", page - 1);
                    return RunState::Completed;
                }
                if record_count == 0 {
                    range.empty_streak += 1;
                } else {
                    range.empty_streak = 0;
                }
                self.advance(page, range).await
            }
            Err(PageError::SessionExpired { .. }) if !ctx.reauthenticated => {
                log::warn!("Session expired on page {page}");
                RunState::RetryPage {
                    page,
                    retry: RetryKind::Reauthenticate,
                }
            }
            Err(e @ PageError::SessionExpired { .. }) => {
                log::error!("{e} again after re-authenticating");
                result.abort_reason = Some(format!(
                    "session expired again on page {page} after re-authentication"
                ));
                RunState::Aborted
            }
            Err(e @ PageError::Navigation { .. }) => {
                let retries_used = ctx.attempts - 1;
                if retries_used < self.run.navigation_retries {
                    log::warn!("{e}");
                    RunState::RetryPage {
                        page,
                        retry: RetryKind::Navigation {
                            attempt: retries_used + 1,
                        },
                    }
                } else {
                    log::warn!("{e}; skipping page {page} after {} attempt(s)", ctx.attempts);
                    self.report(result, ctx, PageStatus::Skipped, 0);
                    range.empty_streak += 1;
                    self.advance(page, range).await
                }
            }
        }
    }

    /// Sets the bound from the first rendered page when none is configured.
    fn discover_bound(&self, rendered: &RenderedPage, range: &mut RangeTracker) {
        if range.bound.is_some() {
            return;
        }
        let page_size = self.navigator.listing().page_size;
        if let Some(total) = detect_total_pages(&rendered.html, page_size) {
            let bound = total.min(self.run.page_ceiling).max(self.start_page);
            log::info!("Listing reports {total} page(s); scraping through page {bound}");
            range.bound = Some(bound);
            self.progress
                .set_total(u64::from(bound - self.start_page + 1));
        } else {
            log::info!(
                "Total page count not shown; scraping until {} empty page(s) or page {}",
                self.run.empty_page_limit,
                self.run.page_ceiling
            );
        }
    }

    fn extract(&self, rendered: &RenderedPage, range: &mut RangeTracker) -> Extraction {
        let tables = parse_tables(&rendered.html);
        let Some(table) = self.policy.select(&tables) else {
            log::debug!(
                "Page {}: no data table among {} table(s)",
                rendered.page_number,
                tables.len()
            );
            return Extraction {
                status: PageStatus::NoDataTable,
                records: Vec::new(),
            };
        };

        let records = extract_records(table, rendered.page_number);
        if range.bound.is_none() && !records.is_empty() {
            let signature = records
                .iter()
                .map(content_signature)
                .collect::<Vec<_>>()
                .join("\n");
            if range.last_signature.as_deref() == Some(signature.as_str()) {
                return Extraction {
                    status: PageStatus::Repeated,
                    records: Vec::new(),
                };
            }
            range.last_signature = Some(signature);
        }

        Extraction {
            status: PageStatus::Extracted,
            records,
        }
    }

    /// Decides what follows `page` and sleeps the polite delay if the run
    /// continues.
    async fn advance(&self, page: u32, range: &RangeTracker) -> RunState {
        let next = page.saturating_add(1);
        let stop = match range.bound {
            Some(bound) => next > bound,
            None if range.empty_streak >= self.run.empty_page_limit => {
                log::info!(
                    "{} consecutive empty page(s); end of data",
                    range.empty_streak
                );
                true
            }
            None => next > self.run.page_ceiling,
        };
        if stop || next == page {
            return RunState::Completed;
        }

        if !self.run.page_delay().is_zero() {
            tokio::time::sleep(self.run.page_delay()).await;
        }
        RunState::ScrapingPage(next)
    }

    fn report(&self, result: &mut RunResult, ctx: &PageContext, status: PageStatus, count: usize) {
        result.pages.push(PageReport {
            page_number: ctx.page,
            status,
            record_count: count,
            attempts: ctx.attempts,
        });
        self.progress.inc(1);
    }

    fn finish(&self, result: &RunResult) {
        let summary = format!(
            "{} record(s) from {} page(s)",
            result.records.len(),
            result.pages_with_records()
        );
        match &result.abort_reason {
            Some(reason) if result.is_aborted() => {
                log::error!("Run aborted: {reason} ({summary} kept)");
                self.progress.finish(format!("aborted: {summary}"));
            }
            _ => {
                log::info!("Run completed: {summary}");
                self.progress.finish(summary);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LAYOUT_ONLY_PAGE, LOGIN_PAGE, ScriptedBrowser, listing_page, test_site};

    fn controller(max_page: Option<u32>) -> PaginationController {
        controller_for(&test_site(), max_page)
    }

    fn controller_for(site: &SiteDefinition, max_page: Option<u32>) -> PaginationController {
        let credentials = Credentials::new("agent".to_string(), "secret".to_string()).unwrap();
        PaginationController::from_site(site, credentials)
            .unwrap()
            .with_page_range(1, max_page)
    }

    fn page_url(page: u32) -> String {
        test_site().listing.page_url(page)
    }

    fn browser_with_pages(pages: u32) -> ScriptedBrowser {
        (1..=pages).fold(ScriptedBrowser::new(), |browser, page| {
            browser.with_page(
                &page_url(page),
                &listing_page(&[&format!("Acme {page}A"), &format!("Beta {page}B")]),
            )
        })
    }

    #[tokio::test]
    async fn scrapes_every_page_in_range() {
        let mut browser = browser_with_pages(3);
        let result = controller(Some(3)).run(&mut browser).await;

        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.records.len(), 6);
        assert_eq!(result.pages.len(), 3);
        for (i, record) in result.records.iter().enumerate() {
            let expected_page = u32::try_from(i / 2).unwrap() + 1;
            assert_eq!(record.page_number(), expected_page);
            assert_eq!(record.row_index(), u32::try_from(i % 2).unwrap());
        }
    }

    #[tokio::test]
    async fn session_expiry_reauthenticates_and_keeps_page_once() {
        let mut browser = browser_with_pages(10).with_session_expiry(&page_url(10), 1);
        let result = controller(Some(10)).run(&mut browser).await;

        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.page_records(10).count(), 2);
        assert_eq!(result.records.len(), 20);
        assert_eq!(browser.submissions().len(), 2);
        let page_ten = result.pages.iter().find(|p| p.page_number == 10).unwrap();
        assert_eq!(page_ten.attempts, 2);
        assert_eq!(page_ten.status, PageStatus::Extracted);
    }

    #[tokio::test]
    async fn failed_reauthentication_aborts_with_partial_results() {
        let mut browser = browser_with_pages(10)
            .with_session_expiry(&page_url(5), 1)
            .with_login_response(crate::testing::MEMBERS_PAGE)
            .with_login_response(LOGIN_PAGE);
        let result = controller(Some(10)).run(&mut browser).await;

        assert_eq!(result.state, RunState::Aborted);
        assert!(result.is_aborted());
        assert!(result.abort_reason.is_some());
        assert_eq!(result.records.len(), 8);
        assert!(result.records.iter().all(|r| (1..=4).contains(&r.page_number())));
        assert_eq!(result.page_records(5).count(), 0);
    }

    #[tokio::test]
    async fn second_expiry_on_same_page_aborts() {
        let mut browser = browser_with_pages(4).with_session_expiry(&page_url(3), 2);
        let result = controller(Some(4)).run(&mut browser).await;

        assert!(result.is_aborted());
        assert_eq!(result.records.len(), 4);
    }

    #[tokio::test]
    async fn initial_login_failure_aborts_with_no_records() {
        let mut browser = browser_with_pages(2).with_login_response(LOGIN_PAGE);
        let result = controller(Some(2)).run(&mut browser).await;

        assert!(result.is_aborted());
        assert!(result.records.is_empty());
        assert!(result.pages.is_empty());
    }

    #[tokio::test]
    async fn navigation_timeout_retries_then_succeeds() {
        let mut browser = browser_with_pages(2).with_render_failures(&page_url(2), 2);
        let result = controller(Some(2)).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.page_records(2).count(), 2);
        assert_eq!(result.pages[1].attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_navigation_retries_skip_the_page() {
        let mut browser = browser_with_pages(3).with_render_failures(&page_url(2), 10);
        let result = controller(Some(3)).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.page_records(2).count(), 0);
        assert_eq!(result.page_records(3).count(), 2);
        assert_eq!(result.pages[1].status, PageStatus::Skipped);
        assert_eq!(result.pages[1].attempts, 3);
    }

    #[tokio::test]
    async fn page_without_data_table_is_retried_then_skipped() {
        let mut browser = browser_with_pages(3).with_page(&page_url(2), LAYOUT_ONLY_PAGE);
        let result = controller(Some(3)).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.pages[1].status, PageStatus::Skipped);
        assert_eq!(result.pages[1].attempts, 3);
        assert_eq!(result.page_records(3).count(), 2);
    }

    #[tokio::test]
    async fn empty_page_inside_range_continues() {
        let mut site = test_site();
        site.readiness.require_data_table = false;
        let mut browser = browser_with_pages(3).with_page(&page_url(2), LAYOUT_ONLY_PAGE);
        let result = controller_for(&site, Some(3)).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.pages[1].status, PageStatus::NoDataTable);
        assert_eq!(result.pages[1].attempts, 1);
        assert_eq!(result.page_records(3).count(), 2);
    }

    #[tokio::test]
    async fn layout_render_before_data_is_not_an_empty_page() {
        let mut site = test_site();
        site.readiness.timeout_secs = 5;
        let mut browser =
            browser_with_pages(2).with_early_render(&page_url(2), LAYOUT_ONLY_PAGE, 2);
        let result = controller_for(&site, Some(2)).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.pages[1].status, PageStatus::Extracted);
        assert_eq!(result.pages[1].attempts, 1);
        assert_eq!(result.page_records(2).count(), 2);
    }

    #[tokio::test]
    async fn open_ended_run_stops_on_repeated_page() {
        let mut browser = browser_with_pages(3).with_page(
            &page_url(4),
            &listing_page(&["Acme 3A", "Beta 3B"]),
        );
        let result = controller(None).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.records.len(), 6);
        assert_eq!(result.pages.last().unwrap().status, PageStatus::Repeated);
    }

    #[tokio::test]
    async fn open_ended_run_stops_after_empty_pages() {
        let mut browser = (3..=8).fold(browser_with_pages(2), |b, page| {
            b.with_page(&page_url(page), LAYOUT_ONLY_PAGE)
        });
        let result = controller(None).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.records.len(), 4);
        assert_eq!(result.pages.len(), 5);
    }

    #[tokio::test]
    async fn open_ended_run_stops_at_page_ceiling() {
        let mut site = test_site();
        site.run.page_ceiling = 3;
        let mut browser = browser_with_pages(6);
        let result = controller_for(&site, None).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.pages.len(), 3);
        assert_eq!(result.records.len(), 6);
        assert!(!browser.visits().contains(&page_url(4)));
    }

    #[tokio::test]
    async fn reported_total_is_capped_by_page_ceiling() {
        let mut site = test_site();
        site.run.page_ceiling = 2;
        let mut browser = browser_with_pages(5).with_page(
            &page_url(1),
            &format!(
                "<div>Page 1 of 5</div>{}",
                listing_page(&["Acme 1A", "Beta 1B"])
            ),
        );
        let result = controller_for(&site, None).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.pages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_page_delay_between_pages() {
        let mut site = test_site();
        site.run.page_delay_ms = 1500;
        let mut browser = browser_with_pages(3);
        let started = tokio::time::Instant::now();
        let result = controller_for(&site, Some(3)).run(&mut browser).await;

        assert!(result.is_completed());
        let elapsed = started.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(3000), "{elapsed:?}");
        assert!(elapsed < std::time::Duration::from_millis(4500), "{elapsed:?}");
    }

    #[tokio::test]
    async fn open_ended_run_uses_reported_total() {
        let mut browser = browser_with_pages(5).with_page(
            &page_url(1),
            &format!(
                "<div>Page 1 of 2</div>{}",
                listing_page(&["Acme 1A", "Beta 1B"])
            ),
        );
        let result = controller(None).run(&mut browser).await;

        assert!(result.is_completed());
        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.records.len(), 4);
    }
}
