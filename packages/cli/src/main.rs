#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the annuity rate scraper.

mod scrape;

use std::path::PathBuf;
use std::time::Duration;

use annuity_browser::BackendKind;
use annuity_export::OutputFormat;
use annuity_scraper::{Credentials, SiteDefinition};
use clap::Parser;

#[derive(Parser)]
#[command(
    name = "annuity_scrape",
    about = "Scrape annuity rate tables from the AnnuityRateWatch members portal"
)]
struct Cli {
    /// Site definition TOML (defaults to the built-in AnnuityRateWatch definition)
    #[arg(long)]
    site: Option<PathBuf>,

    /// Portal username
    #[arg(long, env = "ARW_USERNAME")]
    username: Option<String>,

    /// Portal password
    #[arg(long, env = "ARW_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// First listing page to scrape
    #[arg(long)]
    start_page: Option<u32>,

    /// Last listing page to scrape. When omitted, the end is discovered
    /// from the first page or by running past the data.
    #[arg(long)]
    max_page: Option<u32>,

    /// Delay between pages, in milliseconds
    #[arg(long)]
    page_delay_ms: Option<u64>,

    /// Extra load attempts for a page that fails to render
    #[arg(long)]
    retries: Option<u32>,

    /// Delay before each retry of a page that failed to render, in
    /// milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Seconds to wait for a page's data table to render
    #[arg(long)]
    readiness_timeout: Option<u64>,

    /// Seconds a single page load may take before the browser gives up
    #[arg(long, default_value_t = 60)]
    page_load_timeout: u64,

    /// Show the browser window instead of running headless
    #[arg(long)]
    headed: bool,

    /// WebDriver server URL
    #[arg(long, default_value = "http://localhost:9515")]
    webdriver_url: String,

    /// Browser backend (`webdriver` or `http`)
    #[arg(long, default_value = "webdriver")]
    backend: BackendKind,

    /// Comma-separated output formats (`json`, `csv`)
    #[arg(long, value_delimiter = ',', default_value = "json,csv")]
    format: Vec<OutputFormat>,

    /// Directory for output files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Output file name without extension (defaults to a timestamped name)
    #[arg(long)]
    output_name: Option<String>,

    /// Also persist records to this `DuckDB` file
    #[arg(long)]
    duckdb: Option<PathBuf>,

    /// `DuckDB` table name
    #[arg(long, default_value = "annuities")]
    table: String,

    /// Append to the `DuckDB` table instead of recreating it
    #[arg(long)]
    append: bool,

    /// Keep raw extracted rows (skip renames, grouping-row filter, dedupe)
    #[arg(long)]
    no_cleanup: bool,
}

impl Cli {
    fn load_site(&self) -> Result<SiteDefinition, Box<dyn std::error::Error>> {
        let mut site = match &self.site {
            Some(path) => SiteDefinition::load(path)?,
            None => SiteDefinition::builtin()?,
        };

        if let Some(start) = self.start_page {
            site.listing.start_page = start;
        }
        if self.max_page.is_some() {
            site.listing.max_page = self.max_page;
        }
        if let Some(delay) = self.page_delay_ms {
            site.run.page_delay_ms = delay;
        }
        if let Some(retries) = self.retries {
            site.run.navigation_retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            site.run.retry_delay_ms = delay;
        }
        if let Some(timeout) = self.readiness_timeout {
            site.readiness.timeout_secs = timeout;
        }

        site.validate()?;
        Ok(site)
    }

    fn credentials(&self) -> Result<Credentials, Box<dyn std::error::Error>> {
        let username = match &self.username {
            Some(username) => username.clone(),
            None => annuity_cli_utils::prompt_text("Username")?,
        };
        let password = match &self.password {
            Some(password) => password.clone(),
            None => annuity_cli_utils::prompt_password("Password")?,
        };
        Ok(Credentials::new(username, password)?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = annuity_cli_utils::init_logger();
    let cli = Cli::parse();

    let site = cli.load_site()?;
    log::info!("Using site definition '{}' ({})", site.id, site.name);
    let credentials = cli.credentials()?;

    let options = scrape::ScrapeOptions {
        backend: cli.backend,
        browser: annuity_browser::BrowserConfig::default()
            .with_webdriver_url(&cli.webdriver_url)
            .with_headless(!cli.headed)
            .with_page_load_timeout(Duration::from_secs(cli.page_load_timeout)),
        formats: cli.format,
        output_dir: cli.output_dir,
        output_name: cli.output_name,
        duckdb: cli.duckdb,
        table: cli.table,
        append: cli.append,
        cleanup: !cli.no_cleanup,
    };

    scrape::run(&site, credentials, &options, &multi).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_override_builtin_site() {
        let cli = Cli::try_parse_from([
            "annuity_scrape",
            "--max-page",
            "4",
            "--page-delay-ms",
            "250",
            "--retries",
            "5",
            "--retry-delay-ms",
            "750",
            "--readiness-timeout",
            "12",
        ])
        .unwrap();
        let site = cli.load_site().unwrap();
        assert_eq!(site.listing.max_page, Some(4));
        assert_eq!(site.run.page_delay_ms, 250);
        assert_eq!(site.run.navigation_retries, 5);
        assert_eq!(site.run.retry_delay_ms, 750);
        assert_eq!(site.readiness.timeout_secs, 12);
    }

    #[test]
    fn retry_delay_defaults_to_site_value() {
        let cli = Cli::try_parse_from(["annuity_scrape"]).unwrap();
        assert_eq!(cli.load_site().unwrap().run.retry_delay_ms, 2000);
    }
}
