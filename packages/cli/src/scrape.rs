//! One scraping run: browser session, pagination, cleanup, outputs.

use std::path::PathBuf;

use annuity_browser::http::HttpBrowser;
use annuity_browser::webdriver::WebDriverBrowser;
use annuity_browser::{BackendKind, BrowserConfig};
use annuity_cli_utils::{IndicatifProgress, MultiProgress};
use annuity_database::SaveOptions;
use annuity_export::OutputFormat;
use annuity_models::{PageStatus, Record, RunResult};
use annuity_scraper::cleanup::clean_records;
use annuity_scraper::{Browser, Credentials, PaginationController, SiteDefinition};

/// Everything about a run that does not come from the site definition.
pub struct ScrapeOptions {
    pub backend: BackendKind,
    pub browser: BrowserConfig,
    pub formats: Vec<OutputFormat>,
    pub output_dir: PathBuf,
    pub output_name: Option<String>,
    pub duckdb: Option<PathBuf>,
    pub table: String,
    pub append: bool,
    pub cleanup: bool,
}

/// Scrapes the site and writes every requested output.
///
/// Outputs are written even when the run was aborted, so nothing gathered
/// before the failure is lost; the abort is then reported as an error.
///
/// # Errors
///
/// Returns an error if the browser cannot be started, an output cannot be
/// written, or the run ended in `Aborted`.
pub async fn run(
    site: &SiteDefinition,
    credentials: Credentials,
    options: &ScrapeOptions,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let controller = PaginationController::from_site(site, credentials)?
        .with_progress(IndicatifProgress::pages_bar(multi, "Scraping pages"));

    log::info!("Starting {} backend", options.backend);
    let result = match options.backend {
        BackendKind::Webdriver => {
            let browser = WebDriverBrowser::connect(&options.browser).await?;
            run_session(browser, &controller).await
        }
        BackendKind::Http => {
            let browser = HttpBrowser::new(&options.browser)?;
            run_session(browser, &controller).await
        }
    };

    log_summary(&result);

    let records = if options.cleanup {
        clean_records(&result.records, &site.cleanup)
    } else {
        result.records.clone()
    };

    write_outputs(site, &records, options)?;

    if let Some(reason) = &result.abort_reason {
        return Err(format!(
            "run aborted after {} record(s): {reason}",
            result.records.len()
        )
        .into());
    }

    Ok(())
}

/// Runs the controller and closes the browser whatever the outcome.
async fn run_session<B: Browser>(
    mut browser: B,
    controller: &PaginationController,
) -> RunResult {
    let result = controller.run(&mut browser).await;
    let backend = browser.backend();
    if let Err(e) = browser.close().await {
        log::warn!("Failed to close {backend} browser: {e}");
    }
    result
}

fn log_summary(result: &RunResult) {
    let count = |status: PageStatus| result.pages.iter().filter(|p| p.status == status).count();

    log::info!(
        "Run ended {:?}: {} records from {} pages ({} without a data table, {} skipped)",
        result.state,
        result.records.len(),
        result.pages_with_records(),
        count(PageStatus::NoDataTable),
        count(PageStatus::Skipped),
    );

    for page in result
        .pages
        .iter()
        .filter(|p| p.status == PageStatus::Skipped)
    {
        log::warn!(
            "Page {} skipped after {} attempts",
            page.page_number,
            page.attempts
        );
    }
}

fn output_path(options: &ScrapeOptions, format: OutputFormat) -> PathBuf {
    match &options.output_name {
        Some(name) => options
            .output_dir
            .join(format!("{name}.{}", format.extension())),
        None => annuity_export::timestamped_path(&options.output_dir, format),
    }
}

fn write_outputs(
    site: &SiteDefinition,
    records: &[Record],
    options: &ScrapeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if records.is_empty() {
        log::warn!("No records gathered");
    }

    for format in &options.formats {
        let path = output_path(options, *format);
        match format {
            OutputFormat::Json => annuity_export::write_json(&path, records)?,
            OutputFormat::Csv => {
                annuity_export::write_csv(&path, records, &site.output.preferred_columns)?;
            }
        }
        println!("{format}: {}", path.display());
    }

    if let Some(db_path) = &options.duckdb {
        let conn = annuity_database::open(db_path)?;
        let mut save = SaveOptions {
            table: options.table.clone(),
            column_types: site.output.column_types.clone(),
            recreate: !options.append,
            ..SaveOptions::default()
        };
        if !site.cleanup.placeholders.is_empty() {
            save.placeholders.clone_from(&site.cleanup.placeholders);
        }
        let inserted = annuity_database::save_records(&conn, records, &save)?;
        println!("duckdb: {inserted} rows in {}.{}", db_path.display(), options.table);
    }

    Ok(())
}
