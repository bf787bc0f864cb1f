mod switches;

use pd_browser::Browser;
use pd_browser::BrowserReport;
use pd_core::BrowserError;
use pd_core::BrowserResult;
use std::process::ExitCode;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_logging();

    let options = match switches::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(error) => {
            eprintln!("pixeldust-prerender: {error}");
            eprintln!(
                "usage: pixeldust-prerender [--{}[=bool]] [--{}=N] [--{}=N] [--{}=UA] \
                 [--{}|--{}] [--{}=URL] URL...",
                switches::PRERENDER_HTTPS_ALLOWED,
                switches::PRERENDER_MAX_BYTES,
                switches::PRERENDER_MAX_CONCURRENCY,
                switches::USER_AGENT,
                switches::PRERENDER_CONTROL_GROUP,
                switches::PRERENDER_MATCH_COMPLETE_GROUP,
                switches::NAVIGATE_TO,
            );
            return ExitCode::from(2);
        }
    };

    match run(options).and_then(|report| render(&report)) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("pixeldust-prerender: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(options: switches::ProbeOptions) -> BrowserResult<BrowserReport> {
    let mut browser = Browser::new(options.config, options.mode)?;

    for url in options.urls {
        if browser.prerender(url.clone()).is_none() {
            warn!(%url, "prerender refused");
        }
    }
    let loaded = browser.run_pending_loads();
    let consumed = browser.pump_renderer_messages();
    browser.periodic_cleanup();
    info!(loaded, consumed, "hidden loads settled");

    if let Some(url) = options.navigate_to {
        browser.navigate(url);
    }
    Ok(browser.report())
}

fn render(report: &BrowserReport) -> BrowserResult<String> {
    serde_json::to_string_pretty(report).map_err(|error| {
        BrowserError::new(
            "probe.report.serialize_failed",
            format!("failed to serialize report: {error}"),
        )
    })
}
