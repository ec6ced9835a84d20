//! # Tourist Events
//!
//! Collects tourist events from local news and event sites, normalizes them
//! into one record shape, enriches them with an English summary and a
//! category, keeps them in a JSON document store, and serves them through a
//! Telegram bot.
//!
//! ## Usage
//!
//! ```sh
//! tourist_events crawl --sources salernotoday ilportico
//! TELEGRAM_BOT_TOKEN=... tourist_events serve
//! ```
//!
//! ## Architecture
//!
//! 1. **Crawling**: Walk each source's listing pages and collect detail links
//! 2. **Extraction**: Try structured data, then markup locators, on every page
//! 3. **Building**: Validate fields and resolve free-text dates
//! 4. **Enrichment**: Summarize and classify through an LLM (optional)
//! 5. **Storage**: Append new records to the event store, evict old ones
//! 6. **Delivery**: Answer `/events` with a fair per-source selection

use chrono::{Duration, Local};
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod error;
mod models;
mod outputs;
mod processor;
mod scrapers;
mod storage;
mod utils;

use api::{LlmConfig, OpenAiBackend};
use cli::{Cli, Command};
use outputs::telegram::{TelegramBot, TelegramClient};
use processor::EventPipeline;
use processor::builder::RecordBuilder;
use processor::dates::DateResolver;
use processor::enricher::Enricher;
use scrapers::crawl::{Crawler, HttpFetcher};
use storage::EventStore;

const LLM_TIMEOUT: StdDuration = StdDuration::from_secs(60);

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("tourist_events starting up");

    let args = Cli::parse();
    debug!(command = ?args.command, store_path = %args.store_path.display(), "Parsed CLI arguments");

    // The bot cannot exist without its token; fail before doing any work.
    let telegram_token = match (&args.command, args.telegram_token.as_deref()) {
        (Command::Crawl { .. }, _) => None,
        (_, Some(token)) if !token.trim().is_empty() => Some(token.to_string()),
        _ => {
            error!("TELEGRAM_BOT_TOKEN is not set; the bot cannot start");
            return Err("missing Telegram bot token (--telegram-token / TELEGRAM_BOT_TOKEN)".into());
        }
    };

    let store = Arc::new(EventStore::open(&args.store_path).await?);

    match &args.command {
        Command::Crawl { sources } => run_crawl(&args, sources, &store).await?,
        Command::Serve => {}
        Command::All { sources } => run_crawl(&args, sources, &store).await?,
    }

    if let Some(token) = telegram_token {
        let client = TelegramClient::new(&token)?;
        let bot = TelegramBot::new(client, Arc::clone(&store), args.per_source_cap);
        tokio::select! {
            _ = bot.run() => {}
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        elapsed_human = %format!("{:.2?}", elapsed),
        "tourist_events finished"
    );

    Ok(())
}

fn build_enricher(args: &Cli) -> Enricher<OpenAiBackend> {
    let Some(api_key) = args.openai_api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        warn!("OPENAI_API_KEY is not set; summaries and categories will be skipped");
        return Enricher::disabled();
    };
    let config = LlmConfig {
        api_key: api_key.to_string(),
        base_url: args.openai_base_url.clone(),
        model: args.openai_model.clone(),
        timeout: LLM_TIMEOUT,
    };
    match OpenAiBackend::new(config) {
        Ok(backend) => Enricher::new(Some(backend)),
        Err(e) => {
            warn!(error = %e, "Could not initialize enrichment backend; continuing without it");
            Enricher::new(None)
        }
    }
}

/// Crawl the requested sources once, then sweep records past retention.
#[instrument(level = "info", skip(args, store))]
async fn run_crawl(args: &Cli, requested: &[String], store: &Arc<EventStore>) -> Result<(), Box<dyn Error>> {
    let table = scrapers::load_source_table(args.sources_config.as_deref())?;
    let sources = scrapers::select_sources(&table, requested);
    if sources.is_empty() {
        warn!("No sources to crawl");
    }

    let pipeline = EventPipeline::new(
        RecordBuilder::new(DateResolver::new()),
        build_enricher(args),
        Arc::clone(store),
    );
    let fetcher = HttpFetcher::new()?;
    let report = Crawler::new(&fetcher, &pipeline, args.concurrency)
        .crawl_all(&sources)
        .await;
    info!(
        sources = sources.len(),
        links = report.links_discovered,
        fetched = report.pages_fetched,
        failed = report.fetch_failures,
        stored = report.stored,
        duplicates = report.duplicates,
        rejected = report.rejected,
        not_found = report.not_found,
        "Crawl finished"
    );

    let evicted = store
        .evict_older_than(
            Duration::days(i64::from(args.retention_days)),
            Local::now().naive_local(),
        )
        .await;
    info!(evicted, retention_days = args.retention_days, "Retention sweep finished");
    Ok(())
}
