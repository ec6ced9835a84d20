//! Command-line interface definitions for Tourist Events.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Every global option can also be provided through an environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::outputs::selection::DEFAULT_PER_SOURCE_CAP;

/// Command-line arguments for the Tourist Events application.
///
/// # Examples
///
/// ```sh
/// # Crawl every configured source once
/// tourist_events crawl
///
/// # Crawl two sources into a custom store
/// tourist_events --store-path /var/lib/events.json crawl --sources salernotoday ilportico
///
/// # Crawl, then serve the bot
/// TELEGRAM_BOT_TOKEN=... OPENAI_API_KEY=... tourist_events all
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path of the JSON event store
    #[arg(long, env = "EVENTS_STORE_PATH", default_value = "data/events.json", global = true)]
    pub store_path: PathBuf,

    /// YAML source table replacing the built-in one
    #[arg(long, env = "SOURCES_CONFIG", global = true)]
    pub sources_config: Option<PathBuf>,

    /// Events dated more than this many days ago are evicted after a crawl
    #[arg(long, env = "RETENTION_DAYS", default_value_t = 30, global = true)]
    pub retention_days: u32,

    /// Maximum events per source in one /events answer
    #[arg(long, env = "PER_SOURCE_CAP", default_value_t = DEFAULT_PER_SOURCE_CAP, global = true)]
    pub per_source_cap: usize,

    /// Detail pages processed concurrently per source
    #[arg(long, env = "CRAWL_CONCURRENCY", default_value_t = 8, global = true)]
    pub concurrency: usize,

    /// API key for the OpenAI-compatible enrichment backend (enrichment is skipped without it)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub openai_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1", global = true)]
    pub openai_base_url: String,

    /// Model used for summaries and classification
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-3.5-turbo", global = true)]
    pub openai_model: String,

    /// Telegram bot token (required by `serve` and `all`)
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true, global = true)]
    pub telegram_token: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Crawl sources once, store new events, and evict old ones
    Crawl {
        /// Restrict the crawl to these source names
        #[arg(long, num_args = 1..)]
        sources: Vec<String>,
    },
    /// Run the Telegram bot
    Serve,
    /// Crawl once, then run the Telegram bot
    All {
        /// Restrict the crawl to these source names
        #[arg(long, num_args = 1..)]
        sources: Vec<String>,
    },
}
