//! Event sources and per-page field extraction.
//!
//! Every source is a configuration row ([`SourceConfig`]), compiled once into
//! a [`Source`] at startup. A source lists where its listing pages live, how
//! to find detail links on them, and which [`ExtractionStrategy`] variants to
//! try, in order, on each detail page:
//!
//! | Strategy | Module | Reads |
//! |----------|--------|-------|
//! | Structured data | [`structured`] | embedded JSON-LD `Article` / `Event` / `NewsArticle` |
//! | Markup | [`markup`] | CSS locators for title, description, date, image |
//!
//! The first strategy that yields a field bag with a title wins; later ones
//! are not consulted. Crawling itself lives in [`crawl`].
//!
//! # Configuration
//!
//! The built-in table is `config/sources.yaml`, embedded at compile time.
//! `--sources-config <file>` replaces it with a file of the same shape.

pub mod crawl;
pub mod markup;
pub mod structured;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ConfigError;
use crate::models::{Page, RawFieldBag};

const BUILTIN_SOURCES: &str = include_str!("../../config/sources.yaml");

fn default_max_items() -> usize {
    15
}

fn default_max_pages() -> usize {
    5
}

fn default_strategies() -> Vec<StrategyConfig> {
    vec![StrategyConfig::StructuredData]
}

/// One row of the source table, as written in YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub start_urls: Vec<String>,
    /// Blocks on a listing page that each hold one detail link.
    #[serde(default)]
    pub list_selector: Option<String>,
    /// The detail link inside a block (or anywhere, without `list_selector`).
    pub link_selector: String,
    #[serde(default)]
    pub next_page_selector: Option<String>,
    #[serde(default = "default_max_items")]
    pub max_items_per_url: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    StructuredData,
    Markup(MarkupConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkupConfig {
    #[serde(default)]
    pub title: Option<LocatorConfig>,
    #[serde(default)]
    pub description: Option<LocatorConfig>,
    #[serde(default)]
    pub date: Option<LocatorConfig>,
    #[serde(default)]
    pub image: Option<LocatorConfig>,
    /// Regexes; description fragments matching any of them are dropped.
    #[serde(default)]
    pub description_noise: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocatorConfig {
    pub selector: String,
    /// Read this attribute instead of the element text.
    #[serde(default)]
    pub attr: Option<String>,
    /// Only elements whose text contains this literal qualify.
    #[serde(default)]
    pub contains: Option<String>,
}

/// A compiled CSS locator for one field.
#[derive(Debug, Clone)]
pub struct FieldLocator {
    pub selector: Selector,
    pub attr: Option<String>,
    pub contains: Option<String>,
}

/// Field locators for the markup strategy of one source.
#[derive(Debug, Clone, Default)]
pub struct MarkupLocators {
    pub title: Option<FieldLocator>,
    pub description: Option<FieldLocator>,
    pub date: Option<FieldLocator>,
    pub image: Option<FieldLocator>,
    pub description_noise: Vec<Regex>,
}

/// How to turn a detail page into a [`RawFieldBag`].
#[derive(Debug, Clone)]
pub enum ExtractionStrategy {
    StructuredData,
    Markup(MarkupLocators),
}

impl ExtractionStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            ExtractionStrategy::StructuredData => "structured_data",
            ExtractionStrategy::Markup(_) => "markup",
        }
    }

    fn extract(&self, document: &Html, page_url: &Url) -> Option<RawFieldBag> {
        match self {
            ExtractionStrategy::StructuredData => structured::extract(document, page_url),
            ExtractionStrategy::Markup(locators) => markup::extract(document, page_url, locators),
        }
    }
}

/// A compiled, ready-to-crawl source.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub start_urls: Vec<Url>,
    pub list_selector: Option<Selector>,
    pub link_selector: Selector,
    pub next_page_selector: Option<Selector>,
    pub max_items_per_url: usize,
    pub max_pages: usize,
    pub strategies: Vec<ExtractionStrategy>,
}

fn compile_selector(source_name: &str, selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::Selector {
        source_name: source_name.to_string(),
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn compile_locator(
    source_name: &str,
    locator: &Option<LocatorConfig>,
) -> Result<Option<FieldLocator>, ConfigError> {
    locator
        .as_ref()
        .map(|l| {
            Ok(FieldLocator {
                selector: compile_selector(source_name, &l.selector)?,
                attr: l.attr.clone(),
                contains: l.contains.clone(),
            })
        })
        .transpose()
}

impl Source {
    pub fn compile(config: &SourceConfig) -> Result<Self, ConfigError> {
        let name = config.name.as_str();
        let start_urls = config
            .start_urls
            .iter()
            .map(|u| {
                Url::parse(u).map_err(|_| ConfigError::StartUrl {
                    source_name: name.to_string(),
                    url: u.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let strategies = config
            .strategies
            .iter()
            .map(|s| match s {
                StrategyConfig::StructuredData => Ok(ExtractionStrategy::StructuredData),
                StrategyConfig::Markup(m) => Ok(ExtractionStrategy::Markup(MarkupLocators {
                    title: compile_locator(name, &m.title)?,
                    description: compile_locator(name, &m.description)?,
                    date: compile_locator(name, &m.date)?,
                    image: compile_locator(name, &m.image)?,
                    description_noise: m
                        .description_noise
                        .iter()
                        .map(|p| {
                            Regex::new(p).map_err(|error| ConfigError::Pattern {
                                source_name: name.to_string(),
                                error,
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                })),
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            name: config.name.clone(),
            start_urls,
            list_selector: config
                .list_selector
                .as_deref()
                .map(|s| compile_selector(name, s))
                .transpose()?,
            link_selector: compile_selector(name, &config.link_selector)?,
            next_page_selector: config
                .next_page_selector
                .as_deref()
                .map(|s| compile_selector(name, s))
                .transpose()?,
            max_items_per_url: config.max_items_per_url,
            max_pages: config.max_pages.max(1),
            strategies,
        })
    }

    /// Run the strategies in order against one fetched detail page.
    ///
    /// Returns `None` when no strategy produced a bag with a title.
    pub fn extract(&self, page: &Page) -> Option<RawFieldBag> {
        let document = Html::parse_document(&page.body);
        let mut fallback: Option<RawFieldBag> = None;

        for strategy in &self.strategies {
            match strategy.extract(&document, &page.url) {
                Some(bag) if bag.title.is_some() => {
                    info!(
                        source = %self.name,
                        url = %page.url,
                        tier = strategy.label(),
                        "Extracted fields"
                    );
                    return Some(bag);
                }
                Some(bag) => {
                    debug!(source = %self.name, url = %page.url, tier = strategy.label(), "Tier produced fields but no title");
                    fallback.get_or_insert(bag);
                }
                None => {
                    debug!(source = %self.name, url = %page.url, tier = strategy.label(), "Tier found nothing");
                }
            }
        }

        if fallback.is_none() {
            warn!(source = %self.name, url = %page.url, "No extraction tier matched");
        }
        fallback
    }
}

/// Parse a YAML source table.
pub fn parse_source_table(yaml: &str) -> Result<Vec<SourceConfig>, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Load the source table from `path`, or the built-in one.
pub fn load_source_table(path: Option<&Path>) -> Result<Vec<SourceConfig>, ConfigError> {
    match path {
        Some(path) => {
            let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            let table = parse_source_table(&yaml)?;
            info!(path = %path.display(), count = table.len(), "Loaded source table");
            Ok(table)
        }
        None => parse_source_table(BUILTIN_SOURCES),
    }
}

/// Compile the sources to crawl.
///
/// With an empty `requested` list every source is used. Unknown names are
/// skipped with a warning, as are rows that fail to compile.
pub fn select_sources(table: &[SourceConfig], requested: &[String]) -> Vec<Source> {
    for name in requested {
        if !table.iter().any(|s| &s.name == name) {
            warn!(source = %name, "Unknown source name; skipping");
        }
    }

    table
        .iter()
        .filter(|s| requested.is_empty() || requested.contains(&s.name))
        .filter_map(|config| match Source::compile(config) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(source = %config.name, error = %e, "Invalid source configuration; skipping");
                None
            }
        })
        .collect()
}
