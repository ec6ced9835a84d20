//! Crawl driver: listing pages to detail pages to the event pipeline.
//!
//! For each start URL of a [`Source`] the driver walks listing pages
//! (following `next_page_selector`), gathers detail links until the per-URL
//! item budget runs out, then runs the page pipeline over every link with
//! bounded concurrency.

use futures::stream::{self, StreamExt};
use scraper::Html;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{Span, debug, info, info_span, instrument, warn};
use url::Url;

use super::Source;
use crate::error::FetchError;
use crate::models::Page;
use crate::processor::enricher::EnrichmentBackend;
use crate::processor::{EventPipeline, PageOutcome};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can retrieve a page.
pub trait PageFetcher {
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError>;
}

/// [`PageFetcher`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self), fields(%url))]
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().clone();
        let body = response.text().await?;
        debug!(bytes = body.len(), "Fetched page");
        Ok(Page {
            url: final_url,
            body,
        })
    }
}

/// Counters for one crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub links_discovered: usize,
    pub pages_fetched: usize,
    pub fetch_failures: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub not_found: usize,
}

impl CrawlReport {
    fn record(&mut self, outcome: PageOutcome) {
        match outcome {
            PageOutcome::Stored => self.stored += 1,
            PageOutcome::Duplicate => self.duplicates += 1,
            PageOutcome::Rejected => self.rejected += 1,
            PageOutcome::NotFound => self.not_found += 1,
        }
    }

    pub fn merge(&mut self, other: CrawlReport) {
        self.links_discovered += other.links_discovered;
        self.pages_fetched += other.pages_fetched;
        self.fetch_failures += other.fetch_failures;
        self.stored += other.stored;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.not_found += other.not_found;
    }
}

/// Detail links on one listing page, in document order.
///
/// Takes the remaining item budget and returns the links together with the
/// budget left afterwards. Links already in `seen` neither repeat nor consume
/// budget.
pub fn collect_links(
    document: &Html,
    page_url: &Url,
    source: &Source,
    seen: &mut HashSet<Url>,
    remaining: usize,
) -> (Vec<Url>, usize) {
    let hrefs: Vec<&str> = match &source.list_selector {
        Some(list) => document
            .select(list)
            .filter_map(|block| block.select(&source.link_selector).next())
            .filter_map(|a| a.value().attr("href"))
            .collect(),
        None => document
            .select(&source.link_selector)
            .filter_map(|a| a.value().attr("href"))
            .collect(),
    };

    let mut remaining = remaining;
    let mut links = Vec::new();
    for href in hrefs {
        if remaining == 0 {
            break;
        }
        let Ok(mut url) = page_url.join(href.trim()) else {
            debug!(%href, "Skipping unresolvable link");
            continue;
        };
        url.set_fragment(None);
        if seen.insert(url.clone()) {
            links.push(url);
            remaining -= 1;
        }
    }
    (links, remaining)
}

fn next_page(document: &Html, page_url: &Url, source: &Source) -> Option<Url> {
    let selector = source.next_page_selector.as_ref()?;
    let href = document.select(selector).find_map(|a| a.value().attr("href"))?;
    page_url.join(href.trim()).ok()
}

/// Crawls sources and feeds every detail page to one shared pipeline.
pub struct Crawler<'a, F, B> {
    fetcher: &'a F,
    pipeline: &'a EventPipeline<B>,
    concurrency: usize,
}

impl<'a, F: PageFetcher, B: EnrichmentBackend> Crawler<'a, F, B> {
    pub fn new(fetcher: &'a F, pipeline: &'a EventPipeline<B>, concurrency: usize) -> Self {
        Self {
            fetcher,
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    /// Crawl every source in turn and sum their reports.
    pub async fn crawl_all(&self, sources: &[Source]) -> CrawlReport {
        let mut total = CrawlReport::default();
        for source in sources {
            total.merge(self.crawl_source(source).await);
        }
        total
    }

    pub async fn crawl_source(&self, source: &Source) -> CrawlReport {
        let span = info_span!("crawler", source = %source.name);
        let started = std::time::Instant::now();
        let mut report = CrawlReport::default();
        let mut seen = HashSet::new();

        for start_url in &source.start_urls {
            let links = self.discover(source, start_url, &mut seen, &mut report, &span).await;
            report.links_discovered += links.len();

            let outcomes: Vec<Option<PageOutcome>> = stream::iter(links)
                .map(|url| self.process_link(source, url, &span))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    Some(outcome) => {
                        report.pages_fetched += 1;
                        report.record(outcome);
                    }
                    None => report.fetch_failures += 1,
                }
            }
        }

        span.in_scope(|| {
            info!(
                links = report.links_discovered,
                fetched = report.pages_fetched,
                failed = report.fetch_failures,
                stored = report.stored,
                duplicates = report.duplicates,
                rejected = report.rejected,
                not_found = report.not_found,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Source crawl finished"
            )
        });
        report
    }

    /// Walk the listing pages reachable from `start_url`.
    async fn discover(
        &self,
        source: &Source,
        start_url: &Url,
        seen: &mut HashSet<Url>,
        report: &mut CrawlReport,
        span: &Span,
    ) -> Vec<Url> {
        let mut links = Vec::new();
        let mut visited: HashSet<Url> = HashSet::new();
        let mut remaining = source.max_items_per_url;
        let mut next = Some(start_url.clone());

        while let Some(url) = next.take() {
            if remaining == 0 || visited.len() >= source.max_pages || !visited.insert(url.clone()) {
                break;
            }

            let page = match self.fetcher.fetch(&url).await {
                Ok(page) => page,
                Err(e) => {
                    span.in_scope(|| warn!(%url, error = %e, "Listing page fetch failed"));
                    report.fetch_failures += 1;
                    break;
                }
            };

            let document = Html::parse_document(&page.body);
            let (found, left) = collect_links(&document, &page.url, source, seen, remaining);
            remaining = left;
            next = next_page(&document, &page.url, source);
            drop(document);

            span.in_scope(|| {
                info!(%url, count = found.len(), remaining, "Collected detail links")
            });
            links.extend(found);
        }
        links
    }

    async fn process_link(&self, source: &Source, url: Url, span: &Span) -> Option<PageOutcome> {
        match self.fetcher.fetch(&url).await {
            Ok(page) => Some(self.pipeline.process_page(source, page).await),
            Err(e) => {
                span.in_scope(|| warn!(%url, error = %e, "Detail page fetch failed"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CanonicalEvent;
    use crate::outputs::selection::select_for_delivery;
    use crate::processor::builder::RecordBuilder;
    use crate::processor::enricher::tests::FakeBackend;
    use crate::processor::enricher::Enricher;
    use crate::scrapers::parse_source_table;
    use crate::storage::EventStore;
    use crate::utils::source_domain;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }
    }

    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.pages.get(url.as_str()) {
                Some(body) => Ok(Page {
                    url: url.clone(),
                    body: body.clone(),
                }),
                None => Err(FetchError::Status {
                    status: 404,
                    url: url.to_string(),
                }),
            }
        }
    }

    fn source(max_items: usize) -> Source {
        let yaml = format!(
            r#"
- name: ilportico
  start_urls: [https://www.ilportico.it/eventi/]
  list_selector: div.card
  link_selector: a[href]
  next_page_selector: a.next[href]
  max_items_per_url: {max_items}
  max_pages: 3
  strategies:
    - kind: structured_data
    - kind: markup
      title: {{ selector: h1 }}
"#
        );
        Source::compile(&parse_source_table(&yaml).unwrap()[0]).unwrap()
    }

    const LISTING_1: &str = r##"<html><body>
        <div class="card"><a href="/e/1">Uno</a></div>
        <div class="card"><a href="/e/2#top">Due</a></div>
        <div class="card"><a href="/e/1">Uno di nuovo</a></div>
        <a class="next" href="/eventi/?page=2">Avanti</a>
    </body></html>"##;

    const LISTING_2: &str = r#"<html><body>
        <div class="card"><a href="https://www.ilportico.it/e/3">Tre</a></div>
        <div class="card"><a href="/e/4">Quattro</a></div>
        <a class="next" href="/eventi/?page=2">Avanti</a>
    </body></html>"#;

    fn detail(title: &str) -> String {
        format!(
            r#"<script type="application/ld+json">{{"@type": "Event", "name": "{title}", "startDate": "2030-08-15"}}</script>"#
        )
    }

    async fn pipeline(dir: &std::path::Path) -> EventPipeline<FakeBackend> {
        let store = Arc::new(EventStore::open(dir.join("events.json")).await.unwrap());
        EventPipeline::new(RecordBuilder::default(), Enricher::disabled(), store)
    }

    #[test]
    fn test_collect_links_threads_budget() {
        let source = source(2);
        let url = Url::parse("https://www.ilportico.it/eventi/").unwrap();
        let document = Html::parse_document(LISTING_1);
        let mut seen = HashSet::new();

        let (links, left) = collect_links(&document, &url, &source, &mut seen, 2);
        assert_eq!(
            links.iter().map(Url::as_str).collect::<Vec<_>>(),
            ["https://www.ilportico.it/e/1", "https://www.ilportico.it/e/2"]
        );
        assert_eq!(left, 0);

        let (links, left) = collect_links(&document, &url, &source, &mut seen, 5);
        assert!(links.is_empty());
        assert_eq!(left, 5);
    }

    #[tokio::test]
    async fn test_crawl_follows_pagination_within_budget() {
        let fetcher = FakeFetcher::default()
            .with("https://www.ilportico.it/eventi/", LISTING_1)
            .with("https://www.ilportico.it/eventi/?page=2", LISTING_2)
            .with("https://www.ilportico.it/e/1", &detail("Sagra"))
            .with("https://www.ilportico.it/e/2", &detail("Concerto"))
            .with("https://www.ilportico.it/e/3", &detail("Mostra"));
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path()).await;

        let report = Crawler::new(&fetcher, &pipeline, 4)
            .crawl_source(&source(3))
            .await;

        assert_eq!(report.links_discovered, 3);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.stored, 3);
        assert_eq!(report.fetch_failures, 0);
        let requested = fetcher.requested.lock().unwrap();
        assert!(!requested.iter().any(|u| u.ends_with("/e/4")));
        drop(requested);

        let mut titles: Vec<String> = pipeline
            .store()
            .query(None)
            .await
            .into_iter()
            .map(|e| e.title)
            .collect();
        titles.sort();
        assert_eq!(titles, ["Concerto", "Mostra", "Sagra"]);
    }

    #[tokio::test]
    async fn test_self_linking_pagination_stops() {
        let fetcher = FakeFetcher::default()
            .with("https://www.ilportico.it/eventi/", LISTING_1)
            .with("https://www.ilportico.it/eventi/?page=2", LISTING_2);
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path()).await;

        let report = Crawler::new(&fetcher, &pipeline, 2)
            .crawl_source(&source(50))
            .await;

        assert_eq!(report.links_discovered, 4);
        assert_eq!(report.fetch_failures, 4);
        let listing_fetches = fetcher
            .requested
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.contains("/eventi/"))
            .count();
        assert_eq!(listing_fetches, 2);
    }

    #[tokio::test]
    async fn test_page_with_no_matching_tier_is_never_delivered() {
        let fetcher = FakeFetcher::default()
            .with(
                "https://www.ilportico.it/eventi/",
                r#"<div class="card"><a href="/e/9">Nove</a></div>"#,
            )
            .with(
                "https://www.ilportico.it/e/9",
                r#"<script type="application/ld+json">{ broken</script><div>niente titolo</div>"#,
            );
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path()).await;
        let other = CanonicalEvent::new(
            "Festa del limone".to_string(),
            String::new(),
            NaiveDate::from_ymd_opt(2030, 6, 1).and_then(|d| d.and_hms_opt(0, 0, 0)),
            None,
            "https://www.amalfinews.it/eventi/limone".to_string(),
        );
        assert_eq!(pipeline.store().save(vec![other]).await, 1);

        let report = Crawler::new(&fetcher, &pipeline, 1)
            .crawl_source(&source(15))
            .await;

        assert_eq!(report.pages_fetched, 1);
        assert_eq!(report.not_found, 1);
        assert_eq!(report.stored, 0);

        let stored = pipeline.store().query(None).await;
        assert_eq!(stored.len(), 1);
        let selected = select_for_delivery(stored, 2);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].title, "Festa del limone");
        assert!(
            selected
                .iter()
                .all(|e| source_domain(&e.source_url).as_deref() != Some("ilportico.it"))
        );
    }

    #[tokio::test]
    async fn test_listing_failure_is_counted_not_fatal() {
        let fetcher = FakeFetcher::default();
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path()).await;

        let report = Crawler::new(&fetcher, &pipeline, 1)
            .crawl_all(&[source(15), source(15)])
            .await;
        assert_eq!(report.fetch_failures, 2);
        assert_eq!(report.links_discovered, 0);
    }
}
