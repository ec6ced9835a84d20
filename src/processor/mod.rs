//! The per-page pipeline: extract, build, enrich, save.
//!
//! One [`EventPipeline`] is shared by every concurrently processed page of a
//! crawl run. Each stage either hands a value on or ends the page with a
//! [`PageOutcome`]; no stage failure escapes as an error.

pub mod builder;
pub mod dates;
pub mod enricher;

use chrono::Local;
use std::sync::Arc;
use tracing::{Span, debug, info, info_span, instrument};

use crate::models::Page;
use crate::scrapers::Source;
use crate::storage::EventStore;
use builder::RecordBuilder;
use enricher::{Enricher, EnrichmentBackend};

/// What happened to one detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// A new record was persisted.
    Stored,
    /// The record's id was already present.
    Duplicate,
    /// Fields were found but the record builder refused them.
    Rejected,
    /// No extraction tier produced anything.
    NotFound,
}

pub struct EventPipeline<B> {
    builder: RecordBuilder,
    enricher: Enricher<B>,
    store: Arc<EventStore>,
    span: Span,
}

impl<B: EnrichmentBackend> EventPipeline<B> {
    pub fn new(builder: RecordBuilder, enricher: Enricher<B>, store: Arc<EventStore>) -> Self {
        let span = info_span!("pipeline", store = %store.path().display());
        Self {
            builder,
            enricher,
            store,
            span,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    #[instrument(parent = &self.span, level = "info", skip_all, fields(source = %source.name, url = %page.url))]
    pub async fn process_page(&self, source: &Source, page: Page) -> PageOutcome {
        let Some(bag) = source.extract(&page) else {
            return PageOutcome::NotFound;
        };

        let Some(event) = self.builder.build(bag, Local::now().naive_local()) else {
            return PageOutcome::Rejected;
        };

        let event = self.enricher.enrich(event).await;
        let id = event.id.clone();
        match self.store.save(vec![event]).await {
            0 => {
                debug!(%id, "Record not added (already stored or not persisted)");
                PageOutcome::Duplicate
            }
            _ => {
                info!(%id, "Stored new event");
                PageOutcome::Stored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::{parse_source_table, Source};
    use enricher::tests::FakeBackend;
    use tempfile::tempdir;
    use url::Url;

    fn source() -> Source {
        let yaml = r#"
- name: salernotoday
  start_urls: [https://www.salernotoday.it/eventi/]
  link_selector: a
  strategies:
    - kind: structured_data
    - kind: markup
      title: { selector: h1 }
      description: { selector: article p }
      date: { selector: time, attr: datetime }
"#;
        Source::compile(&parse_source_table(yaml).unwrap()[0]).unwrap()
    }

    fn page(body: &str) -> Page {
        Page {
            url: Url::parse("https://www.salernotoday.it/eventi/concerto.html").unwrap(),
            body: body.to_string(),
        }
    }

    async fn pipeline(
        dir: &std::path::Path,
        backend: Option<FakeBackend>,
    ) -> EventPipeline<FakeBackend> {
        let store = Arc::new(EventStore::open(dir.join("events.json")).await.unwrap());
        EventPipeline::new(RecordBuilder::default(), Enricher::new(backend), store)
    }

    #[tokio::test]
    async fn test_page_is_extracted_enriched_and_stored() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Some(FakeBackend::new(Some("A concert."), Some("Concert")))).await;
        let html = r#"<h1>Concerto all'alba</h1><article><p>Musica sul mare.</p></article>
                      <time datetime="2030-07-14T05:30:00">14 luglio</time>"#;

        let outcome = pipeline.process_page(&source(), page(html)).await;
        assert_eq!(outcome, PageOutcome::Stored);

        let stored = pipeline.store().query(None).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Concerto all'alba");
        assert_eq!(stored[0].category, "Concert");
        assert_eq!(stored[0].summary.as_deref(), Some("A concert."));
        assert_eq!(
            stored[0].source_url,
            "https://www.salernotoday.it/eventi/concerto.html"
        );
    }

    #[tokio::test]
    async fn test_page_without_fields_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), None).await;
        let outcome = pipeline
            .process_page(&source(), page("<html><body><div>404</div></body></html>"))
            .await;
        assert_eq!(outcome, PageOutcome::NotFound);
        assert!(pipeline.store().query(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_titleless_page_is_rejected() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), None).await;
        let outcome = pipeline
            .process_page(&source(), page("<article><p>Solo descrizione.</p></article>"))
            .await;
        assert_eq!(outcome, PageOutcome::Rejected);
        assert!(pipeline.store().query(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_failure_still_stores() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Some(FakeBackend::new(None, None))).await;
        let outcome = pipeline
            .process_page(&source(), page("<h1>Mercatino</h1>"))
            .await;
        assert_eq!(outcome, PageOutcome::Stored);
        let stored = pipeline.store().query(None).await;
        assert_eq!(stored[0].category, "Unknown");
        assert!(stored[0].summary.is_none());
        assert!(stored[0].date.is_none());
    }
}
