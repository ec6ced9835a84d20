//! Language enrichment of candidate records.
//!
//! The enricher attaches an English summary and a category to a freshly built
//! [`CanonicalEvent`]. The backend is optional: without one, or when a call
//! fails, the affected field keeps its default (no summary, `"Unknown"`
//! category) and the record still moves on to storage. The two sub-steps are
//! independent of each other.

use tracing::{debug, instrument, warn};

use crate::error::EnrichError;
use crate::models::{CanonicalEvent, UNKNOWN_CATEGORY};

/// Target length band for generated summaries, in characters.
pub const SUMMARY_MIN_CHARS: usize = 300;
pub const SUMMARY_MAX_CHARS: usize = 500;

/// The natural-language collaborator: summarization and classification.
pub trait EnrichmentBackend {
    /// Summarize `text` in English, aiming for `min_chars..=max_chars`.
    async fn summarize(
        &self,
        text: &str,
        min_chars: usize,
        max_chars: usize,
    ) -> Result<String, EnrichError>;

    /// Pick a category label for `text`.
    async fn classify(&self, text: &str) -> Result<String, EnrichError>;
}

#[derive(Debug)]
pub struct Enricher<B> {
    backend: Option<B>,
}

impl<B: EnrichmentBackend> Enricher<B> {
    pub fn new(backend: Option<B>) -> Self {
        if backend.is_none() {
            warn!("No enrichment backend configured; summaries and categories will be skipped");
        }
        Self { backend }
    }

    /// An enricher that never calls out.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    #[instrument(level = "info", skip_all, fields(id = %event.id))]
    pub async fn enrich(&self, mut event: CanonicalEvent) -> CanonicalEvent {
        let Some(backend) = &self.backend else {
            debug!("Enrichment backend unavailable; skipping");
            event.summary = None;
            event.category = UNKNOWN_CATEGORY.to_string();
            return event;
        };

        event.summary = if event.description.is_empty() {
            debug!("Empty description; no summary requested");
            None
        } else {
            match backend
                .summarize(&event.description, SUMMARY_MIN_CHARS, SUMMARY_MAX_CHARS)
                .await
            {
                Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
                Ok(_) => {
                    warn!(title = %event.title, "Backend returned an empty summary; falling back to description");
                    None
                }
                Err(e) => {
                    warn!(title = %event.title, error = %e, "Summary generation failed; falling back to description");
                    None
                }
            }
        };

        let classify_input = format!("{} {}", event.title, event.description);
        event.category = match backend.classify(classify_input.trim()).await {
            Ok(label) if !label.trim().is_empty() => label.trim().to_string(),
            Ok(_) => UNKNOWN_CATEGORY.to_string(),
            Err(e) => {
                warn!(title = %event.title, error = %e, "Classification failed; using Unknown");
                UNKNOWN_CATEGORY.to_string()
            }
        };

        debug!(
            has_summary = event.summary.is_some(),
            category = %event.category,
            "Enriched record"
        );
        event
    }
}
