//! Durable, deduplicated event storage backed by a single JSON document.
//!
//! The whole collection is the unit of persistence: every operation loads the
//! full document, mutating operations rewrite it in full. A per-instance async
//! mutex serializes all of them, so concurrent pipelines saving into the same
//! store can never interleave a load with another writer's rewrite. Rewrites
//! go to a sibling temporary file that is renamed over the document, so a
//! reader never sees a half-written file.
//!
//! # Document Layout
//!
//! ```text
//! [
//!   { "id": "...", "title": "...", "description": "...", "date": "2025-06-21T18:30:00",
//!     "image_url": null, "source_url": "https://...", "event_type": "Concert",
//!     "summary_en": null, "created_at": "2025-06-01T09:12:44.123" },
//!   ...
//! ]
//! ```
//!
//! A missing or unreadable file, or a top-level value that is not an array, is
//! treated as an empty collection and logged. Individual elements that do not
//! deserialize are skipped when reading but preserved byte-for-byte (as JSON
//! values) across rewrites.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{Span, debug, error, info, info_span, instrument, warn};

use crate::error::StoreError;
use crate::models::{CanonicalEvent, EventFilter, parse_stored_date};

/// File-backed event collection.
#[derive(Debug)]
pub struct EventStore {
    path: PathBuf,
    lock: Mutex<()>,
    span: Span,
}

impl EventStore {
    /// Open (and if needed create) the store at `path`.
    ///
    /// Fails when the parent directory cannot be created or the initial empty
    /// document cannot be written; nothing else the store does is fatal.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let span = info_span!("event_store", path = %path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        if fs::metadata(&path).await.is_err() {
            span.in_scope(|| warn!("Storage file not found; creating an empty one"));
            fs::write(&path, b"[]")
                .await
                .map_err(|source| StoreError::InitFile {
                    path: path.display().to_string(),
                    source,
                })?;
        }

        span.in_scope(|| info!("EventStore initialized"));
        Ok(Self {
            path,
            lock: Mutex::new(()),
            span,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert every event whose id is not stored yet. Returns how many were added.
    ///
    /// Nothing is written when no event is new.
    #[instrument(parent = &self.span, level = "info", skip_all, fields(candidates = events.len()))]
    pub async fn save(&self, events: Vec<CanonicalEvent>) -> usize {
        if events.is_empty() {
            return 0;
        }

        let _guard = self.lock.lock().await;
        let mut elements = self.load_elements().await;
        let mut known: HashSet<String> = elements
            .iter()
            .filter_map(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();

        let mut added = 0usize;
        for event in events {
            if known.contains(&event.id) {
                debug!(id = %event.id, "Event already stored; skipping");
                continue;
            }
            match serde_json::to_value(&event) {
                Ok(value) => {
                    known.insert(event.id.clone());
                    elements.push(value);
                    added += 1;
                }
                Err(e) => error!(id = %event.id, error = %e, "Cannot serialize event; skipping"),
            }
        }

        if added > 0 {
            if let Err(e) = self.write_elements(&elements).await {
                error!(error = %e, lost = added, "Failed to persist new events");
                return 0;
            }
            info!(added, total = elements.len(), "Saved new events");
        } else {
            info!("No new events to save");
        }
        added
    }

    /// All stored events satisfying `filter` (every event when `None`).
    #[instrument(parent = &self.span, level = "info", skip_all)]
    pub async fn query(&self, filter: Option<&EventFilter>) -> Vec<CanonicalEvent> {
        let events = self.load_events().await;
        match filter {
            Some(filter) => {
                let matched: Vec<CanonicalEvent> =
                    events.into_iter().filter(|e| filter.matches(e)).collect();
                info!(?filter, count = matched.len(), "Queried events with filter");
                matched
            }
            None => {
                info!(count = events.len(), "Queried all events");
                events
            }
        }
    }

    #[instrument(parent = &self.span, level = "debug", skip(self))]
    pub async fn get_by_id(&self, id: &str) -> Option<CanonicalEvent> {
        let found = self.load_events().await.into_iter().find(|e| e.id == id);
        if found.is_none() {
            debug!("Event not found");
        }
        found
    }

    /// Remove events dated before `now - max_age` (calendar-day comparison).
    ///
    /// Undated events are never removed. Returns the number removed.
    #[instrument(parent = &self.span, level = "info", skip(self), fields(max_age_days = max_age.num_days()))]
    pub async fn evict_older_than(&self, max_age: Duration, now: NaiveDateTime) -> usize {
        let cutoff = (now - max_age).date();

        let _guard = self.lock.lock().await;
        let elements = self.load_elements().await;
        let before = elements.len();
        let kept: Vec<Value> = elements
            .into_iter()
            .filter(|v| match element_day(v) {
                Some(day) if day < cutoff => {
                    debug!(id = ?v.get("id"), %day, "Evicting old event");
                    false
                }
                _ => true,
            })
            .collect();

        let removed = before - kept.len();
        if removed > 0 {
            if let Err(e) = self.write_elements(&kept).await {
                error!(error = %e, "Failed to persist eviction; storage left unchanged");
                return 0;
            }
            info!(removed, %cutoff, "Removed old events");
        } else {
            info!(%cutoff, "No old events to remove");
        }
        removed
    }

    /// Typed view of the document, skipping elements that do not deserialize.
    async fn load_events(&self) -> Vec<CanonicalEvent> {
        let elements = {
            let _guard = self.lock.lock().await;
            self.load_elements().await
        };
        elements
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<CanonicalEvent>(v) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed stored event");
                    None
                }
            })
            .collect()
    }

    /// Raw document elements. Caller must hold the lock.
    async fn load_elements(&self) -> Vec<Value> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                error!(error = %e, "Cannot read storage file; treating as empty");
                return Vec::new();
            }
        };
        if content.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(elements)) => elements,
            Ok(other) => {
                error!(
                    found = json_kind(&other),
                    "Storage file is not a JSON array; treating as empty"
                );
                Vec::new()
            }
            Err(e) => {
                error!(error = %e, "Storage file is not valid JSON; treating as empty");
                Vec::new()
            }
        }
    }

    /// Replace the document with `elements`. Caller must hold the lock.
    ///
    /// On error the previous document is left in place.
    async fn write_elements(&self, elements: &[Value]) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(elements).map_err(std::io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, json).await {
            error!(path = %tmp.display(), error = %e, "Failed writing temporary storage file");
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            error!(error = %e, "Failed replacing storage file");
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}

fn element_day(value: &Value) -> Option<NaiveDate> {
    parse_stored_date(value.get("date")?.as_str()?).map(|d| d.date())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
