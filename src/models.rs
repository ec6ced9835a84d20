//! Data models for scraped listings and stored events.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Page`]: A fetched page as handed over by the fetch collaborator
//! - [`RawFieldBag`]: Loosely-typed fields pulled out of one page
//! - [`CanonicalEvent`]: The validated, enriched unit of storage
//! - [`EventFilter`]: Conjunctive query predicates over stored events
//!
//! [`CanonicalEvent`] serializes to the persisted document layout directly, so
//! the field renames below are the on-disk key names.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Category label used whenever classification failed or was skipped.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// A fetched page: the final URL it was served from and its raw body.
#[derive(Debug, Clone)]
pub struct Page {
    /// Absolute URL of the page (after redirects).
    pub url: url::Url,
    /// Raw HTML body.
    pub body: String,
}

/// Fields extracted from a single page before validation.
///
/// Every field is either a trimmed, non-empty string or `None`; extractors
/// never store empty strings here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFieldBag {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date_text: Option<String>,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
}

impl RawFieldBag {
    /// True when no field carries any content.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.date_text.is_none()
            && self.image_url.is_none()
    }
}

/// A validated event as persisted by the store.
///
/// Records are immutable once built: the store only inserts and deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Opaque identity, assigned by the record builder. Sole dedup key.
    pub id: String,
    /// Event headline; never empty.
    pub title: String,
    /// Original-language description; may be empty.
    #[serde(default, deserialize_with = "string_or_null")]
    pub description: String,
    /// Resolved event time, naive local semantics.
    #[serde(default, deserialize_with = "date_or_undated")]
    pub date: Option<NaiveDateTime>,
    /// Absolute URL of the event image.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Absolute URL of the page the event was found on; never empty.
    pub source_url: String,
    /// Classification label, [`UNKNOWN_CATEGORY`] when unknown.
    #[serde(
        rename = "event_type",
        default = "unknown_category",
        deserialize_with = "category_or_unknown"
    )]
    pub category: String,
    /// English summary produced by the enrichment backend.
    #[serde(rename = "summary_en", default)]
    pub summary: Option<String>,
    /// Time the record was built.
    pub created_at: NaiveDateTime,
}

impl CanonicalEvent {
    /// Create a record with a fresh id and creation timestamp.
    ///
    /// Enrichment fields start out absent / [`UNKNOWN_CATEGORY`].
    pub fn new(
        title: String,
        description: String,
        date: Option<NaiveDateTime>,
        image_url: Option<String>,
        source_url: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            description,
            date,
            image_url,
            source_url,
            category: UNKNOWN_CATEGORY.to_string(),
            summary: None,
            created_at: Local::now().naive_local(),
        }
    }

    /// Calendar day of the event, if it has a date.
    pub fn day(&self) -> Option<NaiveDate> {
        self.date.map(|d| d.date())
    }
}

fn unknown_category() -> String {
    UNKNOWN_CATEGORY.to_string()
}

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn category_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(unknown_category))
}

/// Parse a stored `date` value.
///
/// Accepts a naive ISO date-time, an ISO date-time with offset (its wall
/// clock is kept), or a bare date (midnight).
pub fn parse_stored_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    raw.parse::<NaiveDateTime>()
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.naive_local()))
        .or_else(|| {
            raw.parse::<NaiveDate>()
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
}

/// An unreadable `date` makes the record undated rather than unreadable.
fn date_or_undated<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => {
            let parsed = parse_stored_date(&raw);
            if parsed.is_none() {
                warn!(date = %raw, "Unreadable stored date; treating event as undated");
            }
            Ok(parsed)
        }
        Some(other) => {
            warn!(date = %other, "Stored date is not a string; treating event as undated");
            Ok(None)
        }
    }
}

/// Conjunctive filter for [`crate::storage::EventStore::query`].
///
/// Date bounds are inclusive and compare calendar days. A record without a
/// date never satisfies a date bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub category: Option<String>,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

impl EventFilter {
    /// Events happening on `day` or later.
    pub fn upcoming_from(day: NaiveDate) -> Self {
        Self {
            min_date: Some(day),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        if let Some(category) = &self.category {
            if &event.category != category {
                return false;
            }
        }
        if self.min_date.is_some() || self.max_date.is_some() {
            let Some(day) = event.day() else {
                return false;
            };
            if self.min_date.is_some_and(|min| day < min) {
                return false;
            }
            if self.max_date.is_some_and(|max| day > max) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(18, 30, 0)
            .unwrap()
    }

    fn sample() -> CanonicalEvent {
        let mut event = CanonicalEvent::new(
            "Festa della Musica".to_string(),
            "Concerti in piazza".to_string(),
            Some(at(2025, 6, 21)),
            Some("https://www.ilvescovado.it/img/festa.jpg".to_string()),
            "https://www.ilvescovado.it/it/eventi/festa".to_string(),
        );
        event.category = "Concert".to_string();
        event.summary = Some("Open-air concerts in the main square.".to_string());
        event
    }

    #[test]
    fn test_new_event_defaults() {
        let event = CanonicalEvent::new(
            "Title".to_string(),
            String::new(),
            None,
            None,
            "https://example.com/a".to_string(),
        );
        assert_eq!(event.category, UNKNOWN_CATEGORY);
        assert!(event.summary.is_none());
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_new_events_get_distinct_ids() {
        let a = sample();
        let b = sample();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_stored_form_round_trip() {
        let event = sample();
        let json = serde_json::to_value(&event).unwrap();
        let back: CanonicalEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_absent_date_round_trips_to_absent() {
        let mut event = sample();
        event.date = None;
        event.image_url = None;
        event.summary = None;
        let json = serde_json::to_string(&event).unwrap();
        let back: CanonicalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.date, None);
        assert_eq!(back, event);
    }

    #[test]
    fn test_stored_form_key_names() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "id",
            "title",
            "description",
            "date",
            "image_url",
            "source_url",
            "event_type",
            "summary_en",
            "created_at",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        assert_eq!(obj["date"], "2025-06-21T18:30:00");
    }

    #[test]
    fn test_null_fields_from_stored_form() {
        let json = r#"{
            "id": "abc",
            "title": "Sagra",
            "description": null,
            "date": null,
            "image_url": null,
            "source_url": "https://www.amalfinews.it/x",
            "event_type": null,
            "summary_en": null,
            "created_at": "2025-05-01T10:00:00"
        }"#;
        let event: CanonicalEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.description, "");
        assert_eq!(event.category, UNKNOWN_CATEGORY);
        assert!(event.date.is_none());
    }

    #[test]
    fn test_unreadable_stored_dates_become_undated() {
        let element = |date: Value| {
            serde_json::json!({
                "id": "abc",
                "title": "Sagra",
                "description": "",
                "date": date,
                "source_url": "https://www.amalfinews.it/x",
                "created_at": "2025-05-01T10:00:00"
            })
        };

        let event: CanonicalEvent =
            serde_json::from_value(element(Value::from("2025-06-21T18:30:00+02:00"))).unwrap();
        assert_eq!(event.date, Some(at(2025, 6, 21)));

        let event: CanonicalEvent = serde_json::from_value(element(Value::from("2025-06-21"))).unwrap();
        assert_eq!(
            event.date,
            NaiveDate::from_ymd_opt(2025, 6, 21).unwrap().and_hms_opt(0, 0, 0)
        );

        for junk in [Value::from("sometime soon"), Value::from(20250621)] {
            let event: CanonicalEvent = serde_json::from_value(element(junk)).unwrap();
            assert!(event.date.is_none());
            assert_eq!(event.title, "Sagra");
        }
    }

    #[test]
    fn test_filter_without_dates_matches_undated() {
        let mut event = sample();
        event.date = None;
        assert!(EventFilter::default().matches(&event));
    }

    #[test]
    fn test_filter_date_bound_rejects_undated() {
        let mut event = sample();
        event.date = None;
        let filter = EventFilter {
            max_date: NaiveDate::from_ymd_opt(2030, 1, 1),
            ..EventFilter::default()
        };
        assert!(!filter.matches(&event));
    }

    #[test]
    fn test_filter_bounds_are_inclusive_days() {
        let event = sample();
        let day = NaiveDate::from_ymd_opt(2025, 6, 21).unwrap();
        let filter = EventFilter {
            category: None,
            min_date: Some(day),
            max_date: Some(day),
        };
        assert!(filter.matches(&event));

        let later = EventFilter::upcoming_from(NaiveDate::from_ymd_opt(2025, 6, 22).unwrap());
        assert!(!later.matches(&event));
    }

    #[test]
    fn test_filter_category() {
        let event = sample();
        let concerts = EventFilter {
            category: Some("Concert".to_string()),
            ..EventFilter::default()
        };
        let sport = EventFilter {
            category: Some("Sport".to_string()),
            ..EventFilter::default()
        };
        assert!(concerts.matches(&event));
        assert!(!sport.matches(&event));
    }

    #[test]
    fn test_raw_field_bag_is_empty() {
        let mut bag = RawFieldBag {
            source_url: Some("https://example.com".to_string()),
            ..RawFieldBag::default()
        };
        assert!(bag.is_empty());
        bag.title = Some("t".to_string());
        assert!(!bag.is_empty());
    }
}
