//! Validation of raw field bags into canonical records.

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use super::dates::DateResolver;
use crate::models::{CanonicalEvent, RawFieldBag};
use crate::utils::clean_field;

/// Turns a [`RawFieldBag`] into a [`CanonicalEvent`], or rejects it.
///
/// Title and source URL are mandatory. An unresolvable date is not a
/// rejection cause: the record proceeds undated. Identity (`id`,
/// `created_at`) is assigned here and nowhere earlier.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordBuilder {
    resolver: DateResolver,
}

impl RecordBuilder {
    pub fn new(resolver: DateResolver) -> Self {
        Self { resolver }
    }

    pub fn build(&self, bag: RawFieldBag, now: NaiveDateTime) -> Option<CanonicalEvent> {
        let source_url = bag.source_url.as_deref().and_then(clean_field);
        let title = bag.title.as_deref().and_then(clean_field);

        let (Some(title), Some(source_url)) = (title, source_url) else {
            warn!(
                source_url = ?bag.source_url,
                has_title = bag.title.is_some(),
                "Rejecting record: missing title or source url"
            );
            return None;
        };

        let description = bag
            .description
            .as_deref()
            .and_then(clean_field)
            .unwrap_or_default();
        let image_url = bag.image_url.as_deref().and_then(clean_field);

        let date = bag
            .date_text
            .as_deref()
            .and_then(|text| self.resolver.resolve(text, now));
        if date.is_none() {
            warn!(%source_url, date_text = ?bag.date_text, "Could not resolve event date; keeping record undated");
        }

        let event = CanonicalEvent::new(title, description, date, image_url, source_url);
        debug!(id = %event.id, title = %event.title, "Built candidate record");
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 21)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn full_bag() -> RawFieldBag {
        RawFieldBag {
            title: Some(" Grande Festival di Musica a Salerno ".to_string()),
            description: Some(" Un fantastico festival nel centro della città. ".to_string()),
            date_text: Some(" Sabato 25 Maggio 2024, ore 18:00 ".to_string()),
            image_url: Some(" https://example.com/image.jpg ".to_string()),
            source_url: Some("https://www.salernotoday.it/eventi/festival.html".to_string()),
        }
    }

    #[test]
    fn test_build_trims_and_resolves() {
        let event = RecordBuilder::default().build(full_bag(), now()).unwrap();
        assert_eq!(event.title, "Grande Festival di Musica a Salerno");
        assert_eq!(event.description, "Un fantastico festival nel centro della città.");
        assert_eq!(event.image_url.as_deref(), Some("https://example.com/image.jpg"));
        assert_eq!(
            event.date,
            NaiveDate::from_ymd_opt(2024, 5, 25).unwrap().and_hms_opt(18, 0, 0)
        );
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_missing_title_is_rejected() {
        let builder = RecordBuilder::default();
        for title in [None, Some("   ".to_string())] {
            let bag = RawFieldBag {
                title,
                ..full_bag()
            };
            assert!(builder.build(bag, now()).is_none());
        }
    }

    #[test]
    fn test_missing_source_url_is_rejected() {
        let builder = RecordBuilder::default();
        for source_url in [None, Some("\n".to_string())] {
            let bag = RawFieldBag {
                source_url,
                ..full_bag()
            };
            assert!(builder.build(bag, now()).is_none());
        }
    }

    #[test]
    fn test_unresolved_date_is_accepted() {
        let bag = RawFieldBag {
            date_text: Some("data da definire".to_string()),
            ..full_bag()
        };
        let event = RecordBuilder::default().build(bag, now()).unwrap();
        assert!(event.date.is_none());
    }

    #[test]
    fn test_optional_fields_absent() {
        let bag = RawFieldBag {
            description: None,
            date_text: None,
            image_url: Some("  ".to_string()),
            ..full_bag()
        };
        let event = RecordBuilder::default().build(bag, now()).unwrap();
        assert_eq!(event.description, "");
        assert!(event.image_url.is_none());
        assert!(event.date.is_none());
    }
}
