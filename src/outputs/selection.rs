//! Fair per-source selection of records for delivery.

use itertools::Itertools;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::CanonicalEvent;
use crate::utils::source_domain;

/// Default number of records each source may contribute.
pub const DEFAULT_PER_SOURCE_CAP: usize = 2;

/// Group key for records whose source URL has no usable host.
const UNKNOWN_SOURCE: &str = "unknown";

/// Newest first; undated records sort after every dated one.
fn newest_first(events: &mut [CanonicalEvent]) {
    events.sort_by_key(|e| Reverse(e.date));
}

/// Pick at most `per_source_cap` records per source domain, newest first.
///
/// Every domain present in `events` contributes at least one record, so a
/// prolific source never crowds the others out. A cap of zero is treated
/// as one.
pub fn select_for_delivery(events: Vec<CanonicalEvent>, per_source_cap: usize) -> Vec<CanonicalEvent> {
    let cap = per_source_cap.max(1);

    let groups: BTreeMap<String, Vec<CanonicalEvent>> = events
        .into_iter()
        .map(|e| {
            let key = source_domain(&e.source_url).unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
            (key, e)
        })
        .into_group_map()
        .into_iter()
        .collect();

    let mut selected = Vec::new();
    for (domain, mut group) in groups {
        newest_first(&mut group);
        let total = group.len();
        group.truncate(cap);
        debug!(%domain, total, taken = group.len(), "Selected events from source");
        selected.extend(group);
    }

    newest_first(&mut selected);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(day: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2025, 6, day)
            .unwrap()
            .and_hms_opt(20, 0, 0)
    }

    fn event(title: &str, url: &str, date: Option<NaiveDateTime>) -> CanonicalEvent {
        CanonicalEvent::new(title.to_string(), String::new(), date, None, url.to_string())
    }

    fn titles(events: &[CanonicalEvent]) -> Vec<&str> {
        events.iter().map(|e| e.title.as_str()).collect()
    }

    #[test]
    fn test_small_source_is_not_crowded_out() {
        let mut events: Vec<CanonicalEvent> = (1..=5)
            .map(|d| event(&format!("A{d}"), &format!("https://www.a.it/e/{d}"), at(d)))
            .collect();
        events.push(event("B1", "https://b.it/e/1", at(3)));

        let selected = select_for_delivery(events, 2);
        assert_eq!(titles(&selected), ["A5", "A4", "B1"]);
    }

    #[test]
    fn test_www_prefix_shares_a_group() {
        let events = vec![
            event("x", "https://www.a.it/1", at(1)),
            event("y", "https://a.it/2", at(2)),
            event("z", "https://A.IT/3", at(3)),
        ];
        assert_eq!(titles(&select_for_delivery(events, 2)), ["z", "y"]);
    }

    #[test]
    fn test_undated_ranks_last() {
        let events = vec![
            event("undated", "https://a.it/1", None),
            event("dated", "https://a.it/2", at(1)),
            event("other", "https://b.it/1", None),
        ];
        let selected = select_for_delivery(events, 1);
        assert_eq!(selected[0].title, "dated");
        assert_eq!(selected.len(), 2);
        assert!(selected[1].date.is_none());
    }

    #[test]
    fn test_unparseable_urls_share_catch_all_group() {
        let events = vec![
            event("bad1", "not a url", at(1)),
            event("bad2", "", at(2)),
            event("bad3", "mailto:x@y", at(3)),
        ];
        assert_eq!(titles(&select_for_delivery(events, 2)), ["bad3", "bad2"]);
    }

    #[test]
    fn test_zero_cap_still_takes_one_per_source() {
        let events = vec![
            event("a", "https://a.it/1", at(1)),
            event("b", "https://b.it/1", at(2)),
        ];
        assert_eq!(select_for_delivery(events, 0).len(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(select_for_delivery(Vec::new(), 2).is_empty());
    }
}
