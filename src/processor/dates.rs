//! Free-text date resolution for Italian and English listings.
//!
//! [`DateResolver::resolve`] scans a block of text for date-like substrings
//! and resolves the *first* one it can make sense of. Recognized forms:
//!
//! | Form | Examples |
//! |------|----------|
//! | ISO 8601 | `2024-05-25`, `2024-05-25T18:00:00+02:00` |
//! | Numeric day-first | `15/06/2024`, `15.06.24` |
//! | Day + month name | `Sabato 25 Maggio 2024`, `1° giugno`, `4th of July` |
//! | Month name + day | `July 4th, 2024`, `May 25` |
//! | Relative day | `oggi`, `domani`, `dopodomani`, `today`, `tomorrow` |
//! | Weekday | `prossimo martedì`, `martedì prossimo`, `next Tuesday` |
//!
//! A time of day directly following the date (`ore 18:00`, `alle 20`,
//! `at 9.30 pm`) is attached; otherwise the result is midnight.
//!
//! Ambiguous forms resolve toward the future: a day and month without a year
//! lands on its next occurrence on or after the reference day, and a weekday
//! lands 1 to 7 days after the reference day. All values are naive.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::utils::truncate_for_log;

const MONTHS: &[(&str, u32)] = &[
    ("gennaio", 1),
    ("january", 1),
    ("gen", 1),
    ("jan", 1),
    ("febbraio", 2),
    ("february", 2),
    ("feb", 2),
    ("marzo", 3),
    ("march", 3),
    ("mar", 3),
    ("aprile", 4),
    ("april", 4),
    ("apr", 4),
    ("maggio", 5),
    ("may", 5),
    ("mag", 5),
    ("giugno", 6),
    ("june", 6),
    ("giu", 6),
    ("jun", 6),
    ("luglio", 7),
    ("july", 7),
    ("lug", 7),
    ("jul", 7),
    ("agosto", 8),
    ("august", 8),
    ("ago", 8),
    ("aug", 8),
    ("settembre", 9),
    ("september", 9),
    ("sept", 9),
    ("set", 9),
    ("sep", 9),
    ("ottobre", 10),
    ("october", 10),
    ("ott", 10),
    ("oct", 10),
    ("novembre", 11),
    ("november", 11),
    ("nov", 11),
    ("dicembre", 12),
    ("december", 12),
    ("dic", 12),
    ("dec", 12),
];

const WEEKDAYS: &[(&str, Weekday)] = &[
    ("lunedì", Weekday::Mon),
    ("lunedi", Weekday::Mon),
    ("monday", Weekday::Mon),
    ("martedì", Weekday::Tue),
    ("martedi", Weekday::Tue),
    ("tuesday", Weekday::Tue),
    ("mercoledì", Weekday::Wed),
    ("mercoledi", Weekday::Wed),
    ("wednesday", Weekday::Wed),
    ("giovedì", Weekday::Thu),
    ("giovedi", Weekday::Thu),
    ("thursday", Weekday::Thu),
    ("venerdì", Weekday::Fri),
    ("venerdi", Weekday::Fri),
    ("friday", Weekday::Fri),
    ("sabato", Weekday::Sat),
    ("saturday", Weekday::Sat),
    ("domenica", Weekday::Sun),
    ("sunday", Weekday::Sun),
];

const RELATIVE_DAYS: &[(&str, i64)] = &[
    ("day after tomorrow", 2),
    ("dopodomani", 2),
    ("tomorrow", 1),
    ("domani", 1),
    ("today", 0),
    ("tonight", 0),
    ("oggi", 0),
    ("stasera", 0),
    ("yesterday", -1),
    ("ieri", -1),
];

/// Regex alternation of the given names, longest first so that full month
/// names win over their abbreviations.
fn alternation<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let mut names: Vec<&str> = names.collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.chars().count()));
    names
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|")
}

static MONTH_ALT: Lazy<String> = Lazy::new(|| alternation(MONTHS.iter().map(|(n, _)| *n)));
static WEEKDAY_ALT: Lazy<String> = Lazy::new(|| alternation(WEEKDAYS.iter().map(|(n, _)| *n)));

static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ](\d{1,2}):(\d{2})(?::(\d{2}))?)?").unwrap()
});

static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4}|\d{2})\b").unwrap());

static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:(?:{wd})\s*[,\-–]?\s+)?(\d{{1,2}})(?:st|nd|rd|th|°|º)?\s+(?:di\s+|of\s+)?({mon})\b\.?(?:\s*,?\s*(\d{{4}})\b)?",
        wd = *WEEKDAY_ALT,
        mon = *MONTH_ALT
    ))
    .unwrap()
});

static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:(?:{wd})\s*[,\-–]?\s+)?({mon})\b\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:\s*,?\s*(\d{{4}})\b)?",
        wd = *WEEKDAY_ALT,
        mon = *MONTH_ALT
    ))
    .unwrap()
});

static RELATIVE_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b({})\b",
        alternation(RELATIVE_DAYS.iter().map(|(n, _)| *n))
    ))
    .unwrap()
});

static WEEKDAY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:(?:next|this|coming|prossim[oa]|quest[oa])\s+)?({wd})\b(?:\s+prossim[oa]\b)?",
        wd = *WEEKDAY_ALT
    ))
    .unwrap()
});

static TIME_WITH_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*,?\s*-?\s*(?:ore|alle|dalle|at|h)\.?\s*(\d{1,2})(?:[:.](\d{2}))?(?:\s*(am|pm))?\b")
        .unwrap()
});

static TIME_BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*,?\s*-?\s*(\d{1,2})[:.](\d{2})(?:\s*(am|pm))?\b").unwrap()
});

/// Ranks up to this one come from explicit calendar dates.
const EXPLICIT_MAX_RANK: u8 = 3;
const WEEKDAY_RANK: u8 = 5;
/// A weekday name this close before an explicit date only labels it.
const WEEKDAY_LOOKAHEAD: usize = 16;

/// One recognized date substring.
#[derive(Debug)]
struct Candidate {
    start: usize,
    end: usize,
    /// Tie-breaker for matches starting at the same offset; lower wins.
    rank: u8,
    value: NaiveDateTime,
}

/// Resolves free-form date text to a naive point in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateResolver;

impl DateResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the first recognizable date in `text`, relative to `reference`.
    ///
    /// Returns `None` for empty input or when nothing in the text resolves.
    pub fn resolve(&self, text: &str, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Empty date text; unresolved");
            return None;
        }

        let mut candidates = Vec::new();
        collect_iso(text, &mut candidates);
        collect_numeric(text, &mut candidates);
        collect_day_month(text, reference.date(), &mut candidates);
        collect_month_day(text, reference.date(), &mut candidates);
        collect_relative(text, reference.date(), &mut candidates);
        collect_weekday(text, reference.date(), &mut candidates);

        let explicit_starts: Vec<usize> = candidates
            .iter()
            .filter(|c| c.rank <= EXPLICIT_MAX_RANK)
            .map(|c| c.start)
            .collect();
        candidates.retain(|c| {
            c.rank != WEEKDAY_RANK
                || !explicit_starts
                    .iter()
                    .any(|&s| s >= c.end && s - c.end <= WEEKDAY_LOOKAHEAD)
        });

        let best = candidates.into_iter().min_by_key(|c| (c.start, c.rank));
        match &best {
            Some(c) => debug!(
                text = %truncate_for_log(text, 120),
                resolved = %c.value,
                "Resolved date"
            ),
            None => debug!(text = %truncate_for_log(text, 120), "No date found in text"),
        }
        best.map(|c| c.value)
    }
}

fn number<T: std::str::FromStr>(caps: &Captures<'_>, group: usize) -> Option<T> {
    caps.get(group).and_then(|m| m.as_str().parse().ok())
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    MONTHS.iter().find(|(n, _)| *n == lower).map(|(_, m)| *m)
}

fn weekday_of(name: &str) -> Option<Weekday> {
    let lower = name.to_lowercase();
    WEEKDAYS.iter().find(|(n, _)| *n == lower).map(|(_, w)| *w)
}

fn expand_year(year: i32) -> i32 {
    if year < 100 { 2000 + year } else { year }
}

/// Next occurrence of `day`/`month` on or after `reference`.
fn nearest_future(day: u32, month: u32, reference: NaiveDate) -> Option<NaiveDate> {
    (reference.year()..reference.year() + 8)
        .filter_map(|year| NaiveDate::from_ymd_opt(year, month, day))
        .find(|date| *date >= reference)
}

/// Time of day written right after a date match, if any.
fn trailing_time(rest: &str) -> Option<NaiveTime> {
    let caps = TIME_WITH_KEYWORD
        .captures(rest)
        .or_else(|| TIME_BARE.captures(rest))?;
    let mut hour: u32 = number(&caps, 1)?;
    let minute: u32 = number(&caps, 2).unwrap_or(0);
    if let Some(meridiem) = caps.get(3) {
        let pm = meridiem.as_str().eq_ignore_ascii_case("pm");
        if hour == 12 {
            hour = if pm { 12 } else { 0 };
        } else if pm {
            hour += 12;
        }
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn with_trailing_time(date: NaiveDate, text: &str, end: usize) -> NaiveDateTime {
    let time = trailing_time(&text[end..]).unwrap_or(NaiveTime::MIN);
    date.and_time(time)
}

fn collect_iso(text: &str, out: &mut Vec<Candidate>) {
    for caps in ISO_DATE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let date = match (number(&caps, 1), number(&caps, 2), number(&caps, 3)) {
            (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
            _ => None,
        };
        let Some(date) = date else { continue };
        let value = if caps.get(4).is_some() {
            let time = NaiveTime::from_hms_opt(
                number(&caps, 4).unwrap_or(0),
                number(&caps, 5).unwrap_or(0),
                number(&caps, 6).unwrap_or(0),
            );
            match time {
                Some(time) => date.and_time(time),
                None => date.and_time(NaiveTime::MIN),
            }
        } else {
            with_trailing_time(date, text, whole.end())
        };
        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            rank: 0,
            value,
        });
    }
}

fn collect_numeric(text: &str, out: &mut Vec<Candidate>) {
    for caps in NUMERIC_DATE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let (Some(first), Some(second), Some(year)) =
            (number::<u32>(&caps, 1), number::<u32>(&caps, 2), number::<i32>(&caps, 3))
        else {
            continue;
        };
        let year = expand_year(year);
        // Day-first is the local convention; month-first only when that is
        // the sole valid reading.
        let date = NaiveDate::from_ymd_opt(year, second, first)
            .or_else(|| NaiveDate::from_ymd_opt(year, first, second));
        let Some(date) = date else { continue };
        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            rank: 1,
            value: with_trailing_time(date, text, whole.end()),
        });
    }
}

fn collect_day_month(text: &str, reference: NaiveDate, out: &mut Vec<Candidate>) {
    for caps in DAY_MONTH.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let (Some(day), Some(month)) = (
            number::<u32>(&caps, 1),
            caps.get(2).and_then(|m| month_number(m.as_str())),
        ) else {
            continue;
        };
        let date = match number::<i32>(&caps, 3) {
            Some(year) => NaiveDate::from_ymd_opt(year, month, day),
            None => nearest_future(day, month, reference),
        };
        let Some(date) = date else { continue };
        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            rank: 2,
            value: with_trailing_time(date, text, whole.end()),
        });
    }
}

fn collect_month_day(text: &str, reference: NaiveDate, out: &mut Vec<Candidate>) {
    for caps in MONTH_DAY.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let (Some(month), Some(day)) = (
            caps.get(1).and_then(|m| month_number(m.as_str())),
            number::<u32>(&caps, 2),
        ) else {
            continue;
        };
        let date = match number::<i32>(&caps, 3) {
            Some(year) => NaiveDate::from_ymd_opt(year, month, day),
            None => nearest_future(day, month, reference),
        };
        let Some(date) = date else { continue };
        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            rank: 3,
            value: with_trailing_time(date, text, whole.end()),
        });
    }
}

fn collect_relative(text: &str, reference: NaiveDate, out: &mut Vec<Candidate>) {
    for caps in RELATIVE_DAY.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let word = whole.as_str().to_lowercase();
        let Some(offset) = RELATIVE_DAYS
            .iter()
            .find(|(n, _)| *n == word)
            .map(|(_, o)| *o)
        else {
            continue;
        };
        let date = reference + Duration::days(offset);
        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            rank: 4,
            value: with_trailing_time(date, text, whole.end()),
        });
    }
}

fn collect_weekday(text: &str, reference: NaiveDate, out: &mut Vec<Candidate>) {
    for caps in WEEKDAY_NAME.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let Some(target) = caps.get(1).and_then(|m| weekday_of(m.as_str())) else {
            continue;
        };
        let today = reference.weekday().num_days_from_monday() as i64;
        let wanted = target.num_days_from_monday() as i64;
        let mut ahead = (wanted - today).rem_euclid(7);
        if ahead == 0 {
            ahead = 7;
        }
        let date = reference + Duration::days(ahead);
        out.push(Candidate {
            start: whole.start(),
            end: whole.end(),
            rank: WEEKDAY_RANK,
            value: with_trailing_time(date, text, whole.end()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tuesday 2024-05-21, 12:00.
    fn reference() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 21)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn ymd_hm(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn resolve(text: &str) -> Option<NaiveDateTime> {
        DateResolver::new().resolve(text, reference())
    }

    #[test]
    fn test_italian_full_date_with_weekday_and_time() {
        assert_eq!(
            resolve("L'evento si terrà Sabato 25 Maggio 2024, ore 18:00"),
            Some(ymd_hm(2024, 5, 25, 18, 0))
        );
    }

    #[test]
    fn test_weekday_label_before_explicit_date() {
        assert_eq!(
            resolve("Sabato - 25 Maggio 2024"),
            Some(ymd_hm(2024, 5, 25, 0, 0))
        );
        assert_eq!(
            resolve("venerdì e sabato 5 luglio"),
            Some(ymd_hm(2024, 7, 5, 0, 0))
        );
        assert_eq!(
            resolve("Domenica – 2 Giugno, ore 10:30"),
            Some(ymd_hm(2024, 6, 2, 10, 30))
        );
    }

    #[test]
    fn test_numeric_day_first() {
        assert_eq!(
            resolve("Appuntamento il 15/06/2024"),
            Some(ymd_hm(2024, 6, 15, 0, 0))
        );
        assert_eq!(resolve("il 03.07.24 alle 21"), Some(ymd_hm(2024, 7, 3, 21, 0)));
    }

    #[test]
    fn test_numeric_month_first_when_only_valid_reading() {
        assert_eq!(resolve("06/25/2024"), Some(ymd_hm(2024, 6, 25, 0, 0)));
    }

    #[test]
    fn test_first_date_in_range_wins() {
        assert_eq!(
            resolve("Dal 1 Giugno al 5 Giugno"),
            Some(ymd_hm(2024, 6, 1, 0, 0))
        );
    }

    #[test]
    fn test_english_month_first() {
        assert_eq!(
            resolve("Event on July 4th, 2024"),
            Some(ymd_hm(2024, 7, 4, 0, 0))
        );
    }

    #[test]
    fn test_iso_with_offset_keeps_wall_clock() {
        assert_eq!(
            resolve("2024-05-10T09:30:00+02:00"),
            Some(ymd_hm(2024, 5, 10, 9, 30))
        );
    }

    #[test]
    fn test_next_tuesday_is_strictly_future() {
        let resolved = resolve("next Tuesday").unwrap();
        assert!(resolved > reference());
        assert_eq!(resolved.date(), NaiveDate::from_ymd_opt(2024, 5, 28).unwrap());
    }

    #[test]
    fn test_prossimo_martedi_with_time() {
        assert_eq!(
            resolve("Prossimo martedì alle 20"),
            Some(ymd_hm(2024, 5, 28, 20, 0))
        );
    }

    #[test]
    fn test_weekday_later_this_week() {
        assert_eq!(
            resolve("venerdì sera"),
            Some(ymd_hm(2024, 5, 24, 0, 0))
        );
    }

    #[test]
    fn test_yearless_date_prefers_future() {
        // Already past in 2024 relative to the reference: next year.
        assert_eq!(resolve("12 marzo"), Some(ymd_hm(2025, 3, 12, 0, 0)));
        // Still ahead this year.
        assert_eq!(resolve("1° giugno"), Some(ymd_hm(2024, 6, 1, 0, 0)));
        // The reference day itself counts as upcoming.
        assert_eq!(resolve("21 maggio"), Some(ymd_hm(2024, 5, 21, 0, 0)));
    }

    #[test]
    fn test_relative_words() {
        assert_eq!(resolve("Oggi"), Some(ymd_hm(2024, 5, 21, 0, 0)));
        assert_eq!(resolve("Domani sera"), Some(ymd_hm(2024, 5, 22, 0, 0)));
        assert_eq!(resolve("dopodomani ore 9.30"), Some(ymd_hm(2024, 5, 23, 9, 30)));
        assert_eq!(resolve("tomorrow at 7 pm"), Some(ymd_hm(2024, 5, 22, 19, 0)));
    }

    #[test]
    fn test_date_inside_byline() {
        assert_eq!(
            resolve("Inserito da Redazione il 12/05/2024 alle 10:30"),
            Some(ymd_hm(2024, 5, 12, 10, 30))
        );
    }

    #[test]
    fn test_unresolved_inputs() {
        assert_eq!(resolve(""), None);
        assert_eq!(resolve("   "), None);
        assert_eq!(resolve("Nessuna data qui"), None);
        assert_eq!(resolve("Invalid date string"), None);
        assert_eq!(resolve("12345"), None);
    }

    #[test]
    fn test_invalid_calendar_date_is_skipped() {
        assert_eq!(resolve("31/02/2024"), None);
        assert_eq!(
            resolve("31/02/2024 oppure 01/03/2024"),
            Some(ymd_hm(2024, 3, 1, 0, 0))
        );
    }

    #[test]
    fn test_leap_day_without_year() {
        assert_eq!(resolve("29 febbraio"), Some(ymd_hm(2028, 2, 29, 0, 0)));
    }
}
