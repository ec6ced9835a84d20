//! Utility functions for text cleanup, logging, and URL handling.
//!
//! This module provides helper functions used throughout the application:
//! - Whitespace normalization and "empty means absent" trimming for extracted fields
//! - String truncation for logging
//! - URL resolution and source-domain normalization

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse every whitespace run to a single space and trim the ends.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(normalize_whitespace("  a \n\t b "), "a b");
/// ```
pub fn normalize_whitespace(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s.trim(), " ").into_owned()
}

/// Normalize whitespace and map an empty result to `None`.
///
/// Every string handed from an extractor to the record builder goes
/// through this, so "absent" and "present" are never confused with `""`.
pub fn clean_field(s: &str) -> Option<String> {
    let cleaned = normalize_whitespace(s);
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Resolve a possibly-relative reference against the page it appeared on.
pub fn resolve_url(base: &Url, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    base.join(reference).ok().map(|u| u.to_string())
}

/// Grouping key for a source URL: host (plus explicit port), lowercased,
/// with a leading `www.` removed.
///
/// Returns `None` when the URL does not parse or has no host.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(source_domain("https://www.ilportico.it/x"), Some("ilportico.it".into()));
/// ```
pub fn source_domain(source_url: &str) -> Option<String> {
    let parsed = Url::parse(source_url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        return None;
    }
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}
