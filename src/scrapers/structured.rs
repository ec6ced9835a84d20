//! Structured-data tier: embedded JSON-LD blocks.
//!
//! Every `<script type="application/ld+json">` block on the page is decoded in
//! document order. A block that does not decode is skipped. The first object
//! whose `@type` is one of [`ALLOWED_TYPES`] and that carries a title is used.
//!
//! A block may hold a single object, an array of objects, or an object with a
//! `@graph` array.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::models::RawFieldBag;
use crate::utils::{clean_field, resolve_url};

const ALLOWED_TYPES: &[&str] = &["Article", "Event", "NewsArticle"];

static LD_JSON: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

pub fn extract(document: &Html, page_url: &Url) -> Option<RawFieldBag> {
    for script in document.select(&LD_JSON) {
        let raw = script.text().collect::<String>();
        let value: Value = match serde_json::from_str(raw.trim()) {
            Ok(v) => v,
            Err(e) => {
                debug!(url = %page_url, error = %e, "Skipping undecodable JSON-LD block");
                continue;
            }
        };

        if let Some(bag) = candidates(&value)
            .into_iter()
            .filter(|obj| has_allowed_type(obj))
            .find_map(|obj| bag_from_object(obj, page_url))
        {
            return Some(bag);
        }
    }
    None
}

/// Objects in a decoded block that may describe the page.
fn candidates(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().flat_map(candidates).collect(),
        Value::Object(map) => match map.get("@graph") {
            Some(Value::Array(graph)) => {
                let mut out = vec![value];
                out.extend(graph.iter().filter(|v| v.is_object()));
                out
            }
            _ => vec![value],
        },
        _ => Vec::new(),
    }
}

fn has_allowed_type(obj: &Value) -> bool {
    match obj.get("@type") {
        Some(Value::String(t)) => ALLOWED_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| ALLOWED_TYPES.contains(&t)),
        _ => false,
    }
}

fn text_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(Value::as_str)
        .find_map(clean_field)
}

fn image_field(obj: &Value) -> Option<&str> {
    match obj.get("image")? {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("url").and_then(Value::as_str),
        Value::Array(items) => items.iter().find_map(|item| match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("url").and_then(Value::as_str),
            _ => None,
        }),
        _ => None,
    }
}

fn bag_from_object(obj: &Value, page_url: &Url) -> Option<RawFieldBag> {
    let title = text_field(obj, &["headline", "name"])?;
    Some(RawFieldBag {
        title: Some(title),
        description: text_field(obj, &["articleBody", "description"]),
        date_text: text_field(obj, &["datePublished", "startDate"]),
        image_url: image_field(obj).and_then(|src| resolve_url(page_url, src)),
        source_url: Some(page_url.to_string()),
    })
}
