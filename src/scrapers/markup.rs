//! Markup tier: per-source CSS locators.

use scraper::{ElementRef, Html};
use url::Url;

use super::{FieldLocator, MarkupLocators};
use crate::models::RawFieldBag;
use crate::utils::{clean_field, normalize_whitespace, resolve_url};

fn element_text(el: &ElementRef) -> String {
    normalize_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Values of every element the locator matches, in document order.
fn locate_all(document: &Html, locator: &FieldLocator) -> Vec<String> {
    document
        .select(&locator.selector)
        .filter(|el| match &locator.contains {
            Some(needle) => element_text(el).contains(needle.as_str()),
            None => true,
        })
        .filter_map(|el| match &locator.attr {
            Some(attr) => el.value().attr(attr).and_then(clean_field),
            None => clean_field(&element_text(&el)),
        })
        .collect()
}

fn locate_first(document: &Html, locator: &FieldLocator) -> Option<String> {
    locate_all(document, locator).into_iter().next()
}

pub fn extract(document: &Html, page_url: &Url, locators: &MarkupLocators) -> Option<RawFieldBag> {
    let title = locators.title.as_ref().and_then(|l| locate_first(document, l));

    let description = locators.description.as_ref().and_then(|l| {
        let kept: Vec<String> = locate_all(document, l)
            .into_iter()
            .filter(|part| !locators.description_noise.iter().any(|re| re.is_match(part)))
            .collect();
        clean_field(&kept.join(" "))
    });

    let date_text = locators.date.as_ref().and_then(|l| locate_first(document, l));

    let image_url = locators
        .image
        .as_ref()
        .and_then(|l| locate_first(document, l))
        .and_then(|src| resolve_url(page_url, &src));

    let bag = RawFieldBag {
        title,
        description,
        date_text,
        image_url,
        source_url: Some(page_url.to_string()),
    };
    if bag.is_empty() { None } else { Some(bag) }
}
