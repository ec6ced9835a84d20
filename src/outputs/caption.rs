//! HTML captions for delivered events.
//!
//! A caption is up to four paragraphs separated by blank lines:
//!
//! ```text
//! <code>25.05.2024</code>
//!
//! <b>Title</b>
//!
//! <blockquote>Summary, or description, or a placeholder</blockquote>
//!
//! Source: <code>https://...</code>
//! ```
//!
//! The date paragraph is omitted for undated records. Captions never exceed
//! [`CAPTION_LIMIT`] characters; only the description paragraph is shortened
//! to get there.

use tracing::warn;

use crate::models::CanonicalEvent;

/// Photo caption ceiling of the messaging API, in characters.
pub const CAPTION_LIMIT: usize = 1024;

pub const NO_DESCRIPTION: &str = "No description available.";

const ELLIPSIS: &str = "...";

fn escape(s: &str) -> String {
    html_escape::encode_text(s).into_owned()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((cut, _)) => &s[..cut],
        None => s,
    }
}

fn assemble(head: &[String], description: &str, tail: &str) -> String {
    head.iter()
        .map(String::as_str)
        .chain([description, tail])
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn blockquote(text: &str) -> String {
    format!("<blockquote>{}</blockquote>", escape(text))
}

pub fn format_caption(event: &CanonicalEvent) -> String {
    let mut head = Vec::with_capacity(2);
    if let Some(date) = event.date {
        head.push(format!("<code>{}</code>", date.format("%d.%m.%Y")));
    }
    head.push(format!("<b>{}</b>", escape(&event.title)));
    let tail = format!("Source: <code>{}</code>", escape(&event.source_url));

    let content = event
        .summary
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| Some(event.description.as_str()).filter(|d| !d.trim().is_empty()))
        .unwrap_or(NO_DESCRIPTION);

    let caption = assemble(&head, &blockquote(content), &tail);
    let length = char_len(&caption);
    if length <= CAPTION_LIMIT {
        return caption;
    }

    warn!(id = %event.id, length, "Caption exceeds limit; truncating description");

    // Escaping can only lengthen text, so shrink the raw content until the
    // escaped result fits.
    let overhead = char_len(&assemble(&head, &blockquote(""), &tail));
    let mut keep = CAPTION_LIMIT
        .saturating_sub(overhead)
        .saturating_sub(ELLIPSIS.len())
        .min(char_len(content));
    loop {
        let shortened = format!("{}{ELLIPSIS}", take_chars(content, keep).trim_end());
        let caption = assemble(&head, &blockquote(&shortened), &tail);
        let length = char_len(&caption);
        if length <= CAPTION_LIMIT {
            return caption;
        }
        if keep == 0 {
            break;
        }
        keep = keep.saturating_sub(length - CAPTION_LIMIT);
    }

    warn!(id = %event.id, "Caption exceeds limit without a description; hard cut");
    let caption = assemble(&head, &blockquote(ELLIPSIS), &tail);
    format!(
        "{}{ELLIPSIS}",
        take_chars(&caption, CAPTION_LIMIT - ELLIPSIS.len())
    )
}
