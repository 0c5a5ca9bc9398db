//! Typed post-processing of generated reply text.
//!
//! The generator may embed an `[IMAGE: url]` marker in its output. That is
//! parsed here into a tagged union rather than ad hoc string scanning at
//! the call sites, and well-known cloud-drive "view" links are rewritten to
//! their direct-download form so the transport can fetch the bytes.

use url::Url;

const IMAGE_MARKER: &str = "[IMAGE:";

/// A generated reply after directive extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedReply {
    Text(String),
    Image { url: String, caption: String },
}

/// Extract an `[IMAGE: url]` directive, if present. The caption is the
/// remaining text with the marker stripped and whitespace tidied.
#[must_use]
pub fn parse_generated(text: &str) -> GeneratedReply {
    let Some(start) = text.find(IMAGE_MARKER) else {
        return GeneratedReply::Text(text.to_string());
    };
    let after = &text[start + IMAGE_MARKER.len()..];
    let Some(end) = after.find(']') else {
        return GeneratedReply::Text(text.to_string());
    };

    let url = after[..end].trim();
    if url.is_empty() {
        return GeneratedReply::Text(text.to_string());
    }

    let caption = format!("{} {}", &text[..start], &after[end + 1..])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    GeneratedReply::Image {
        url: rewrite_drive_link(url),
        caption,
    }
}

/// Rewrite a Google Drive "view" link to the direct-download form. Any URL
/// that does not match passes through unchanged.
#[must_use]
pub fn rewrite_drive_link(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.host_str() != Some("drive.google.com") {
        return raw.to_string();
    }

    // Shape: /file/d/<id>/view?...
    let segments: Vec<&str> = url.path_segments().map(Iterator::collect).unwrap_or_default();
    match segments.as_slice() {
        ["file", "d", id, ..] if !id.is_empty() => {
            format!("https://drive.google.com/uc?export=download&id={id}")
        },
        _ => raw.to_string(),
    }
}
