//! Companion document reading
//!
//! Agency documents are loosely structured XML. Only a handful of fields
//! matter to the pipeline, so elements are matched by local name and the
//! first non-empty value wins.

use crate::analysis::DocumentMetadata;
use crate::classify::{Classifier, FileKind};
use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

const TITLE_TAGS: &[&str] = &["title", "headline", "slug"];
const PUBLISHED_TAGS: &[&str] = &["published", "publishdate", "published_at", "pubdate", "date"];
const DURATION_TAGS: &[&str] = &["duration", "runtime", "length"];
const MEDIA_TAGS: &[&str] = &["filename", "file", "mediafile", "media", "video", "asset"];
const MEDIA_ATTRS: &[&str] = &["href", "src", "filename", "file", "url"];

/// Fields read straight from a companion document
pub fn read_document(bytes: &[u8], classifier: &Classifier) -> Result<DocumentMetadata> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut metadata = DocumentMetadata::default();
    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                media_from_attributes(&e, classifier, &mut metadata);
                stack.push(local_name(&e));
            }
            Ok(Event::Empty(e)) => media_from_attributes(&e, classifier, &mut metadata),
            Ok(Event::Text(te)) => {
                let text = te.unescape().unwrap_or_default();
                if let Some(tag) = stack.last() {
                    apply_field(tag, text.trim(), classifier, &mut metadata);
                }
            }
            Ok(Event::CData(cd)) => {
                let text = String::from_utf8_lossy(&cd.into_inner()).into_owned();
                if let Some(tag) = stack.last() {
                    apply_field(tag, text.trim(), classifier, &mut metadata);
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Classification(format!(
                    "Malformed document at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(metadata)
}

/// Fields read locally from the document; a malformed document yields none
pub fn read_lenient(bytes: &[u8], classifier: &Classifier, path: &str) -> DocumentMetadata {
    read_document(bytes, classifier).unwrap_or_else(|e| {
        warn!(path = %path, "Could not read document locally: {}", e);
        DocumentMetadata::default()
    })
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase()
}

fn apply_field(tag: &str, text: &str, classifier: &Classifier, metadata: &mut DocumentMetadata) {
    if text.is_empty() {
        return;
    }
    if metadata.title.is_none() && TITLE_TAGS.contains(&tag) {
        metadata.title = Some(text.to_string());
    } else if metadata.published_at.is_none() && PUBLISHED_TAGS.contains(&tag) {
        metadata.published_at = Some(text.to_string());
    } else if metadata.duration_seconds.is_none() && DURATION_TAGS.contains(&tag) {
        metadata.duration_seconds = parse_duration(text);
    } else if metadata.media_reference.is_none()
        && MEDIA_TAGS.contains(&tag)
        && classifier.kind(text) == FileKind::Media
    {
        metadata.media_reference = Some(text.to_string());
    }
}

fn media_from_attributes(
    e: &BytesStart<'_>,
    classifier: &Classifier,
    metadata: &mut DocumentMetadata,
) {
    if metadata.media_reference.is_some() {
        return;
    }
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_lowercase();
        if !MEDIA_ATTRS.contains(&key.as_str()) {
            continue;
        }
        let Ok(value) = attr.unescape_value() else {
            continue;
        };
        let value = value.trim();
        if classifier.kind(value) == FileKind::Media {
            metadata.media_reference = Some(value.to_string());
            return;
        }
    }
}

/// Seconds from `SS`, `MM:SS`, `HH:MM:SS` (optional `;FF`/`.fff` frames) or `PT#H#M#S`.
///
/// Negative components and totals that do not fit an `i64` are rejected.
pub fn parse_duration(text: &str) -> Option<i64> {
    let text = text.trim();

    if let Some(iso) = text.strip_prefix("PT").or_else(|| text.strip_prefix("pt")) {
        return parse_iso_duration(iso);
    }

    let main = text.split([';', '.']).next().unwrap_or(text);
    let parts: Vec<&str> = main.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    let mut total: i64 = 0;
    for part in parts {
        let part = part.trim();
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: i64 = part.parse().ok()?;
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}

fn parse_iso_duration(text: &str) -> Option<i64> {
    let mut total = 0f64;
    let mut number = String::new();
    for ch in text.chars() {
        match ch.to_ascii_uppercase() {
            'H' => total += number.parse::<f64>().ok()? * 3600.0,
            'M' => total += number.parse::<f64>().ok()? * 60.0,
            'S' => total += number.parse::<f64>().ok()?,
            c if c.is_ascii_digit() || c == '.' => {
                number.push(c);
                continue;
            }
            _ => return None,
        }
        number.clear();
    }
    if !number.is_empty() {
        return None;
    }
    let total = total.round();
    // i64::MAX as f64 rounds up to 2^63
    if !total.is_finite() || total >= i64::MAX as f64 {
        return None;
    }
    Some(total as i64)
}
