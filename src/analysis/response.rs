//! Unwrapping JSON out of free-form model output

use crate::error::{Error, Result};
use serde_json::Value;

/// Extract the single JSON object or array a response is expected to carry.
///
/// Code fences are stripped, then the widest `{...}` or `[...]` span that
/// parses wins. Empty or non-JSON text is an error for the call.
pub fn parse_json(raw: &str) -> Result<Value> {
    let text = strip_code_fences(raw.trim());
    if text.is_empty() {
        return Err(Error::Analysis("empty response".to_string()));
    }

    let mut spans: Vec<&str> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| bracket_span(text, open, close))
        .collect();
    if spans.is_empty() {
        return Err(Error::Analysis(format!("no JSON in response: {}", preview(text))));
    }
    spans.sort_by_key(|span| std::cmp::Reverse(span.len()));

    let mut last_err = None;
    for span in spans {
        match serde_json::from_str::<Value>(span) {
            Ok(value) => return Ok(value),
            Err(e) => last_err = Some(e),
        }
    }
    Err(Error::Analysis(format!(
        "invalid JSON in response: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the language tag line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// From the first `open` to the last `close`
fn bracket_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(80).collect();
    if text.chars().count() > 80 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_object() {
        let raw = "```json\n{\"summary\": \"Flooding in Valencia\", \"importance\": 4}\n```";
        let value = parse_json(raw).unwrap();
        assert_eq!(value["importance"], 4);
    }

    #[test]
    fn test_object_with_surrounding_prose() {
        let raw = "Here is the analysis:\n{\"title\": \"A {nested} title\"}\nHope this helps.";
        let value = parse_json(raw).unwrap();
        assert_eq!(value["title"], "A {nested} title");
    }

    #[test]
    fn test_object_after_bracketed_prose() {
        let raw = "As noted in [1]: {\"summary\": \"Flooding\", \"importance\": 2}";
        let value = parse_json(raw).unwrap();
        assert_eq!(value["summary"], "Flooding");

        let nested = parse_json("[{\"a\": 1}, {\"a\": 2}]").unwrap();
        assert_eq!(nested.as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn test_array_response() {
        let value = parse_json("[1, 2, 3]").unwrap();
        assert_eq!(value.as_array().map(|a| a.len()), Some(3));
    }

    #[test]
    fn test_empty_and_non_json_are_errors() {
        assert!(matches!(parse_json("   "), Err(Error::Analysis(_))));
        assert!(matches!(parse_json("```\n```"), Err(Error::Analysis(_))));
        assert!(matches!(
            parse_json("I cannot analyse this video."),
            Err(Error::Analysis(_))
        ));
        assert!(matches!(parse_json("{not json}"), Err(Error::Analysis(_))));
    }
}
