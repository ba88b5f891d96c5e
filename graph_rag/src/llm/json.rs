//! Recovery of JSON objects from free-form generator output.
//!
//! Generators wrap JSON in code fences or surround it with prose. Parsing is
//! attempted on the raw text, then on the fence-stripped text, then on the
//! first balanced `{...}` block. Callers pick their own safe default when all
//! three fail.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::errors::{GraphError, GraphResult};

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)\s*```").unwrap();
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fences(raw: &str) -> &str {
    CODE_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim()
}

/// First balanced `{...}` block, ignoring braces inside string literals.
pub fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort extraction of a JSON value from generator output.
pub fn salvage_json(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let unfenced = strip_code_fences(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Some(value);
    }
    first_balanced_object(unfenced).and_then(|block| serde_json::from_str(block).ok())
}

/// Salvage and deserialize into `T`, reporting the raw text on failure.
pub fn parse_salvaged<T: DeserializeOwned>(raw: &str) -> GraphResult<T> {
    let value = salvage_json(raw).ok_or_else(|| GraphError::MalformedOutput(preview(raw)))?;
    serde_json::from_value(value).map_err(|e| GraphError::MalformedOutput(format!("{}: {}", e, preview(raw))))
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Rewrite {
        question: String,
    }

    #[test]
    fn test_plain_json() {
        assert_eq!(salvage_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn test_fenced_json() {
        let raw = "```json\n{\"question\": \"Who directed Heat?\"}\n```";
        let parsed: Rewrite = parse_salvaged(raw).unwrap();
        assert_eq!(parsed.question, "Who directed Heat?");
    }

    #[test]
    fn test_json_inside_prose() {
        let raw = "Sure! Here it is: {\"title\": \"A {tricky} one\", \"n\": {\"x\": \"}\"}} Hope it helps.";
        assert_eq!(
            salvage_json(raw),
            Some(json!({"title": "A {tricky} one", "n": {"x": "}"}}))
        );
    }

    #[test]
    fn test_escaped_quotes_in_strings() {
        let raw = r#"note {"q": "say \"hi\" }"} tail"#;
        assert_eq!(salvage_json(raw), Some(json!({"q": "say \"hi\" }"})));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(salvage_json("no json at all").is_none());
        assert!(salvage_json("{ unterminated").is_none());
        assert!(matches!(
            parse_salvaged::<Rewrite>("{\"other\": 1}"),
            Err(GraphError::MalformedOutput(_))
        ));
    }
}
