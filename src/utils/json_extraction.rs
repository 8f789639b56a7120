//! JSON extraction from LLM responses.
//!
//! Collaborator models are asked to reply with a single JSON object, but in
//! practice replies arrive wrapped in markdown fences or surrounded by prose.
//! Extraction tries, in order:
//!
//! 1. the whole reply as JSON,
//! 2. the first fenced code block (```json or bare ```),
//! 3. the first brace-balanced object found by bracket matching.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("No JSON object found in response (content starts with: '{preview}')")]
    NotFound { preview: String },

    #[error("JSON appears truncated: {unclosed} unclosed braces")]
    Truncated { unclosed: usize },
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence regex is valid")
    })
}

/// Extracts a JSON object from mixed LLM output.
///
/// Returns the extracted JSON text; callers parse it with `serde_json`.
pub fn extract_json(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    // Strategy 1: the reply is already bare JSON.
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    // Strategy 2: fenced code block.
    if let Some(caps) = fence_re().captures(trimmed) {
        let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        if inner.starts_with('{') {
            return balanced_object(inner);
        }
    }

    // Strategy 3: first balanced object anywhere in the content.
    if let Some(start) = trimmed.find('{') {
        return balanced_object(&trimmed[start..]);
    }

    Err(JsonExtractionError::NotFound {
        preview: preview(trimmed),
    })
}

/// Returns the shortest brace-balanced prefix of `content` starting at '{'.
///
/// Tracks string literals and escapes so braces inside quoted values do not
/// affect the balance.
fn balanced_object(content: &str) -> Result<String, JsonExtractionError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in content.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Ok(content[..=idx].to_string());
                }
            }
            _ => {}
        }
    }

    if depth > 0 {
        Err(JsonExtractionError::Truncated { unclosed: depth })
    } else {
        Err(JsonExtractionError::NotFound {
            preview: preview(content),
        })
    }
}

fn preview(content: &str) -> String {
    content.chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bare_json() {
        let json = extract_json(r#"{"category": "summary"}"#).unwrap();
        assert_eq!(json, r#"{"category": "summary"}"#);
    }

    #[test]
    fn test_extract_from_fenced_block() {
        let content = "Here is the intent:\n```json\n{\"category\": \"correlation\"}\n```\nDone.";
        let json = extract_json(content).unwrap();
        assert_eq!(json, r#"{"category": "correlation"}"#);
    }

    #[test]
    fn test_extract_from_bare_fence() {
        let content = "```\n{\"category\": \"summary\"}\n```";
        let json = extract_json(content).unwrap();
        assert_eq!(json, r#"{"category": "summary"}"#);
    }

    #[test]
    fn test_extract_embedded_object() {
        let content = "The parsed intent is {\"category\": \"distribution\", \"target\": \"age\"} as requested.";
        let json = extract_json(content).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["target"], "age");
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let content = r#"{"note": "a { tricky } value", "category": "summary"}"#;
        let json = extract_json(content).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["category"], "summary");
    }

    #[test]
    fn test_nested_objects() {
        let content = r#"result: {"outer": {"inner": 1}, "k": 2} trailing"#;
        let json = extract_json(content).unwrap();
        assert_eq!(json, r#"{"outer": {"inner": 1}, "k": 2}"#);
    }

    #[test]
    fn test_truncated_object() {
        let err = extract_json(r#"{"category": "summary""#).unwrap_err();
        assert!(matches!(err, JsonExtractionError::Truncated { unclosed: 1 }));
    }

    #[test]
    fn test_no_json_at_all() {
        let err = extract_json("I could not determine the intent.").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
    }
}
