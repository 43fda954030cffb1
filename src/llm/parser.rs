//! Extraction of JSON payloads from free-form model output.
//!
//! Models wrap structured answers in prose or code fences. The parser tries,
//! in order: the whole text as JSON, the first fenced code block, and finally
//! the first balanced `{...}` object found by brace counting.

use serde_json::Value;

use crate::error::AgentError;

/// Pulls the first JSON object out of `text`.
pub fn extract_json(text: &str) -> Result<Value, AgentError> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Ok(value);
        }
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            return Ok(value);
        }
    }

    if let Some(candidate) = balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Ok(value);
        }
    }

    Err(AgentError::Llm(format!(
        "no JSON object found in model output ({} chars)",
        text.len()
    )))
}

/// Contents of the first ``` fence, tolerating a language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// First substring with balanced braces, respecting string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_json_parses() {
        let value = extract_json(r#"{"action": "continue", "confidence": 0.8}"#).unwrap();
        assert_eq!(value["action"], "continue");
    }

    #[test]
    fn fenced_json_parses() {
        let text = "Here is my analysis:\n```json\n{\"complete\": true}\n```\nDone.";
        assert_eq!(extract_json(text).unwrap(), json!({"complete": true}));
    }

    #[test]
    fn embedded_object_found_by_brace_counting() {
        let text = "I think the answer is {\"value\": {\"nested\": 1}} based on the scan.";
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"value": {"nested": 1}})
        );
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let text = r#"result: {"note": "use {curly} braces", "ok": true} trailing"#;
        assert_eq!(extract_json(text).unwrap()["ok"], json!(true));
    }

    #[test]
    fn prose_without_json_is_an_error() {
        assert!(extract_json("I could not determine anything useful.").is_err());
    }

    #[test]
    fn bare_scalar_is_not_accepted() {
        assert!(extract_json("42").is_err());
    }
}
