//! Best-effort JSON extraction from model completion text.
//!
//! Vision models are asked for a JSON object but frequently wrap it in prose
//! or a Markdown code fence. Rather than pattern-match on wrappers, this
//! scans for balanced `{...}` spans (brace depth tracked outside string
//! literals) and returns the first span that parses as a JSON object.

use serde_json::Value;

/// Find the first parseable JSON object embedded in `text`, if any
pub fn extract_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start?..=i];
                    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
                        return Some(value);
                    }
                    // Unparseable span; keep scanning after it
                    start = None;
                }
            }
            _ => {}
        }
    }

    None
}
