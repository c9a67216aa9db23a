//! Lenient parsing of model responses into semantic matches.

use apigraph_core::SemanticMatch;
use serde_json::Value;

/// Parse a model response.
///
/// Accepts a bare JSON array, an object carrying the array under `matches`,
/// or either of those embedded in surrounding prose or code fences. Items
/// that do not have the expected shape are skipped one by one. A response
/// with no usable array yields an empty list.
pub fn parse_matches(text: &str) -> Vec<SemanticMatch> {
    let Some(items) = find_match_array(text) else {
        tracing::warn!("model response contains no JSON array of matches");
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let parsed = parse_item(item);
            if parsed.is_none() {
                tracing::warn!(index, "skipping malformed semantic match");
            }
            parsed
        })
        .collect()
}

fn find_match_array(text: &str) -> Option<Vec<Value>> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(items) = unwrap_array(value) {
            return Some(items);
        }
    }

    // Embedded in prose: try each balanced JSON value in turn.
    let mut offset = 0;
    while let Some((start, end)) = next_balanced(&trimmed[offset..]) {
        let candidate = &trimmed[offset + start..=offset + end];
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if let Some(items) = unwrap_array(value) {
                return Some(items);
            }
        }
        offset += start + 1;
    }
    None
}

fn unwrap_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove("matches") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Byte range of the first bracket-balanced `[...]` or `{...}` in `text`,
/// ignoring brackets inside strings.
fn next_balanced(text: &str) -> Option<(usize, usize)> {
    let start = text.find(|c: char| c == '[' || c == '{')?;
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + idx));
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_item(item: &Value) -> Option<SemanticMatch> {
    let text = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let confidence = match item.get("confidence")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };

    Some(SemanticMatch {
        source_tool: text("output_tool")?,
        target_tool: text("input_tool")?,
        output_param: text("output_param")?,
        input_param: text("input_param")?,
        confidence,
        reasoning: text("reasoning").unwrap_or_default(),
    })
}
