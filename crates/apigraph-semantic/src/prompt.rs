//! Prompt construction.

use apigraph_core::ToolSummary;
use std::fmt::Write;

/// Keys listed per tool and direction before the rest is summarised.
pub const MAX_KEYS_PER_LIST: usize = 10;

const INSTRUCTIONS: &str = r#"You are analyzing an API ecosystem to find EXACT semantic matches between parameters.

Your task: identify which output parameters of one API carry THE SAME DATA as input parameters of another API.

Rules:
1. Only match parameters that hold the exact same field or value
2. Abbreviations count (e.g. "id" = "identifier")
3. Synonyms count (e.g. "customer_name" = "client_name")
4. Naming conventions do not matter (e.g. "user_id" vs "userId")
5. Do not match fields that are merely related
6. Only report matches with confidence >= 0.8

API tools and their parameters:
"#;

const RESPONSE_FORMAT: &str = r#"
Return ONLY a JSON array of matches, for example:
[
  {
    "output_param": "order_id",
    "output_tool": "orders.create_order",
    "input_param": "order_number",
    "input_tool": "shipping.track_order",
    "confidence": 0.95,
    "reasoning": "order_id and order_number name the same order identifier"
  }
]

Return [] if there is no confident match.
"#;

/// Single-shot prompt describing every tool.
pub fn build_prompt(tools: &[ToolSummary]) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    for tool in tools {
        let _ = writeln!(prompt, "\n## {}", tool.tool_id);
        let _ = writeln!(prompt, "System: {}", tool.source_system);
        let _ = writeln!(prompt, "Endpoint: {}", tool.endpoint);
        if !tool.input_keys.is_empty() {
            let _ = writeln!(prompt, "Inputs: {}", key_list(&tool.input_keys));
        }
        if !tool.output_keys.is_empty() {
            let _ = writeln!(prompt, "Outputs: {}", key_list(&tool.output_keys));
        }
    }
    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

fn key_list(keys: &[String]) -> String {
    let shown = keys
        .iter()
        .take(MAX_KEYS_PER_LIST)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    match keys.len().checked_sub(MAX_KEYS_PER_LIST) {
        Some(rest) if rest > 0 => format!("{shown} ... +{rest} more"),
        _ => shown,
    }
}
