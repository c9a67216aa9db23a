//! Blocking chat-completion calls, one per provider.

use crate::config::{LlmConfig, Provider};
use crate::LlmError;
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 4096;

// JSON modes of these providers only allow a top-level object.
const OBJECT_WRAPPER_HINT: &str =
    "\nWrap the array in a JSON object under the key \"matches\", e.g. {\"matches\": []}.\n";

/// Send `prompt` to the configured provider and return the raw model text.
pub fn complete(config: &LlmConfig, prompt: &str) -> Result<String, LlmError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| LlmError::Http(format!("failed to build http client: {e}")))?;

    tracing::debug!(
        provider = %config.provider,
        model = %config.model,
        prompt_chars = prompt.len(),
        "sending LLM request"
    );

    match config.provider {
        Provider::Gemini => gemini(&client, config, prompt),
        Provider::OpenAi => openai(&client, config, prompt),
        Provider::Anthropic => anthropic(&client, config, prompt),
        Provider::Ollama => ollama(&client, config, prompt),
    }
}

fn send(request: reqwest::blocking::RequestBuilder, provider: Provider) -> Result<Value, LlmError> {
    let resp = request
        .send()
        .map_err(|e| LlmError::Http(format!("failed to reach {provider}: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(LlmError::Api {
            provider,
            status: status.as_u16(),
            body,
        });
    }

    resp.json::<Value>()
        .map_err(|e| LlmError::InvalidResponse(format!("{provider} returned invalid JSON: {e}")))
}

// =============================================================================
// Gemini
// =============================================================================

fn gemini(
    client: &reqwest::blocking::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<String, LlmError> {
    let url = format!(
        "{}/v1beta/models/{}:generateContent",
        config.base_url, config.model
    );
    let body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "temperature": 0,
            "responseMimeType": "application/json"
        }
    });

    let resp = send(
        client
            .post(&url)
            .header("x-goog-api-key", &config.api_key)
            .json(&body),
        Provider::Gemini,
    )?;
    gemini_text(&resp).ok_or_else(|| missing_text(Provider::Gemini))
}

pub(crate) fn gemini_text(resp: &Value) -> Option<String> {
    let parts = resp
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    join_text(parts.iter().filter_map(|p| p.get("text")?.as_str()))
}

// =============================================================================
// OpenAI-compatible chat completions
// =============================================================================

fn openai(
    client: &reqwest::blocking::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<String, LlmError> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let body = json!({
        "model": config.model,
        "temperature": 0,
        "response_format": { "type": "json_object" },
        "messages": [{ "role": "user", "content": format!("{prompt}{OBJECT_WRAPPER_HINT}") }]
    });

    let resp = send(
        client.post(&url).bearer_auth(&config.api_key).json(&body),
        Provider::OpenAi,
    )?;
    openai_text(&resp).ok_or_else(|| missing_text(Provider::OpenAi))
}

pub(crate) fn openai_text(resp: &Value) -> Option<String> {
    resp.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

// =============================================================================
// Anthropic messages
// =============================================================================

fn anthropic(
    client: &reqwest::blocking::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<String, LlmError> {
    let url = format!("{}/v1/messages", config.base_url);
    let body = json!({
        "model": config.model,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "temperature": 0,
        "messages": [{ "role": "user", "content": prompt }]
    });

    let resp = send(
        client
            .post(&url)
            .header("x-api-key", &config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body),
        Provider::Anthropic,
    )?;
    anthropic_text(&resp).ok_or_else(|| missing_text(Provider::Anthropic))
}

pub(crate) fn anthropic_text(resp: &Value) -> Option<String> {
    let blocks = resp.get("content")?.as_array()?;
    join_text(
        blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text")?.as_str()),
    )
}

// =============================================================================
// Ollama
// =============================================================================

fn ollama(
    client: &reqwest::blocking::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<String, LlmError> {
    let url = format!("{}/api/chat", config.base_url);
    let body = json!({
        "model": config.model,
        "stream": false,
        "format": "json",
        "messages": [{ "role": "user", "content": format!("{prompt}{OBJECT_WRAPPER_HINT}") }],
        "options": { "temperature": 0 }
    });

    let resp = send(client.post(&url).json(&body), Provider::Ollama)?;
    ollama_text(&resp).ok_or_else(|| missing_text(Provider::Ollama))
}

pub(crate) fn ollama_text(resp: &Value) -> Option<String> {
    resp.get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

fn join_text<'a>(parts: impl Iterator<Item = &'a str>) -> Option<String> {
    let text: String = parts.collect();
    (!text.is_empty()).then_some(text)
}

fn missing_text(provider: Provider) -> LlmError {
    LlmError::InvalidResponse(format!("{provider} response has no text content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_gemini_parts() {
        let resp = json!({
            "candidates": [{ "content": { "parts": [{ "text": "[" }, { "text": "]" }] } }]
        });
        assert_eq!(gemini_text(&resp).as_deref(), Some("[]"));
        assert_eq!(gemini_text(&json!({ "candidates": [] })), None);
    }

    #[test]
    fn extracts_openai_content() {
        let resp = json!({ "choices": [{ "message": { "role": "assistant", "content": "{\"matches\": []}" } }] });
        assert_eq!(openai_text(&resp).as_deref(), Some("{\"matches\": []}"));
    }

    #[test]
    fn extracts_only_anthropic_text_blocks() {
        let resp = json!({
            "content": [
                { "type": "thinking", "thinking": "hmm" },
                { "type": "text", "text": "[]" }
            ]
        });
        assert_eq!(anthropic_text(&resp).as_deref(), Some("[]"));
        assert_eq!(anthropic_text(&json!({ "content": [] })), None);
    }

    #[test]
    fn extracts_ollama_message() {
        let resp = json!({ "message": { "role": "assistant", "content": "[]" }, "done": true });
        assert_eq!(ollama_text(&resp).as_deref(), Some("[]"));
    }
}
