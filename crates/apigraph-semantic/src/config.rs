//! LLM provider configuration.

use crate::LlmError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const PROVIDER_ENV: &str = "APIGRAPH_LLM_PROVIDER";
pub const TIMEOUT_ENV: &str = "APIGRAPH_LLM_TIMEOUT_SECS";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAi,
    Anthropic,
    Ollama,
}

impl Provider {
    /// Probe order when no provider is named explicitly.
    pub const ALL: [Provider; 4] = [
        Provider::Gemini,
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Ollama,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
        }
    }

    /// Variable holding the API key (the host, for Ollama).
    pub fn key_env(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Ollama => "OLLAMA_HOST",
        }
    }

    pub fn model_env(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_MODEL",
            Provider::OpenAi => "OPENAI_MODEL",
            Provider::Anthropic => "ANTHROPIC_MODEL",
            Provider::Ollama => "OLLAMA_MODEL",
        }
    }

    pub fn base_url_env(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_BASE_URL",
            Provider::OpenAi => "OPENAI_BASE_URL",
            Provider::Anthropic => "ANTHROPIC_BASE_URL",
            Provider::Ollama => "OLLAMA_HOST",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.5-flash",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-5-haiku-latest",
            Provider::Ollama => "llama3.1",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Gemini => "https://generativelanguage.googleapis.com",
            Provider::OpenAi => "https://api.openai.com",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Ollama => "http://127.0.0.1:11434",
        }
    }

    fn needs_api_key(self) -> bool {
        !matches!(self, Provider::Ollama)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "ollama" | "local" => Ok(Provider::Ollama),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub provider: Provider,
    /// Empty for Ollama.
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Configuration for `provider` with default model and endpoint.
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: provider.default_model().to_string(),
            base_url: provider.default_base_url().to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Load from environment variables.
    ///
    /// `APIGRAPH_LLM_PROVIDER` picks the provider; otherwise the first
    /// provider whose key variable is set wins.
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`LlmConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LlmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let provider = match var(PROVIDER_ENV) {
            Some(name) => name.parse()?,
            None => Provider::ALL
                .into_iter()
                .find(|p| var(p.key_env()).is_some())
                .ok_or(LlmError::NoProviderConfigured)?,
        };

        let api_key = if provider.needs_api_key() {
            var(provider.key_env()).ok_or(LlmError::MissingApiKey {
                provider,
                var: provider.key_env(),
            })?
        } else {
            String::new()
        };

        let timeout_secs = match var(TIMEOUT_ENV) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| LlmError::InvalidTimeout(raw.clone()))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let base_url = var(provider.base_url_env())
            .map(|url| normalize_base_url(&url, provider))
            .unwrap_or_else(|| provider.default_base_url().to_string());

        Ok(Self {
            provider,
            api_key,
            model: var(provider.model_env()).unwrap_or_else(|| provider.default_model().to_string()),
            base_url,
            timeout_secs,
        })
    }

    /// `None` when the timeout is disabled (`0`).
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

fn normalize_base_url(raw: &str, provider: Provider) -> String {
    let mut url = raw.trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        let scheme = if provider == Provider::Ollama {
            "http"
        } else {
            "https"
        };
        url = format!("{scheme}://{url}");
    }
    url.trim_end_matches('/').to_string()
}
