//! LLM-backed semantic flow suggestions.
//!
//! [`LlmSemanticMatcher`] implements [`FlowEnricher`]: it describes every
//! tool in a single prompt, asks the model which outputs carry the same data
//! as which inputs, and parses the answer leniently. Supported providers are
//! Gemini, OpenAI-compatible endpoints, Anthropic and Ollama.
//!
//! Suggestions are best-effort. Callers go through
//! [`apigraph_core::enrich_graph`], which contains any failure.

pub mod backends;
pub mod config;
pub mod parse;
pub mod prompt;

pub use config::{LlmConfig, Provider};
pub use parse::parse_matches;
pub use prompt::build_prompt;

use apigraph_core::{FlowEnricher, SemanticMatch, ToolSummary};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error(
        "no LLM provider configured; set GEMINI_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY or OLLAMA_HOST"
    )]
    NoProviderConfigured,

    #[error("unknown LLM provider `{0}` (expected gemini, openai, anthropic or ollama)")]
    UnknownProvider(String),

    #[error("{provider} selected but {var} is not set")]
    MissingApiKey {
        provider: Provider,
        var: &'static str,
    },

    #[error("invalid APIGRAPH_LLM_TIMEOUT_SECS={0:?} (expected whole seconds)")]
    InvalidTimeout(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("{provider} http error {status}: {body}")]
    Api {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub struct LlmSemanticMatcher {
    config: LlmConfig,
    label: String,
}

impl LlmSemanticMatcher {
    pub fn new(config: LlmConfig) -> Self {
        let label = format!("{}:{}", config.provider, config.model);
        Self { config, label }
    }

    pub fn from_env() -> Result<Self, LlmError> {
        Ok(Self::new(LlmConfig::from_env()?))
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

impl FlowEnricher for LlmSemanticMatcher {
    fn name(&self) -> &str {
        &self.label
    }

    fn suggest(&self, tools: &[ToolSummary]) -> anyhow::Result<Vec<SemanticMatch>> {
        if tools.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(tools = tools.len(), matcher = %self.label, "requesting semantic matches");

        let prompt = build_prompt(tools);
        let text = backends::complete(&self.config, &prompt)?;
        let matches = parse_matches(&text);

        tracing::info!(matches = matches.len(), "semantic matches parsed");
        Ok(matches)
    }
}
