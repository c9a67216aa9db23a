//! Normalized API records, the input to graph construction.

use serde::{Deserialize, Serialize};

/// One observed API call.
///
/// Payload texts are kept raw: they may be empty, a null sentinel or invalid
/// JSON, none of which is an error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiRecord {
    pub tool_name: String,
    pub api_endpoint: String,
    pub source_system: String,
    #[serde(default)]
    pub input_payload: String,
    #[serde(default)]
    pub output_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curl_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ApiRecord {
    pub fn new(
        tool_name: impl Into<String>,
        api_endpoint: impl Into<String>,
        source_system: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            api_endpoint: api_endpoint.into(),
            source_system: source_system.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, payload: impl Into<String>) -> Self {
        self.input_payload = payload.into();
        self
    }

    pub fn with_output(mut self, payload: impl Into<String>) -> Self {
        self.output_response = payload.into();
        self
    }

    pub fn with_status(mut self, status_code: i64, success: bool) -> Self {
        self.status_code = Some(status_code);
        self.success = Some(success);
        self
    }

    /// Name of the first required field that is blank, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.tool_name.trim().is_empty() {
            Some("tool_name")
        } else if self.source_system.trim().is_empty() {
            Some("source_system")
        } else {
            None
        }
    }
}
