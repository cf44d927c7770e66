//! Generation capability boundary.
//!
//! A single synchronous call: `{model, prompt, inputText}` in,
//! `{success, content}` out. `content` must be a bare JSON object or array;
//! any surrounding prose is a [`ModelError::MalformedContent`], which the
//! retry policy treats as retryable.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};

/// Request sent to the generation capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Model selector.
    pub model: String,
    /// System instruction.
    #[serde(rename = "prompt")]
    pub system: String,
    pub input_text: String,
}

impl GenerationRequest {
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        input_text: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            input_text: input_text.into(),
        }
    }
}

/// Response returned by the generation capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub success: bool,
    #[serde(default)]
    pub content: String,
}

impl GenerationResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
        }
    }

    /// Content of a successful response, or `GenerationRejected`.
    pub fn into_content(self) -> ModelResult<String> {
        if self.success {
            Ok(self.content)
        } else {
            Err(ModelError::GenerationRejected {
                message: if self.content.is_empty() {
                    "service reported failure".to_string()
                } else {
                    self.content
                },
            })
        }
    }
}

/// Pluggable text generation backend.
///
/// Implementations must be `Send + Sync`; descriptor batches call the
/// capability from several worker threads.
pub trait GenerationCapability: Send + Sync + fmt::Debug {
    fn generate(&self, request: &GenerationRequest) -> ModelResult<GenerationResponse>;

    /// Short name for log lines.
    fn name(&self) -> &str {
        "generation"
    }
}

// ============================================================================
// Strict content parsing
// ============================================================================

/// Parse content that must be exactly one JSON object.
pub fn parse_json_object(content: &str) -> ModelResult<Map<String, Value>> {
    let trimmed = content.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return Err(ModelError::malformed(format!(
            "expected a JSON object, got: {}",
            preview(trimmed)
        )));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ModelError::malformed("content is not a JSON object")),
        Err(e) => Err(ModelError::malformed(format!("invalid JSON object: {e}"))),
    }
}

/// Parse content that must be exactly one JSON array.
pub fn parse_json_array(content: &str) -> ModelResult<Vec<Value>> {
    let trimmed = content.trim();
    if !(trimmed.starts_with('[') && trimmed.ends_with(']')) {
        return Err(ModelError::malformed(format!(
            "expected a JSON array, got: {}",
            preview(trimmed)
        )));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(ModelError::malformed("content is not a JSON array")),
        Err(e) => Err(ModelError::malformed(format!("invalid JSON array: {e}"))),
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 60;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}...")
    }
}

// ============================================================================
// HTTP client
// ============================================================================

#[cfg(feature = "http")]
pub use http::HttpGenerationClient;

#[cfg(feature = "http")]
pub(crate) use http::map_transport_error;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::config::GenerationConfig;

    /// Blocking HTTP client for the generation service.
    #[derive(Debug)]
    pub struct HttpGenerationClient {
        endpoint: String,
        timeout_secs: u64,
        client: reqwest::blocking::Client,
    }

    impl HttpGenerationClient {
        pub fn new(config: &GenerationConfig) -> ModelResult<Self> {
            let endpoint = config
                .endpoint
                .clone()
                .filter(|e| !e.trim().is_empty())
                .ok_or_else(|| ModelError::InvalidConfig {
                    message: "generation endpoint is not set".to_string(),
                })?;
            let client = reqwest::blocking::Client::builder()
                .timeout(config.timeout())
                .build()
                .map_err(|e| ModelError::InvalidConfig {
                    message: format!("failed to build HTTP client: {e}"),
                })?;
            Ok(Self {
                endpoint,
                timeout_secs: config.timeout_secs,
                client,
            })
        }

        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }
    }

    impl GenerationCapability for HttpGenerationClient {
        fn generate(&self, request: &GenerationRequest) -> ModelResult<GenerationResponse> {
            let response = self
                .client
                .post(&self.endpoint)
                .json(request)
                .send()
                .map_err(|e| map_transport_error(&self.endpoint, self.timeout_secs, e))?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().unwrap_or_default();
                return Err(ModelError::HttpStatus {
                    status: status.as_u16(),
                    message,
                });
            }
            response
                .json::<GenerationResponse>()
                .map_err(|e| ModelError::malformed(format!("unexpected response body: {e}")))
        }

        fn name(&self) -> &str {
            &self.endpoint
        }
    }

    pub(crate) fn map_transport_error(
        endpoint: &str,
        timeout_secs: u64,
        err: reqwest::Error,
    ) -> ModelError {
        if err.is_timeout() {
            ModelError::GenerationTimeout {
                endpoint: endpoint.to_string(),
                timeout_secs,
            }
        } else {
            ModelError::GenerationUnavailable {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}
