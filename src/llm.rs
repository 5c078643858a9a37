//! LLM provider abstraction
//!
//! Transport for the reasoning oracle. The orchestrator never sees these
//! types directly; it talks to `runtime::ReasoningOracle`.

mod error;
mod gemini;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use gemini::{GeminiService, DEFAULT_GEMINI_MODEL};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Configuration for the LLM provider
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub gemini_api_key: Option<String>,
    /// Optional gateway base URL that fronts the provider API
    pub gateway: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            gateway: std::env::var("LLM_GATEWAY").ok().filter(|g| !g.is_empty()),
        }
    }

    /// Build the provider for `model`, wrapped in request logging
    pub fn build_service(&self, model: &str) -> Result<Arc<dyn LlmService>, LlmError> {
        let api_key = match (&self.gemini_api_key, &self.gateway) {
            (Some(key), _) => key.clone(),
            // Gateways authenticate on their own
            (None, Some(_)) => "implicit".to_string(),
            (None, None) => {
                return Err(LlmError::auth("GEMINI_API_KEY environment variable not set."))
            }
        };
        let service = GeminiService::new(api_key, model, self.gateway.as_deref())?;
        Ok(Arc::new(LoggingService::new(Arc::new(service))))
    }
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
