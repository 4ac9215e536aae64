pub mod caller;
pub mod error;
pub mod gemini;
pub mod resolver;

use crate::llm::error::BackendError;
use serde::{Deserialize, Serialize};

/// One entry of the backend's model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Identifier accepted by [`GenerativeBackend::generate`].
    pub id: String,
    pub supports_generation: bool,
}

/// A completed generate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    Text(String),
    /// The backend declined to answer, or answered with nothing.
    Blocked(String),
}

/// Outcome of a text-generation request, always returned as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AiResult {
    Ok(String),
    SafetyBlocked(String),
    QuotaExhausted,
    Error(String),
    /// The AI path is not configured (e.g. no API key).
    Unavailable(String),
}

impl AiResult {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Ok(text) => Some(text),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
pub trait GenerativeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_models(&self, api_key: &str) -> Result<Vec<ModelInfo>, BackendError>;

    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<Generation, BackendError>;
}
