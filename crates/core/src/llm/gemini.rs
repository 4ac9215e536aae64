use crate::config::{env_or, Settings};
use crate::llm::error::BackendError;
use crate::llm::{GenerativeBackend, Generation, ModelInfo};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const API_KEY_HEADER: &str = "x-goog-api-key";
const GENERATE_METHOD: &str = "generateContent";
const QUOTA_STATUS: &str = "RESOURCE_EXHAUSTED";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings
            .gemini_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = env_or("GEMINI_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1beta/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(api_key: &str, stage: &'static str) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(api_key).map_err(|_| BackendError::Api {
            stage,
            status: 0,
            detail: "API key is not a valid header value".to_string(),
        })?;
        headers.insert(API_KEY_HEADER, value);
        Ok(headers)
    }

    async fn read_body(
        res: reqwest::Response,
        stage: &'static str,
    ) -> Result<String, BackendError> {
        let status = res.status();
        let text = res.text().await.map_err(|e| BackendError::Transport {
            stage,
            detail: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(classify_error(stage, status.as_u16(), &text));
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl GenerativeBackend for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn list_models(&self, api_key: &str) -> Result<Vec<ModelInfo>, BackendError> {
        const STAGE: &str = "list_models";
        let res = self
            .http
            .get(self.url("models"))
            .headers(Self::headers(api_key, STAGE)?)
            .query(&[("pageSize", "200")])
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                stage: STAGE,
                detail: e.to_string(),
            })?;

        let text = Self::read_body(res, STAGE).await?;
        parse_models(&text)
    }

    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<Generation, BackendError> {
        const STAGE: &str = "generate";
        let req = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let path = format!("models/{}:{GENERATE_METHOD}", model_id(model));
        let res = self
            .http
            .post(self.url(&path))
            .headers(Self::headers(api_key, STAGE)?)
            .json(&req)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                stage: STAGE,
                detail: e.to_string(),
            })?;

        let text = Self::read_body(res, STAGE).await?;
        let parsed = serde_json::from_str::<GenerateResponse>(&text).map_err(|e| {
            BackendError::Decode {
                stage: STAGE,
                detail: e.to_string(),
            }
        })?;
        Ok(interpret_generation(parsed))
    }
}

/// Strips the catalog's `models/` prefix.
fn model_id(name: &str) -> &str {
    name.strip_prefix("models/").unwrap_or(name)
}

fn parse_models(text: &str) -> Result<Vec<ModelInfo>, BackendError> {
    let parsed = serde_json::from_str::<ListModelsResponse>(text).map_err(|e| {
        BackendError::Decode {
            stage: "list_models",
            detail: e.to_string(),
        }
    })?;

    Ok(parsed
        .models
        .into_iter()
        .map(|m| ModelInfo {
            id: model_id(&m.name).to_string(),
            supports_generation: m
                .supported_generation_methods
                .iter()
                .any(|method| method == GENERATE_METHOD),
        })
        .collect())
}

fn classify_error(stage: &'static str, status: u16, body: &str) -> BackendError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let (api_status, message) = match envelope {
        Some(ErrorEnvelope { error }) => (error.status, error.message),
        None => (None, None),
    };
    let detail = message.unwrap_or_else(|| body.chars().take(300).collect());

    if status == 429 || api_status.as_deref() == Some(QUOTA_STATUS) {
        return BackendError::QuotaExhausted(detail);
    }
    BackendError::Api {
        stage,
        status,
        detail,
    }
}

fn interpret_generation(res: GenerateResponse) -> Generation {
    if let Some(reason) = res.prompt_feedback.and_then(|f| f.block_reason) {
        return Generation::Blocked(reason);
    }

    let Some(candidate) = res.candidates.into_iter().next() else {
        return Generation::Blocked("no candidates returned".to_string());
    };

    let mut out = String::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&text);
        }
    }

    if out.trim().is_empty() {
        let reason = candidate
            .finish_reason
            .unwrap_or_else(|| "empty response".to_string());
        return Generation::Blocked(reason);
    }
    Generation::Text(out)
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}
