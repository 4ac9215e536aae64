use crate::config::env_or;
use crate::llm::error::BackendError;
use crate::llm::resolver::{ModelResolver, DEFAULT_MODEL_TTL};
use crate::llm::{AiResult, GenerativeBackend, Generation};
use crate::retry::{RetryError, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONTEXT_CHARS: usize = 4000;

/// Text generation that retries quota exhaustion with backoff and reports every outcome
/// as an [`AiResult`].
pub struct ResilientCaller {
    backend: Arc<dyn GenerativeBackend>,
    resolver: ModelResolver,
    policy: RetryPolicy,
    context_chars: usize,
}

impl ResilientCaller {
    pub fn new(backend: Arc<dyn GenerativeBackend>, resolver: ModelResolver, policy: RetryPolicy) -> Self {
        Self {
            backend,
            resolver,
            policy,
            context_chars: DEFAULT_CONTEXT_CHARS,
        }
    }

    pub fn from_env(backend: Arc<dyn GenerativeBackend>) -> Self {
        let defaults = RetryPolicy::default();
        let policy = RetryPolicy {
            max_attempts: env_or("AI_MAX_ATTEMPTS", defaults.max_attempts),
            initial_delay: Duration::from_millis(env_or(
                "AI_INITIAL_BACKOFF_MS",
                defaults.initial_delay.as_millis() as u64,
            )),
            ..defaults
        };
        let model_ttl = Duration::from_secs(env_or("MODEL_TTL_SECS", DEFAULT_MODEL_TTL.as_secs()));

        Self::new(backend, ModelResolver::new(model_ttl), policy)
            .with_context_chars(env_or("AI_CONTEXT_CHARS", DEFAULT_CONTEXT_CHARS))
    }

    pub fn with_context_chars(mut self, context_chars: usize) -> Self {
        self.context_chars = context_chars;
        self
    }

    pub async fn generate(&self, prompt: &str, context: &str, api_key: &str) -> AiResult {
        let request = compose_prompt(prompt, context, self.context_chars);
        let request = request.as_str();
        let backend = self.backend.as_ref();

        let outcome = self
            .policy
            .run(
                move |attempt| async move {
                    let model = self.resolver.resolve(backend, api_key).await;
                    tracing::debug!(attempt, %model, backend = backend.name(), "generate attempt");
                    backend.generate(api_key, &model, request).await
                },
                BackendError::is_quota_exhausted,
            )
            .await;

        match outcome {
            Ok(Generation::Text(text)) => AiResult::Ok(text),
            Ok(Generation::Blocked(reason)) => {
                tracing::info!(%reason, "generation blocked by backend");
                AiResult::SafetyBlocked(reason)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::warn!(attempts, error = %last, "quota still exhausted; giving up");
                AiResult::QuotaExhausted
            }
            Err(RetryError::Permanent(err)) => {
                tracing::warn!(error = %err, "generation failed");
                AiResult::Error(err.to_string())
            }
        }
    }

    pub async fn clear_model_cache(&self) {
        self.resolver.clear().await;
    }
}

/// Joins a bounded prefix of `context` with the user's prompt.
pub fn compose_prompt(prompt: &str, context: &str, max_context_chars: usize) -> String {
    let context: String = context.chars().take(max_context_chars).collect();
    if context.trim().is_empty() {
        return prompt.to_string();
    }
    format!("Market data snapshot:\n{context}\n\nQuestion: {prompt}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::resolver::DEFAULT_MODEL;
    use crate::llm::ModelInfo;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted generate outcomes; once the script runs out it keeps returning the
    /// last one.
    struct ScriptedBackend {
        models: Result<Vec<ModelInfo>, BackendError>,
        script: Mutex<VecDeque<Result<Generation, BackendError>>>,
        last: Mutex<Option<Result<Generation, BackendError>>>,
        list_calls: Mutex<u32>,
        generated: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<Generation, BackendError>>) -> Self {
            Self {
                models: Ok(vec![
                    ModelInfo {
                        id: "gemini-1.5-pro".to_string(),
                        supports_generation: true,
                    },
                    ModelInfo {
                        id: "gemini-1.5-flash".to_string(),
                        supports_generation: true,
                    },
                ]),
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                list_calls: Mutex::new(0),
                generated: Mutex::new(Vec::new()),
            }
        }

        fn failing_catalog(mut self) -> Self {
            self.models = Err(BackendError::Transport {
                stage: "list_models",
                detail: "connection reset".to_string(),
            });
            self
        }

        fn generate_calls(&self) -> usize {
            self.generated.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl GenerativeBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn list_models(&self, _api_key: &str) -> Result<Vec<ModelInfo>, BackendError> {
            *self.list_calls.lock().unwrap() += 1;
            self.models.clone()
        }

        async fn generate(
            &self,
            _api_key: &str,
            model: &str,
            prompt: &str,
        ) -> Result<Generation, BackendError> {
            self.generated
                .lock()
                .unwrap()
                .push((model.to_string(), prompt.to_string()));
            let next = self.script.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = next {
                *last = Some(next);
            }
            last.clone().unwrap_or_else(|| Ok(Generation::Text("ok".to_string())))
        }
    }

    fn quota() -> Result<Generation, BackendError> {
        Err(BackendError::QuotaExhausted("Quota exceeded".to_string()))
    }

    fn caller(backend: Arc<ScriptedBackend>) -> ResilientCaller {
        ResilientCaller::new(
            backend,
            ModelResolver::default(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn persistent_quota_exhaustion_ends_in_quota_exhausted() {
        let backend = Arc::new(ScriptedBackend::new(vec![quota()]));
        let result = caller(backend.clone()).generate("why?", "[]", "key").await;

        assert_eq!(result, AiResult::QuotaExhausted);
        assert_eq!(backend.generate_calls(), 3);
    }

    #[tokio::test]
    async fn recovers_after_quota_backoff() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            quota(),
            Ok(Generation::Text("Banks led the move.".to_string())),
        ]));
        let result = caller(backend.clone()).generate("why?", "", "key").await;

        assert_eq!(result, AiResult::Ok("Banks led the move.".to_string()));
        assert_eq!(backend.generate_calls(), 2);
    }

    #[tokio::test]
    async fn safety_block_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(Generation::Blocked(
            "SAFETY".to_string(),
        ))]));
        let result = caller(backend.clone()).generate("why?", "", "key").await;

        assert_eq!(result, AiResult::SafetyBlocked("SAFETY".to_string()));
        assert_eq!(backend.generate_calls(), 1);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(BackendError::Api {
            stage: "generate",
            status: 400,
            detail: "bad request".to_string(),
        })]));
        let result = caller(backend.clone()).generate("why?", "", "key").await;

        assert!(matches!(result, AiResult::Error(ref m) if m.contains("bad request")), "{result:?}");
        assert_eq!(backend.generate_calls(), 1);
    }

    #[tokio::test]
    async fn uses_preferred_model_and_caches_choice() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let caller = caller(backend.clone());
        caller.generate("a", "", "key").await;
        caller.generate("b", "", "key").await;

        assert_eq!(*backend.list_calls.lock().unwrap(), 1);
        let generated = backend.generated.lock().unwrap();
        assert!(generated.iter().all(|(model, _)| model == "gemini-1.5-flash"));
    }

    #[tokio::test]
    async fn catalog_failure_falls_back_to_default_model() {
        let backend = Arc::new(ScriptedBackend::new(vec![]).failing_catalog());
        let result = caller(backend.clone()).generate("a", "", "key").await;

        assert_eq!(result, AiResult::Ok("ok".to_string()));
        assert_eq!(backend.generated.lock().unwrap()[0].0, DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn context_is_truncated_before_sending() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let caller = caller(backend.clone()).with_context_chars(10);
        let context = "x".repeat(100);
        caller.generate("What moved?", &context, "key").await;

        let prompt = backend.generated.lock().unwrap()[0].1.clone();
        assert!(prompt.contains(&"x".repeat(10)));
        assert!(!prompt.contains(&"x".repeat(11)));
        assert!(prompt.ends_with("What moved?"));
    }

    #[test]
    fn compose_prompt_respects_char_boundaries() {
        let out = compose_prompt("q", "₹₹₹₹", 2);
        assert!(out.contains("₹₹\n"));
        assert_eq!(compose_prompt("q", "   ", 10), "q");
    }
}
