use crate::cache::{cache_key, TtlCache};
use crate::llm::{GenerativeBackend, ModelInfo};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Used when the catalog cannot be listed or offers nothing usable.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_MODEL_TTL: Duration = Duration::from_secs(3600);

/// Named fast-tier models, most preferred first. Ids must match the catalog exactly so that
/// preview, TTS, or image variants of the same family are never picked.
pub const FAST_TIER: &[&str] = &["gemini-1.5-flash", "gemini-2.0-flash"];

enum Rule {
    Named(&'static [&'static str]),
    AnyGenerator,
}

impl Rule {
    fn pick<'a>(&self, models: &'a [ModelInfo]) -> Option<&'a ModelInfo> {
        let mut generators = models.iter().filter(|m| m.supports_generation);
        match self {
            Self::Named(ids) => ids
                .iter()
                .find_map(|id| generators.clone().find(|m| m.id == *id)),
            Self::AnyGenerator => generators.next(),
        }
    }
}

struct Preference {
    label: &'static str,
    rule: Rule,
}

/// Evaluated in order; the first preference with a match wins.
const PREFERENCES: &[Preference] = &[
    Preference {
        label: "fast tier",
        rule: Rule::Named(FAST_TIER),
    },
    Preference {
        label: "any generation-capable",
        rule: Rule::AnyGenerator,
    },
];

pub fn choose_model(models: &[ModelInfo]) -> Option<&ModelInfo> {
    PREFERENCES.iter().find_map(|pref| {
        let found = pref.rule.pick(models);
        if let Some(m) = found {
            tracing::debug!(model = %m.id, preference = pref.label, "model preference matched");
        }
        found
    })
}

/// Resolves and caches the model to use per API key.
#[derive(Debug, Clone)]
pub struct ModelResolver {
    cache: TtlCache<String>,
    ttl: Duration,
}

impl Default for ModelResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_TTL)
    }
}

impl ModelResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(),
            ttl,
        }
    }

    pub async fn resolve(&self, backend: &dyn GenerativeBackend, api_key: &str) -> String {
        let fingerprint = key_fingerprint(api_key);
        let key = cache_key("model", &[backend.name(), fingerprint.as_str()]);
        self.cache
            .get_or_compute(&key, self.ttl, || async {
                match backend.list_models(api_key).await {
                    Ok(models) => match choose_model(&models) {
                        Some(m) => m.id.clone(),
                        None => {
                            tracing::warn!(
                                listed = models.len(),
                                fallback = DEFAULT_MODEL,
                                "no generation-capable model listed"
                            );
                            DEFAULT_MODEL.to_string()
                        }
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, fallback = DEFAULT_MODEL, "model listing failed");
                        DEFAULT_MODEL.to_string()
                    }
                }
            })
            .await
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }
}

// Keeps raw secrets out of cache keys.
fn key_fingerprint(api_key: &str) -> String {
    let mut hasher = DefaultHasher::new();
    api_key.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, supports_generation: bool) -> ModelInfo {
        ModelInfo {
            id: id.to_string(),
            supports_generation,
        }
    }

    #[test]
    fn prefers_fast_tier() {
        let models = [
            model("gemini-1.5-pro", true),
            model("gemini-1.5-flash", true),
            model("gemini-2.0-flash", true),
        ];
        assert_eq!(choose_model(&models).unwrap().id, "gemini-1.5-flash");
    }

    #[test]
    fn falls_back_to_any_generator() {
        let models = [model("text-embedding-004", false), model("gemini-1.5-pro", true)];
        assert_eq!(choose_model(&models).unwrap().id, "gemini-1.5-pro");
    }

    #[test]
    fn fast_tier_follows_declared_order_not_catalog_order() {
        let models = [
            model("gemini-2.0-flash", true),
            model("gemini-1.5-flash", true),
        ];
        assert_eq!(choose_model(&models).unwrap().id, "gemini-1.5-flash");
    }

    #[test]
    fn flash_variants_outside_the_tier_are_not_fast_tier() {
        let models = [
            model("gemini-2.5-flash-preview-tts", true),
            model("gemini-2.0-flash-exp-image-generation", true),
            model("gemini-2.0-flash", true),
        ];
        assert_eq!(choose_model(&models).unwrap().id, "gemini-2.0-flash");

        let models = [
            model("gemini-2.5-flash-preview-tts", false),
            model("gemini-1.5-pro", true),
        ];
        assert_eq!(choose_model(&models).unwrap().id, "gemini-1.5-pro");
    }

    #[test]
    fn ignores_flash_models_that_cannot_generate() {
        let models = [model("flash-embedder", false)];
        assert!(choose_model(&models).is_none());
    }

    #[test]
    fn fingerprint_is_stable_and_hides_key() {
        let a = key_fingerprint("secret-key");
        assert_eq!(a, key_fingerprint("secret-key"));
        assert_ne!(a, key_fingerprint("other-key"));
        assert!(!a.contains("secret"));
    }
}
