pub mod cache;
pub mod domain;
pub mod engine;
pub mod ingest;
pub mod llm;
pub mod retry;

pub mod config {
    use std::str::FromStr;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub gemini_api_key: Option<String>,
        pub gemini_base_url: Option<String>,
        pub quote_base_url: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                gemini_api_key: non_empty_var("GEMINI_API_KEY"),
                gemini_base_url: non_empty_var("GEMINI_BASE_URL"),
                quote_base_url: non_empty_var("QUOTE_BASE_URL"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
            })
        }
    }

    /// Parses `key` from the environment, falling back to `default` when unset or invalid.
    pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
        std::env::var(key)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
            .unwrap_or(default)
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }
}
