#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("AI backend error (stage={stage}, status={status}): {detail}")]
    Api {
        stage: &'static str,
        status: u16,
        detail: String,
    },
    #[error("AI backend request failed (stage={stage}): {detail}")]
    Transport { stage: &'static str, detail: String },
    #[error("AI backend response undecodable (stage={stage}): {detail}")]
    Decode { stage: &'static str, detail: String },
}

impl BackendError {
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Self::QuotaExhausted(_))
    }
}
