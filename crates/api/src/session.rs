use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use movers_core::domain::market::Symbol;
use movers_core::llm::AiResult;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const SESSION_HEADER: &str = "x-session-id";

// Oldest turns are dropped past this length.
const MAX_TRANSCRIPT_TURNS: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub at: DateTime<Utc>,
    pub prompt: String,
    pub result: AiResult,
}

/// State owned by one client session; never shared across sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub id: Uuid,
    pub selected: Option<Symbol>,
    pub transcript: Vec<ChatTurn>,
}

impl SessionContext {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            selected: None,
            transcript: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<Uuid, SessionContext>>>,
}

impl SessionStore {
    /// Session id from the request headers, or a fresh one when absent or malformed.
    pub fn session_id(headers: &HeaderMap) -> Uuid {
        headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .unwrap_or_else(Uuid::new_v4)
    }

    pub async fn snapshot(&self, id: Uuid) -> SessionContext {
        let map = self.inner.lock().await;
        map.get(&id)
            .cloned()
            .unwrap_or_else(|| SessionContext::new(id))
    }

    pub async fn select(&self, id: Uuid, symbol: Symbol) {
        let mut map = self.inner.lock().await;
        map.entry(id)
            .or_insert_with(|| SessionContext::new(id))
            .selected = Some(symbol);
    }

    pub async fn record_turn(&self, id: Uuid, prompt: String, result: AiResult) {
        let mut map = self.inner.lock().await;
        let session = map.entry(id).or_insert_with(|| SessionContext::new(id));
        session.transcript.push(ChatTurn {
            at: Utc::now(),
            prompt,
            result,
        });
        let overflow = session.transcript.len().saturating_sub(MAX_TRANSCRIPT_TURNS);
        if overflow > 0 {
            session.transcript.drain(..overflow);
        }
    }
}
