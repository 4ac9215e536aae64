use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use movers_core::domain::market::Symbol;
use movers_core::engine::{Engine, MoversReport};
use movers_core::ingest::universe::MarketIndex;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod session;

use session::{SessionStore, SESSION_HEADER};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = movers_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let engine = match Engine::from_settings(&settings) {
        Ok(engine) => engine,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            return Err(e);
        }
    };
    if !engine.ai_configured() {
        tracing::warn!("GEMINI_API_KEY missing; AI insights disabled");
    }

    let state = AppState {
        engine: Arc::new(engine),
        sessions: SessionStore::default(),
        default_index: movers_core::config::env_or("DEFAULT_INDEX", MarketIndex::Sp500),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/movers/:index", get(get_movers))
        .route("/signals/:ticker", get(get_signal))
        .route("/insight", post(post_insight))
        .route("/session", get(get_session))
        .route("/cache/clear", post(clear_cache))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = movers_core::config::env_or("PORT", 3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    sessions: SessionStore,
    default_index: MarketIndex,
}

async fn get_movers(
    State(state): State<AppState>,
    Path(index): Path<String>,
) -> Result<Json<MoversReport>, StatusCode> {
    let index: MarketIndex = index.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(Json(state.engine.top_movers(index).await))
}

async fn get_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let symbol = Symbol::parse(&ticker).ok_or(StatusCode::BAD_REQUEST)?;
    let session_id = SessionStore::session_id(&headers);

    let signal = state
        .engine
        .ticker_signal(&symbol)
        .await
        .map_err(|e| {
            tracing::warn!(%symbol, error = %e, "ticker lookup failed");
            StatusCode::BAD_GATEWAY
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    state.sessions.select(session_id, symbol).await;
    Ok(([(SESSION_HEADER, session_id.to_string())], Json(signal)))
}

#[derive(Debug, Deserialize)]
struct InsightRequest {
    prompt: String,
    #[serde(default)]
    index: Option<String>,
}

async fn post_insight(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InsightRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let prompt = req.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let index = match req.index.as_deref() {
        Some(s) => s.parse().map_err(|_| StatusCode::BAD_REQUEST)?,
        None => state.default_index,
    };
    let session_id = SessionStore::session_id(&headers);

    let report = state.engine.top_movers(index).await;
    let result = state.engine.ask(&prompt, &report.ranked).await;
    state
        .sessions
        .record_turn(session_id, prompt, result.clone())
        .await;

    Ok(([(SESSION_HEADER, session_id.to_string())], Json(result)))
}

async fn get_session(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let session_id = SessionStore::session_id(&headers);
    let session = state.sessions.snapshot(session_id).await;
    ([(SESSION_HEADER, session_id.to_string())], Json(session))
}

async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.engine.clear_caches().await;
    StatusCode::NO_CONTENT
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &movers_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
