use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;
use tower_http::cors::CorsLayer;

use crate::{
    app::AppFactory,
    config::Config,
    recommender::{IndexStats, Query, QueryKind, RecommendError, Recommender},
    semantic::RankedResult,
};

#[derive(Clone)]
pub struct AppState {
    recommender: Arc<Recommender>,
    config: Arc<Config>,
    /// Held for the whole build -> save -> swap of a reload
    reload_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: Config, recommender: Recommender) -> Self {
        Self {
            recommender: Arc::new(recommender),
            config: Arc::new(config),
            reload_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = state.config.server.cors;

    let router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/recommend", post(recommend))
        .route("/api/index", get(index_stats))
        .route("/api/index/reload", post(reload_index))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state);

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn start_app(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind_addr.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    log::info!("listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

pub fn start_daemon(config: Config, recommender: Recommender) -> anyhow::Result<()> {
    let state = AppState::new(config, recommender);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(async { start_app(state).await })
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Recommend(#[from] RecommendError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// Make our own error that wraps `ApiError`.
#[derive(Debug)]
struct HttpError(ApiError);

// Tell axum how to convert `ApiError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            ApiError::Recommend(RecommendError::InvalidInput { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Recommend(RecommendError::IndexEmpty) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Recommend(RecommendError::ExtractionFailed { .. }) => StatusCode::BAD_GATEWAY,
            _ => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

// This enables using `?` on anything convertible to `ApiError`.
impl<E> From<E> for HttpError
where
    E: Into<ApiError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn root() -> impl IntoResponse {
    Json(json!({"message": "assessment recommendation API is running"}))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendRequest {
    /// Job description text or URL
    pub query: String,

    /// Force URL handling. Text that looks like a URL is fetched either way.
    #[serde(default)]
    pub is_url: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendParams {
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub name: String,
    pub url: String,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

impl From<RankedResult> for Recommendation {
    fn from(result: RankedResult) -> Self {
        Self {
            id: result.item.id,
            name: result.item.name,
            url: result.item.url,
            score: result.score,
            metadata: result.item.metadata,
        }
    }
}

async fn recommend(
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<RecommendParams>,
    Json(payload): Json<RecommendRequest>,
) -> Result<Json<Vec<Recommendation>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let k = params.top_k.unwrap_or(state.config.ranking.default_k);
    let kind = if payload.is_url {
        QueryKind::Url
    } else {
        QueryKind::Auto
    };
    let query = Query::new(payload.query, k).with_kind(kind);

    let recommender = state.recommender.clone();
    tokio::task::block_in_place(move || {
        let results = recommender.recommend(&query)?;
        Ok(Json(results.into_iter().map(Into::into).collect()))
    })
}

async fn index_stats(State(state): State<AppState>) -> Json<IndexStats> {
    Json(state.recommender.index_stats())
}

async fn reload_index(State(state): State<AppState>) -> Result<Json<IndexStats>, HttpError> {
    tokio::task::block_in_place(move || {
        let _guard = state
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let items = AppFactory::load_catalog(&state.config, None)?;
        let embedder = state.recommender.embedder();
        let index = AppFactory::build_index(&state.config, embedder, items, |_, _| {})?;

        // the running index is replaced only once the new one is on disk
        AppFactory::save_index(&state.config, embedder, &index)?;
        let version = state.recommender.swap_index(index)?;

        log::info!("reloaded catalog as index version {version}");
        Ok(Json(state.recommender.index_stats()))
    })
}
