//! HTTP routes.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use coderelay_session::{FileStore, FileStoreError, SessionConfig};
use serde::Deserialize;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::websocket::ws_handler;

/// Browser client served at `/`.
const INDEX_HTML: &str = include_str!("../static/index.html");

/// Path of the WebSocket endpoint.
pub const WS_PATH: &str = "/api/v2/ws";

/// Application state shared across handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<SessionConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

/// Transport error, rendered as an HTTP response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Store(#[from] FileStoreError),
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Store(FileStoreError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            Self::Store(FileStoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!("Request failed: {self}");
        }
        (status, self.to_string()).into_response()
    }
}

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route(WS_PATH, get(ws_handler))
        .route("/download", get(download_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    path: String,
}

/// Serve a file below the server root as an attachment.
async fn download_handler(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, TransportError> {
    let store = FileStore::new(&state.config.root);
    let bytes = store.read_bytes(&query.path).await?;

    let name = query
        .path
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .replace('"', "");
    tracing::debug!(path = %query.path, size = bytes.len(), "Serving download");

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
