//! HTTP request gateway.
//!
//! Decodes JSON requests, authenticates them through the [`TokenService`],
//! dispatches into the [`StorageService`] and encodes the responses. Every
//! failure leaves as a status code plus `{"error": "<message>", "kind": ..}`.
//!
//! ```text
//! GET  /health
//! POST /authentication/{login,refresh,validate,logout}
//! GET  /filesystem/state
//! POST /filesystem/{ls,cd,mkdir,rename,move,copy,delete}
//! POST /filesystem/upload            POST /filesystem/upload/chunk?id=N
//! POST /filesystem/upload/complete
//! POST /filesystem/download          GET  /filesystem/download/chunk?id=N
//! ```

pub mod auth;
pub mod error;
pub mod filesystem;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use protocol::messages::HealthResponse;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::TokenService;
use crate::config::MAX_CHUNK_SIZE;
use crate::service::StorageService;
use crate::session::SessionRegistry;

pub use error::{ApiError, ApiJson, ApiResult};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub sessions: Arc<SessionRegistry>,
    pub service: Arc<dyn StorageService>,
}

impl AppState {
    pub fn new(
        tokens: TokenService,
        sessions: Arc<SessionRegistry>,
        service: impl StorageService + 'static,
    ) -> Self {
        Self {
            tokens: Arc::new(tokens),
            sessions,
            service: Arc::new(service),
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Builds the full router.
pub fn router(state: AppState) -> Router {
    let filesystem = Router::new()
        .route("/state", get(filesystem::state))
        .route("/ls", post(filesystem::ls))
        .route("/cd", post(filesystem::cd))
        .route("/mkdir", post(filesystem::mkdir))
        .route("/rename", post(filesystem::rename))
        .route("/move", post(filesystem::move_entry))
        .route("/copy", post(filesystem::copy))
        .route("/delete", post(filesystem::delete))
        .route("/upload", post(filesystem::start_upload))
        .route("/upload/chunk", post(filesystem::upload_chunk))
        .route("/upload/complete", post(filesystem::complete_upload))
        .route("/download", post(filesystem::start_download))
        .route("/download/chunk", get(filesystem::download_chunk))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    let authentication = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/validate", post(auth::validate))
        .route("/logout", post(auth::logout));

    Router::new()
        .route("/health", get(health))
        .nest("/authentication", authentication)
        .nest("/filesystem", filesystem)
        // chunk bodies plus headroom for JSON framing
        .layer(DefaultBodyLimit::max(MAX_CHUNK_SIZE + 64 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
