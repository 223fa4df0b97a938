//! Assembles the HTTP front door: WebSocket upgrade, health/version,
//! admin REST (merged, Basic-auth gated), and an optional reverse-proxy
//! passthrough fallback. `/health` and `/version` are matched by string
//! prefix rather than path segment (`/healthIgnoreTrailing/123` must also
//! answer), so both live in the fallback alongside passthrough/404 rather
//! than as declarative axum routes.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::passthrough::PassthroughState;
use crate::state::AppState;
use crate::ws_handler::ws_upgrade;

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
struct FallbackState {
    passthrough: Option<Arc<PassthroughState>>,
}

/// Reached only when no reverse-proxy passthrough is configured: the local
/// health/version/404 surface.
async fn local_fallback(uri: Uri) -> axum::response::Response {
    use axum::response::IntoResponse;

    let path = uri.path();
    if path.starts_with("/health") {
        return "OK\n".into_response();
    }
    if path.starts_with("/version") {
        return BUILD_VERSION.to_string().into_response();
    }
    (StatusCode::NOT_FOUND, "Not found\n").into_response()
}

/// Reached when a passthrough target is configured: every non-websocket
/// request is forwarded, including what would otherwise be health/version/
/// admin paths — the passthrough target takes over "all remaining requests"
/// per the router contract, so the admin REST surface is unreachable while
/// `--proxy` is set.
async fn passthrough_fallback(
    State(state): State<FallbackState>,
    uri: Uri,
    req: axum::extract::Request,
) -> axum::response::Response {
    let passthrough = state.passthrough.expect("routed only when configured");
    let method = req.method().clone();
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    crate::passthrough::forward(State((*passthrough).clone()), method, uri, body).await
}

pub fn build(
    state: AppState,
    authfile_path: Option<PathBuf>,
    passthrough_target: Option<reqwest::Url>,
) -> Router {
    let ws_router = Router::new()
        .route("/", get(ws_upgrade))
        .with_state(state.clone());

    let router = match passthrough_target {
        Some(target) => {
            let fallback_state = FallbackState {
                passthrough: Some(Arc::new(PassthroughState::new(target))),
            };
            ws_router.fallback(axum::routing::any(passthrough_fallback).with_state(fallback_state))
        }
        None => ws_router
            .merge(admin::router(state, authfile_path))
            .fallback(local_fallback),
    };

    router.layer(TraceLayer::new_for_http())
}
