//! Reverse HTTP proxy passthrough: when the operator configures a target
//! base URL, every request that isn't a WebSocket upgrade or a front-door
//! route is forwarded there verbatim and the response relayed back.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

#[derive(Clone)]
pub struct PassthroughState {
    pub target_base: reqwest::Url,
    pub client: reqwest::Client,
}

impl PassthroughState {
    pub fn new(target_base: reqwest::Url) -> Self {
        Self {
            target_base,
            client: reqwest::Client::new(),
        }
    }
}

pub async fn forward(
    State(state): State<PassthroughState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let Ok(target) = state.target_base.join(uri.path()) else {
        return (StatusCode::BAD_GATEWAY, "bad passthrough target\n").into_response();
    };

    let request = state
        .client
        .request(method, target)
        .body(body.to_vec());

    match request.send().await {
        Ok(upstream) => {
            let status = upstream.status();
            match upstream.bytes().await {
                Ok(body) => (status, body).into_response(),
                Err(_) => (StatusCode::BAD_GATEWAY, "upstream read failed\n").into_response(),
            }
        }
        Err(_) => (StatusCode::BAD_GATEWAY, "upstream unreachable\n").into_response(),
    }
}
