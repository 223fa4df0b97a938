//! Administrative REST surface: HTTP Basic-auth-gated user CRUD and
//! authfile bulk replace, sitting beside the WebSocket front door. Basic
//! auth is checked the same way the HMAC-over-proxy-auth check elsewhere in
//! the corpus does it — decode, compare, structured rejection — generalized
//! from HMAC comparison to a credential lookup against the `UserStore`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use tunnel_core::user::{User, UserRecord};

use crate::state::AppState;

#[derive(Clone)]
pub struct AdminState {
    pub app: AppState,
    pub authfile_path: Option<Arc<PathBuf>>,
}

pub fn router(app: AppState, authfile_path: Option<PathBuf>) -> Router {
    let state = AdminState {
        app,
        authfile_path: authfile_path.map(Arc::new),
    };
    Router::new()
        .route("/users", get(list_users))
        .route("/user", post(create_user).put(update_user))
        .route("/user/{name}", get(get_user).delete(delete_user))
        .route("/authfile", post(replace_authfile))
        .with_state(state)
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response {
    let mut body = body.into();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    (status, body).into_response()
}

/// Decode `Authorization: Basic ...`, look the credentials up in the user
/// store, and require `is_admin`. Exact phrasings per the admin REST
/// contract: `Unauthorized`, `No auth file configured on server`.
async fn require_admin(state: &AdminState, headers: &HeaderMap) -> Result<User, Response> {
    if state.app.users.is_empty().await {
        return Err(text_response(
            StatusCode::UNAUTHORIZED,
            "No auth file configured on server",
        ));
    }

    let unauthorized = || text_response(StatusCode::UNAUTHORIZED, "Unauthorized");

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;
    let encoded = header.strip_prefix("Basic ").ok_or_else(unauthorized)?;
    let decoded = BASE64.decode(encoded).map_err(|_| unauthorized())?;
    let decoded = String::from_utf8(decoded).map_err(|_| unauthorized())?;
    let (username, password) = decoded.split_once(':').ok_or_else(unauthorized)?;

    let user = state.app.users.get(username).await.ok_or_else(unauthorized)?;
    if user.pass != password || !user.is_admin {
        return Err(unauthorized());
    }
    Ok(user)
}

async fn persist(state: &AdminState) {
    if let Some(path) = &state.authfile_path {
        if let Err(e) = state.app.users.write(path).await {
            tracing::warn!(error = %e, "failed to persist authfile");
        }
    }
}

async fn list_users(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers).await {
        return resp;
    }
    let users = state.app.users.clone();
    let records = users_to_records(&users).await;
    Json(records).into_response()
}

async fn users_to_records(users: &tunnel_core::store::UserStore) -> Vec<UserRecord> {
    let json = users.to_json().await.unwrap_or_else(|_| "[]".to_string());
    serde_json::from_str(&json).unwrap_or_default()
}

async fn get_user(
    State(state): State<AdminState>,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers).await {
        return resp;
    }
    match state.app.users.get(&name).await {
        Some(user) => Json(UserRecord::from(&user)).into_response(),
        None => text_response(StatusCode::NOT_FOUND, "User not found"),
    }
}

async fn create_user(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(record): Json<UserRecord>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers).await {
        return resp;
    }
    if state.app.users.get(&record.username).await.is_some() {
        return text_response(StatusCode::CONFLICT, "User already exists");
    }
    let user = match User::try_from(record) {
        Ok(u) => u,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    state.app.users.set(user).await;
    persist(&state).await;
    StatusCode::CREATED.into_response()
}

async fn update_user(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(record): Json<UserRecord>,
) -> Response {
    let requester = match require_admin(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if state.app.users.get(&record.username).await.is_none() {
        return text_response(StatusCode::NOT_FOUND, "User not found");
    }
    if requester.name == record.username && requester.is_admin && !record.is_admin {
        return text_response(StatusCode::BAD_REQUEST, "Cannot revoke admin from yourself");
    }
    let user = match User::try_from(record) {
        Ok(u) => u,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    state.app.users.set(user).await;
    persist(&state).await;
    StatusCode::OK.into_response()
}

async fn delete_user(
    State(state): State<AdminState>,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
) -> Response {
    let requester = match require_admin(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if requester.name == name {
        return text_response(StatusCode::BAD_REQUEST, "Cannot delete your own user");
    }
    if !state.app.users.del(&name).await {
        return text_response(StatusCode::NOT_FOUND, "User not found");
    }
    persist(&state).await;
    StatusCode::OK.into_response()
}

async fn replace_authfile(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(records): Json<Vec<UserRecord>>,
) -> Response {
    let requester = match require_admin(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if records.is_empty() {
        return text_response(StatusCode::BAD_REQUEST, "No users found in file");
    }

    let requester_ok = records
        .iter()
        .any(|r| r.username == requester.name && r.is_admin);
    if !requester_ok {
        return text_response(
            StatusCode::BAD_REQUEST,
            "file must include the current requesting user with admin permission",
        );
    }

    let mut users = Vec::with_capacity(records.len());
    for record in records {
        let name = record.username.clone();
        match User::try_from(record) {
            Ok(u) => users.push(u),
            Err(e) => {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid user setting for {name}: {e}"),
                )
            }
        }
    }

    state.app.users.reset(users).await;
    persist(&state).await;
    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::header::AUTHORIZATION;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use tunnel_core::crypto::Identity;
    use tunnel_core::store::UserStore;

    use super::*;

    fn basic_auth(username: &str, password: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
    }

    fn test_router(users: Vec<User>) -> Router {
        let state = AppState::new(
            Identity::generate(),
            UserStore::from_users(users),
            Duration::from_secs(3600),
            None,
            Duration::from_secs(25),
            CancellationToken::new(),
        );
        router(state, None)
    }

    fn admin_user() -> User {
        User::new("root", "hunter12", vec!["^.*$".to_string()], true).unwrap()
    }

    fn plain_user() -> User {
        User::new("alice", "password1", vec!["^9001".to_string()], false).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_auth_header() {
        let app = test_router(vec![admin_user()]);
        let req = Request::builder().uri("/users").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(resp).await.trim(), "Unauthorized");
    }

    #[tokio::test]
    async fn rejects_everyone_when_no_users_configured() {
        let app = test_router(vec![]);
        let req = Request::builder()
            .uri("/users")
            .header(AUTHORIZATION, basic_auth("root", "hunter12"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(resp).await.trim(), "No auth file configured on server");
    }

    #[tokio::test]
    async fn rejects_non_admin_user() {
        let app = test_router(vec![admin_user(), plain_user()]);
        let req = Request::builder()
            .uri("/users")
            .header(AUTHORIZATION, basic_auth("alice", "password1"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_users_for_admin() {
        let app = test_router(vec![admin_user(), plain_user()]);
        let req = Request::builder()
            .uri("/users")
            .header(AUTHORIZATION, basic_auth("root", "hunter12"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        let records: Vec<UserRecord> = serde_json::from_str(&body).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn rejects_creating_duplicate_user() {
        let app = test_router(vec![admin_user()]);
        let record = UserRecord {
            username: "root".to_string(),
            password: "whatever1".to_string(),
            addresses: vec!["^.*$".to_string()],
            is_admin: false,
        };
        let req = Request::builder()
            .method("POST")
            .uri("/user")
            .header(AUTHORIZATION, basic_auth("root", "hunter12"))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&record).unwrap()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn refuses_to_delete_own_user() {
        let app = test_router(vec![admin_user()]);
        let req = Request::builder()
            .method("DELETE")
            .uri("/user/root")
            .header(AUTHORIZATION, basic_auth("root", "hunter12"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await.trim(), "Cannot delete your own user");
    }

    #[tokio::test]
    async fn refuses_to_revoke_own_admin() {
        let app = test_router(vec![admin_user()]);
        let record = UserRecord {
            username: "root".to_string(),
            password: "hunter12".to_string(),
            addresses: vec!["^.*$".to_string()],
            is_admin: false,
        };
        let req = Request::builder()
            .method("PUT")
            .uri("/user")
            .header(AUTHORIZATION, basic_auth("root", "hunter12"))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&record).unwrap()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await.trim(), "Cannot revoke admin from yourself");
    }

    #[tokio::test]
    async fn replace_authfile_requires_requester_present_as_admin() {
        let app = test_router(vec![admin_user()]);
        let records = vec![UserRecord {
            username: "someone_else".to_string(),
            password: "whatever1".to_string(),
            addresses: vec!["^.*$".to_string()],
            is_admin: true,
        }];
        let req = Request::builder()
            .method("POST")
            .uri("/authfile")
            .header(AUTHORIZATION, basic_auth("root", "hunter12"))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&records).unwrap()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn replace_authfile_accepts_valid_bulk_replace() {
        let app = test_router(vec![admin_user()]);
        let records = vec![UserRecord {
            username: "root".to_string(),
            password: "hunter12".to_string(),
            addresses: vec!["^.*$".to_string()],
            is_admin: true,
        }];
        let req = Request::builder()
            .method("POST")
            .uri("/authfile")
            .header(AUTHORIZATION, basic_auth("root", "hunter12"))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&records).unwrap()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }
}
