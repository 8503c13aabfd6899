//! Prediction history (/api/history)

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::sync::Arc;

use super::auth::AuthUser;
use crate::AppState;
use crate::domain::history::{self, HistoryEntry};
use crate::services::error::{ApiError, LogErr};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/history", get(list_history))
}

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<HistoryEntry>,
}

/// GET /api/history - The session user's predictions, newest first
async fn list_history(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = history::list_history(&state.db, user_id)
        .await
        .log_500("List history error")?;

    Ok(Json(HistoryResponse { history }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::StubClassifier;
    use crate::routes::test_support::*;
    use axum::{
        body::Body,
        http::{StatusCode, header},
    };

    fn history_request(cookie: &str) -> axum::http::Request<Body> {
        request("GET", "/api/history")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn predict_request(cookie: &str, filename: &str) -> axum::http::Request<Body> {
        request("POST", "/predict")
            .header(header::COOKIE, cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body("video", filename, b"bytes")))
            .unwrap()
    }

    #[tokio::test]
    async fn test_history_requires_auth() {
        let t = test_app(StubClassifier::returning(&[0.7]), 1).await;
        let res = send(
            &t.app,
            request("GET", "/api/history").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert!(res.json()["error"].is_string());
    }

    #[tokio::test]
    async fn test_history_is_per_user_newest_first() {
        let t = test_app(StubClassifier::returning(&[0.7]), 1).await;
        let alice = login_cookie(&t.app, "alice@example.com", "pw").await;
        let bob = login_cookie(&t.app, "bob@example.com", "pw").await;

        for name in ["first.mp4", "second.mp4"] {
            let res = send(&t.app, predict_request(&alice, name)).await;
            assert_eq!(res.status, StatusCode::OK);
        }
        send(&t.app, predict_request(&bob, "bob.mp4")).await;

        let res = send(&t.app, history_request(&alice)).await;
        assert_eq!(res.status, StatusCode::OK);

        let body = res.json();
        let entries = body["history"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["filename"], "second.mp4");
        assert_eq!(entries[1]["filename"], "first.mp4");
        assert_eq!(entries[0]["label"], "REAL");
        assert!(entries[0]["id"].as_i64() > entries[1]["id"].as_i64());
        assert!(entries[0].get("created_at").is_some());
    }

    #[tokio::test]
    async fn test_empty_history() {
        let t = test_app(StubClassifier::returning(&[0.7]), 1).await;
        let cookie = login_cookie(&t.app, "new@example.com", "pw").await;

        let res = send(&t.app, history_request(&cookie)).await;
        assert_eq!(res.json()["history"], serde_json::json!([]));
    }
}
