pub mod auth;
pub mod history;
pub mod predict;

use axum::{Router, extract::DefaultBodyLimit, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(auth::routes())
        .merge(history::routes())
        .merge(predict::routes())
}

async fn health() -> &'static str {
    "ok"
}

/// Full application: routes, upload limit, request tracing.
pub fn build_app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .merge(build_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// In-process app with an in-memory database and stub inference.
#[cfg(test)]
pub mod test_support {
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{HeaderMap, Request, StatusCode, header},
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::AppState;
    use crate::config::test_config;
    use crate::db;
    use crate::inference::testing::{StubClassifier, SyntheticDecoder};
    use crate::inference::{Pipeline, PipelineOptions};

    pub const BOUNDARY: &str = "deepcheck-test-boundary";

    pub struct TestApp {
        pub app: Router,
        pub state: Arc<AppState>,
        pub uploads: TempDir,
    }

    pub struct TestResponse {
        pub status: StatusCode,
        pub headers: HeaderMap,
        pub body: Vec<u8>,
    }

    impl TestResponse {
        pub fn json(&self) -> Value {
            serde_json::from_slice(&self.body).unwrap()
        }
    }

    pub async fn test_app(classifier: StubClassifier, frames: usize) -> TestApp {
        let uploads = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            Arc::new(SyntheticDecoder { frames }),
            Arc::new(classifier),
            PipelineOptions::default(),
        );
        let state = Arc::new(AppState {
            db: db::test_pool().await,
            pipeline: Arc::new(pipeline),
            config: test_config(uploads.path().to_path_buf()),
        });

        TestApp {
            app: super::build_app(state.clone()),
            state,
            uploads,
        }
    }

    /// The rate limiter keys on client IP, so every request carries one.
    pub fn request(method: &str, uri: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.7")
    }

    pub async fn send(app: &Router, req: Request<Body>) -> TestResponse {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub fn form(method: &str, uri: &str, body: &str) -> Request<Body> {
        request(method, uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Register and log in, returning the `access_token=...` cookie pair.
    pub async fn login_cookie(app: &Router, email: &str, password: &str) -> String {
        let body = format!("email={}&password={}", email.replace('@', "%40"), password);

        let res = send(app, form("POST", "/register", &body)).await;
        assert_eq!(res.status, StatusCode::CREATED);

        let res = send(app, form("POST", "/login", &body)).await;
        assert_eq!(res.status, StatusCode::NO_CONTENT);

        let set_cookie = res.headers[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    /// Multipart body with a single file field.
    pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: video/mp4\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }
}
