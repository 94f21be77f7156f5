//! HTTP ingress: batch validation and non-blocking handoff to the engine.
//!
//! Endpoints:
//! - `POST /push/apns`: JSON array of posted notifications, or a form with
//!   a single `json` parameter.
//! - `POST /push/fcm/v1`: a single FCM v1 payload.
//! - `GET /stats/app`: engine statistics snapshot.
//! - `GET /stats/profile`: process-level runtime info.
//!
//! When the ingest queue rejects a batch the response is `503` with a
//! `Retry-After` header computed by [`AdmissionControl`].

use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{Request as HttpRequest, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;

use crate::admission::AdmissionControl;
use crate::config::Config;
use crate::fcmv1;
use crate::request::{Notification, PostedData, Request};
use crate::stats::Stats;
use crate::supervisor::{EnqueueError, Supervisor};

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_X_WWW_FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Posted bodies beyond this size are rejected while reading.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared state behind the ingress handlers.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub stats: Arc<Stats>,
    pub admission: Arc<AdmissionControl>,
    pub max_request_size: usize,
    pub apns_enabled: bool,
    pub fcm_v1_enabled: bool,
}

impl AppState {
    pub fn new(config: &Config, supervisor: Arc<Supervisor>) -> AppState {
        AppState {
            stats: supervisor.stats().clone(),
            admission: Arc::new(AdmissionControl::new()),
            max_request_size: config.provider.request_queue_size,
            apns_enabled: config.apns_enabled(),
            fcm_v1_enabled: config.fcm_v1_enabled(),
            supervisor,
        }
    }
}

/// Assemble the ingress router. Push endpoints appear only for configured
/// providers.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new();
    if state.apns_enabled {
        tracing::info!(r#type = "provider", "enable endpoint /push/apns");
        router = router.route("/push/apns", any(push_apns));
    }
    if state.fcm_v1_enabled {
        tracing::info!(r#type = "provider", "enable endpoint /push/fcm/v1");
        router = router.route("/push/fcm/v1", any(push_fcm_v1));
    }
    router
        .route("/stats/app", any(stats_app))
        .route("/stats/profile", any(stats_profile))
        .with_state(state)
}

/// Bind the listener and serve until a termination signal arrives, then
/// drain and stop the engine.
pub async fn serve(config: Config, supervisor: Supervisor) -> std::io::Result<()> {
    let supervisor = Arc::new(supervisor);
    let state = AppState::new(&config, supervisor.clone());
    let app = router(state).layer(ConcurrencyLimitLayer::new(config.provider.max_connections));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.provider.port)).await?;
    tracing::info!(r#type = "provider", port = config.provider.port, "starting provider server");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!(r#type = "provider", "stopping server");
    supervisor.shutdown().await;
    Ok(())
}

/// Resolve on SIGTERM, SIGINT, or SIGHUP.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!(r#type = "provider", error = %e, "failed to install SIGTERM handler");
            ctrl_c.await;
            return;
        }
    };
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!(r#type = "provider", error = %e, "failed to install SIGHUP handler");
            ctrl_c.await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!(r#type = "provider", "received SIGINT signal; stopping server now");
        }
        _ = sigterm.recv() => {
            tracing::info!(r#type = "provider", "received SIGTERM signal");
        }
        _ = sighup.recv() => {
            tracing::info!(r#type = "provider", "received SIGHUP signal");
        }
    }
}

#[derive(Deserialize)]
struct JsonForm {
    json: String,
}

async fn push_apns(State(state): State<AppState>, request: HttpRequest) -> Response {
    state.stats.incr_requests();

    if request.method() != Method::POST {
        return method_not_allowed();
    }
    let content_type = content_type_of(&request);
    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return bad_request(&e.to_string()),
    };

    let posted: Vec<PostedData> = match content_type.as_str() {
        APPLICATION_JSON => match serde_json::from_slice(&body) {
            Ok(posted) => posted,
            Err(e) => return bad_request(&e.to_string()),
        },
        APPLICATION_X_WWW_FORM_URLENCODED => {
            let form: JsonForm = match serde_urlencoded::from_bytes(&body) {
                Ok(form) => form,
                Err(e) => return bad_request(&e.to_string()),
            };
            match serde_json::from_str(&form.json) {
                Ok(posted) => posted,
                Err(e) => return bad_request(&e.to_string()),
            }
        }
        other => {
            tracing::warn!(r#type = "provider", content_type = other, "unsupported media type");
            return unsupported_media_type();
        }
    };

    if let Err(reason) = validate_posted_data(&posted, state.max_request_size) {
        return bad_request(&reason);
    }

    let batch: Vec<Request> = posted.into_iter().map(Request::from).collect();
    match state.supervisor.enqueue(batch) {
        Ok(()) => accepted(),
        Err(e) => service_unavailable(&state, e),
    }
}

async fn push_fcm_v1(State(state): State<AppState>, request: HttpRequest) -> Response {
    state.stats.incr_requests();

    if request.method() != Method::POST {
        return method_not_allowed();
    }
    if content_type_of(&request) != APPLICATION_JSON {
        return unsupported_media_type();
    }
    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return bad_request(&e.to_string()),
    };
    let payload: fcmv1::Payload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return bad_request(&e.to_string()),
    };

    let batch = vec![Request::new(Notification::FcmV1(payload))];
    match state.supervisor.enqueue(batch) {
        Ok(()) => accepted(),
        Err(e) => service_unavailable(&state, e),
    }
}

async fn stats_app(State(state): State<AppState>, request: HttpRequest) -> Response {
    if request.method() != Method::GET {
        return method_not_allowed();
    }
    let snapshot = state.stats.snapshot(&state.admission, state.supervisor.queue_gauges());
    (StatusCode::OK, axum::Json(snapshot)).into_response()
}

#[derive(Serialize)]
struct ProfileSnapshot {
    pid: u32,
    version: &'static str,
    workers: i64,
}

async fn stats_profile(State(state): State<AppState>, request: HttpRequest) -> Response {
    if request.method() != Method::GET {
        return method_not_allowed();
    }
    let profile = ProfileSnapshot {
        pid: std::process::id(),
        version: crate::VERSION,
        workers: state.stats.workers(),
    };
    (StatusCode::OK, axum::Json(profile)).into_response()
}

fn content_type_of(request: &HttpRequest) -> String {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn validate_posted_data(posted: &[PostedData], max_request_size: usize) -> Result<(), String> {
    if posted.is_empty() {
        return Err("PostedData must not be empty".to_string());
    }
    if posted.len() > max_request_size {
        return Err(format!("PostedData was too long. Be less than {max_request_size}"));
    }
    for p in posted {
        if p.token.is_empty() {
            return Err("Payload format was malformed".to_string());
        }
    }
    Ok(())
}

fn accepted() -> Response {
    (StatusCode::OK, axum::Json(serde_json::json!({"result": "ok"}))).into_response()
}

fn bad_request(reason: &str) -> Response {
    (StatusCode::BAD_REQUEST, axum::Json(serde_json::json!({"reason": reason}))).into_response()
}

fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        axum::Json(serde_json::json!({"reason": "Method Not Allowed."})),
    )
        .into_response()
}

fn unsupported_media_type() -> Response {
    (
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        axum::Json(serde_json::json!({"reason": "Unsupported Media Type"})),
    )
        .into_response()
}

fn service_unavailable(state: &AppState, error: EnqueueError) -> Response {
    let retry_after = state.admission.on_queue_full();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, retry_after.to_string())],
        axum::Json(serde_json::json!({"reason": error.to_string()})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let mut config = Config::default();
        config.provider.worker_num = 1;
        config.apns = Some(crate::config::SectionApns {
            host: Some("http://127.0.0.1:1".to_string()),
            key_file: Some(
                std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                    .join("tests/data/authkey.p8"),
            ),
            kid: Some("KEYID12345".to_string()),
            team_id: Some("TEAM000001".to_string()),
            ..Default::default()
        });
        let supervisor = Supervisor::builder(config.clone()).start().await.unwrap();
        AppState::new(&config, Arc::new(supervisor))
    }

    fn post(uri: &str, content_type: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("GET")
                    .uri("/push/apns")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn wrong_content_type_is_415() {
        let app = router(test_state().await);
        let response = app.oneshot(post("/push/apns", "text/plain", "[]")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let app = router(test_state().await);
        let response =
            app.oneshot(post("/push/apns", APPLICATION_JSON, "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_batch_is_400() {
        let app = router(test_state().await);
        let response = app.oneshot(post("/push/apns", APPLICATION_JSON, "[]")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn form_with_invalid_inner_json_is_400() {
        let app = router(test_state().await);
        let response = app
            .oneshot(post("/push/apns", APPLICATION_X_WWW_FORM_URLENCODED, "json=%5B%7B"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_aps_is_400() {
        let app = router(test_state().await);
        let body = r#"[{"token":"abc","payload":{"badge":1}}]"#;
        let response = app.oneshot(post("/push/apns", APPLICATION_JSON, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_app_serves_a_snapshot() {
        let state = test_state().await;
        let app = router(state);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("GET")
                    .uri("/stats/app")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), MAX_BODY_BYTES).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(value.get("req_count").is_some());
        assert!(value.get("retry_after").is_some());
    }

    #[tokio::test]
    async fn fcm_endpoint_absent_when_not_configured() {
        let app = router(test_state().await);
        let response =
            app.oneshot(post("/push/fcm/v1", APPLICATION_JSON, "{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
