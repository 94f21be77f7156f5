//! Mock APNs / FCM v1 servers for tests and load experiments.
//!
//! The APNs mock dispatches on magic device tokens; the FCM mock dispatches
//! on the bearer-token value, so a test selects the provider behavior it
//! wants without any server-side state.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;

use crate::apns::{ErrorResponse, Reason};
use crate::config::{unix_now, LIMIT_APNS_TOKEN_BYTE_SIZE};
use crate::fcmv1::{error_status, FcmError, ResponseBody};

/// Mock APNs endpoint (`POST /3/device/{token}`).
///
/// Magic tokens: `baddevicetoken` (and any token longer than 100 bytes) →
/// 400 `BadDeviceToken`; `missingtopic` → 400 `MissingTopic`;
/// `unregistered` → 410 `Unregistered` with a timestamp;
/// `expiredprovidertoken` → 403 `ExpiredProviderToken`; anything else → 200.
pub fn apns_mock_router(latency: Duration) -> Router {
    Router::new().route("/3/device/{token}", post(apns_device)).with_state(latency)
}

async fn apns_device(State(latency): State<Duration>, Path(token): Path<String>) -> Response {
    tokio::time::sleep(latency).await;

    if token.len() > LIMIT_APNS_TOKEN_BYTE_SIZE || token == "baddevicetoken" {
        return (
            StatusCode::BAD_REQUEST,
            [("apns-id", "apns-id")],
            axum::Json(error_response(Reason::BadDeviceToken, false)),
        )
            .into_response();
    }
    match token.as_str() {
        "missingtopic" => {
            (StatusCode::BAD_REQUEST, axum::Json(error_response(Reason::MissingTopic, false)))
                .into_response()
        }
        "unregistered" => {
            (StatusCode::GONE, axum::Json(error_response(Reason::Unregistered, true)))
                .into_response()
        }
        "expiredprovidertoken" => (
            StatusCode::FORBIDDEN,
            axum::Json(error_response(Reason::ExpiredProviderToken, false)),
        )
            .into_response(),
        _ => (StatusCode::OK, [("apns-id", "apns-id")]).into_response(),
    }
}

fn error_response(reason: Reason, with_timestamp: bool) -> ErrorResponse {
    ErrorResponse {
        reason: reason.as_str().to_string(),
        timestamp: with_timestamp.then(unix_now),
    }
}

/// Mock FCM v1 endpoint (`POST /v1/projects/{project_id}/messages:send`).
///
/// The bearer token selects the response: one of the classification
/// statuses (`INVALID_ARGUMENT`, `UNREGISTERED`, `UNAVAILABLE`, `INTERNAL`,
/// `QUOTA_EXCEEDED`) or success for anything else.
pub fn fcmv1_mock_router(project_id: &str, latency: Duration) -> Router {
    Router::new()
        .route(&format!("/v1/projects/{project_id}/messages:send"), post(fcmv1_send))
        .with_state(latency)
}

async fn fcmv1_send(State(latency): State<Duration>, headers: HeaderMap) -> Response {
    tokio::time::sleep(latency).await;

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    let status = match token {
        error_status::INVALID_ARGUMENT => StatusCode::BAD_REQUEST,
        error_status::UNREGISTERED => StatusCode::NOT_FOUND,
        error_status::UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
        error_status::INTERNAL => StatusCode::INTERNAL_SERVER_ERROR,
        error_status::QUOTA_EXCEEDED => StatusCode::TOO_MANY_REQUESTS,
        _ => {
            let body = ResponseBody { name: "projects/mock/messages/1".to_string(), error: None };
            return (StatusCode::OK, axum::Json(body)).into_response();
        }
    };
    let body = ResponseBody {
        name: String::new(),
        error: Some(FcmError {
            status: token.to_string(),
            message: format!("mock error:{token}"),
            details: Vec::new(),
        }),
    };
    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn device_post(token: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(format!("/3/device/{token}"))
            .body(Body::from(r#"{"aps":{"alert":"x"}}"#))
            .unwrap()
    }

    #[tokio::test]
    async fn well_formed_token_succeeds() {
        let app = apns_mock_router(Duration::ZERO);
        let response = app.oneshot(device_post(&"11".repeat(32))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("apns-id").unwrap(), "apns-id");
    }

    #[tokio::test]
    async fn oversized_token_is_bad_device_token() {
        let app = apns_mock_router(Duration::ZERO);
        let response = app.oneshot(device_post(&"a".repeat(101))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["reason"], "BadDeviceToken");
    }

    #[tokio::test]
    async fn unregistered_is_410_with_timestamp() {
        let app = apns_mock_router(Duration::ZERO);
        let response = app.oneshot(device_post("unregistered")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GONE);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "Unregistered");
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn fcm_mock_echoes_bearer_classification() {
        let app = fcmv1_mock_router("test", Duration::ZERO);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/projects/test/messages:send")
            .header("authorization", format!("Bearer {}", error_status::UNAVAILABLE))
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"]["status"], "UNAVAILABLE");
    }

    #[tokio::test]
    async fn fcm_mock_succeeds_without_magic_token() {
        let app = fcmv1_mock_router("test", Duration::ZERO);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/projects/test/messages:send")
            .header("authorization", "Bearer anything")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "projects/mock/messages/1");
    }
}
