//! Shared helpers for the integration tests: mock provider servers bound to
//! ephemeral ports, a scoreboard response handler, and fast engine timings.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;

use gunfish::config::{Config, SectionApns, SectionFcmV1};
use gunfish::fcmv1::{error_status, FcmError, ResponseBody};
use gunfish::response::ProviderResponse;
use gunfish::supervisor::{ResponseHandler, Tunables};

/// Serve a router on an ephemeral local port; returns the base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

/// Config with APNs in provider-token mode, pointed at `host`.
pub fn apns_config(host: &str) -> Config {
    let mut config = Config::default();
    config.provider.worker_num = 2;
    config.provider.queue_size = 128;
    config.apns = Some(SectionApns {
        host: Some(host.to_string()),
        key_file: Some(fixture("authkey.p8")),
        kid: Some("KEYID12345".to_string()),
        team_id: Some("TEAM000001".to_string()),
        ..SectionApns::default()
    });
    config
}

/// Config with FCM v1 pointed at the mock base `{host}/v1/projects`.
pub fn fcm_config(host: &str) -> Config {
    let mut config = Config::default();
    config.provider.worker_num = 2;
    config.provider.queue_size = 128;
    config.fcm_v1 = Some(SectionFcmV1 {
        google_application_credentials: fixture("unused-service-account.json"),
        endpoint: Some(format!("{host}/v1/projects")),
    });
    config
}

/// Tight timings so retry-heavy scenarios finish quickly.
pub fn fast_tunables() -> Tunables {
    Tunables {
        retry_wait: Duration::from_millis(20),
        shutdown_wait: Duration::from_millis(1),
        restart_wait_count: 5,
        quota_exceeded_delay: Duration::from_millis(50),
        ..Tunables::default()
    }
}

/// Response handler counting outcomes by error status (or `"success"`).
#[derive(Default)]
pub struct Scoreboard {
    counts: Mutex<HashMap<String, usize>>,
}

impl Scoreboard {
    pub fn new() -> Arc<Scoreboard> {
        Arc::new(Scoreboard::default())
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

impl ResponseHandler for Scoreboard {
    fn on_response(&self, result: &ProviderResponse) {
        let key = result.error().unwrap_or("success").to_string();
        *self.counts.lock().unwrap().entry(key).or_insert(0) += 1;
    }
}

/// Poll `cond` until it holds or a 10 second deadline passes.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// FCM mock that fails the first `failures` calls with `UNAVAILABLE`, then
/// succeeds.
pub fn flaky_fcm_router(project_id: &str, failures: usize) -> Router {
    let counter = Arc::new(AtomicUsize::new(0));
    let handler = move || {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                let body = ResponseBody {
                    name: String::new(),
                    error: Some(FcmError {
                        status: error_status::UNAVAILABLE.to_string(),
                        message: "mock error:UNAVAILABLE".to_string(),
                        details: Vec::new(),
                    }),
                };
                (StatusCode::SERVICE_UNAVAILABLE, axum::Json(body)).into_response()
            } else {
                let body = ResponseBody {
                    name: "projects/mock/messages/1".to_string(),
                    error: None,
                };
                (StatusCode::OK, axum::Json(body)).into_response()
            }
        }
    };
    Router::new().route(&format!("/v1/projects/{project_id}/messages:send"), post(handler))
}
