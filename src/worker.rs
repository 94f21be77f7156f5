//! Worker loop and sender tasks.
//!
//! Each worker owns a bounded in-queue and response queue plus a fixed pool
//! of senders. The worker demultiplexes ingest batches into per-request
//! sender work, receives one [`SenderResponse`] per request, and classifies
//! the outcome: success, permanent per-recipient error (hook event), or
//! retryable failure (requeue).

use std::sync::Arc;
use std::time::Instant;

use async_channel::TrySendError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::apns::{self, Reason};
use crate::fcmv1::{self, error_status};
use crate::hook::HookEvent;
use crate::request::{Notification, Request};
use crate::response::ProviderResponse;
use crate::stats::Stats;
use crate::supervisor::{Handlers, Tunables};

/// One sender's answer for one request.
#[derive(Debug)]
pub struct SenderResponse {
    /// Per-recipient results; empty on a transport-level failure.
    pub results: Vec<ProviderResponse>,
    /// Provider round-trip time in seconds.
    pub resp_time: f64,
    /// The originating request (value-copied; requeued on retry).
    pub request: Request,
    /// Transport-level error, when no response was obtained.
    pub err: Option<String>,
    pub uid: Uuid,
}

pub(crate) struct Worker {
    pub id: usize,
    pub ingest_rx: async_channel::Receiver<Vec<Request>>,
    pub retry_tx: async_channel::Sender<Request>,
    pub err_tx: async_channel::Sender<HookEvent>,
    pub exit: watch::Receiver<bool>,
    pub stats: Arc<Stats>,
    pub handlers: Handlers,
    pub apns: Option<Arc<apns::Client>>,
    pub fcm_v1: Option<Arc<fcmv1::Client>>,
    pub tunables: Tunables,
    pub queue_size: usize,
}

pub(crate) struct WorkerHandle {
    pub in_tx: async_channel::Sender<Request>,
    pub resp_tx: async_channel::Sender<SenderResponse>,
    pub task: JoinHandle<()>,
}

impl Worker {
    /// Spawn the worker task and its sender pool.
    pub fn spawn(self) -> WorkerHandle {
        let (in_tx, in_rx) = async_channel::bounded(self.queue_size);
        let (resp_tx, resp_rx) = async_channel::bounded(self.queue_size);
        let handle_in_tx = in_tx.clone();
        let handle_resp_tx = resp_tx.clone();
        let task = tokio::spawn(self.run(in_tx, in_rx, resp_tx, resp_rx));
        WorkerHandle { in_tx: handle_in_tx, resp_tx: handle_resp_tx, task }
    }

    async fn run(
        self,
        in_tx: async_channel::Sender<Request>,
        in_rx: async_channel::Receiver<Request>,
        resp_tx: async_channel::Sender<SenderResponse>,
        resp_rx: async_channel::Receiver<SenderResponse>,
    ) {
        let Worker {
            id,
            ingest_rx,
            retry_tx,
            err_tx,
            mut exit,
            stats,
            handlers,
            apns,
            fcm_v1,
            tunables,
            queue_size: _,
        } = self;

        stats.worker_started();
        let mut senders = Vec::with_capacity(tunables.sender_num);
        for sender_id in 0..tunables.sender_num {
            tracing::debug!(r#type = "worker", worker_id = id, sender_id, "spawned sender");
            senders.push(tokio::spawn(run_sender(
                in_rx.clone(),
                resp_tx.clone(),
                apns.clone(),
                fcm_v1.clone(),
            )));
        }
        // Senders hold their own clones; the worker's copy would otherwise
        // keep the response channel open after they exit.
        drop(resp_tx);
        drop(in_rx);

        let ctx = Ctx {
            worker_id: id,
            retry_tx: &retry_tx,
            err_tx: &err_tx,
            stats: &stats,
            handlers: &handlers,
            tunables: &tunables,
        };

        loop {
            tokio::select! {
                batch = ingest_rx.recv() => {
                    let Ok(batch) = batch else { break };
                    receive_requests(id, &in_tx, batch).await;
                }
                response = resp_rx.recv() => {
                    let Ok(response) = response else { break };
                    handle_response(&ctx, response);
                }
                _ = exit.changed() => break,
            }
        }

        stats.worker_stopped();
        // The worker closes its own queue; senders drain what is left.
        in_tx.close();
        for sender in senders {
            let _ = sender.await;
        }
    }
}

/// Push every request of a batch onto the worker's own queue. Deliberately
/// blocking: once a batch is admitted, no request is dropped here.
async fn receive_requests(
    worker_id: usize,
    in_tx: &async_channel::Sender<Request>,
    batch: Vec<Request>,
) {
    tracing::debug!(
        r#type = "worker",
        worker_id,
        worker_queue_size = in_tx.len(),
        request_size = batch.len(),
        "received request batch"
    );
    for request in batch {
        if in_tx.send(request).await.is_err() {
            return;
        }
    }
}

/// One sender: one provider call in flight at a time.
pub(crate) async fn run_sender(
    in_rx: async_channel::Receiver<Request>,
    resp_tx: async_channel::Sender<SenderResponse>,
    apns: Option<Arc<apns::Client>>,
    fcm_v1: Option<Arc<fcmv1::Client>>,
) {
    while let Ok(request) = in_rx.recv().await {
        let started = Instant::now();
        let (results, err) = match &request.notification {
            Notification::Apns(notification) => {
                let Some(client) = &apns else {
                    tracing::error!(r#type = "sender", "apns client is not configured");
                    continue;
                };
                match client.send(notification).await {
                    Ok(result) => (vec![ProviderResponse::Apns(result)], None),
                    Err(e) => (Vec::new(), Some(e.to_string())),
                }
            }
            Notification::FcmV1(payload) => {
                let Some(client) = &fcm_v1 else {
                    tracing::error!(r#type = "sender", "fcm v1 client is not configured");
                    continue;
                };
                match client.send(payload).await {
                    Ok(result) => (vec![ProviderResponse::FcmV1(result)], None),
                    Err(e) => (Vec::new(), Some(e.to_string())),
                }
            }
        };

        let response = SenderResponse {
            results,
            resp_time: started.elapsed().as_secs_f64(),
            request,
            err,
            uid: Uuid::new_v4(),
        };
        if resp_tx.try_send(response).is_err() {
            tracing::warn!(r#type = "sender", "response queue is full; dropping response");
        }
    }
}

pub(crate) struct Ctx<'a> {
    pub worker_id: usize,
    pub retry_tx: &'a async_channel::Sender<Request>,
    pub err_tx: &'a async_channel::Sender<HookEvent>,
    pub stats: &'a Stats,
    pub handlers: &'a Handlers,
    pub tunables: &'a Tunables,
}

/// Route a sender response to the terminal sinks: stats, handlers, the error
/// hook, or the retry queue.
pub(crate) fn handle_response(ctx: &Ctx<'_>, response: SenderResponse) {
    match &response.request.notification {
        Notification::Apns(_) => handle_apns_response(ctx, response),
        Notification::FcmV1(_) => handle_fcmv1_response(ctx, response),
    }
}

fn handle_apns_response(ctx: &Ctx<'_>, response: SenderResponse) {
    let SenderResponse { results, resp_time, request, err, uid } = response;

    if let Some(err) = err {
        // No response from APNs at all: transport-level failure.
        tracing::warn!(
            r#type = "worker",
            worker_id = ctx.worker_id,
            resend_cnt = request.tries,
            resp_uid = %uid,
            reason = %err,
            "http connection error with APNs"
        );
        retry_later(ctx, request, false);
        return;
    }

    let mut retry = false;
    for result in &results {
        match result.error() {
            None => {
                ctx.stats.incr_sent();
                ctx.handlers.success.on_response(result);
                tracing::info!(
                    r#type = "worker",
                    worker_id = ctx.worker_id,
                    token = result.recipient_identifier(),
                    response_time = resp_time,
                    resp_uid = %uid,
                    "succeeded to send a notification"
                );
            }
            Some(reason) => {
                ctx.stats.incr_errors();
                ctx.handlers.error.on_response(result);
                emit_hook(ctx, result);
                tracing::error!(
                    r#type = "worker",
                    worker_id = ctx.worker_id,
                    status = result.status(),
                    token = result.recipient_identifier(),
                    reason,
                    resend_cnt = request.tries,
                    response_time = resp_time,
                    resp_uid = %uid,
                    "apns rejected the notification"
                );
                // An expired provider token is refreshed on the next
                // attempt, so the request itself is still deliverable.
                if reason == Reason::ExpiredProviderToken.as_str() {
                    retry = true;
                }
            }
        }
    }
    if retry {
        retry_later(ctx, request, false);
    }
}

fn handle_fcmv1_response(ctx: &Ctx<'_>, response: SenderResponse) {
    let SenderResponse { results, resp_time, request, err, uid } = response;

    if let Some(err) = err {
        tracing::warn!(
            r#type = "worker",
            worker_id = ctx.worker_id,
            resend_cnt = request.tries,
            resp_uid = %uid,
            reason = %err,
            "http connection error with FCM"
        );
        retry_later(ctx, request, false);
        return;
    }

    let mut retry = false;
    let mut retry_delayed = false;
    for result in &results {
        match result.error() {
            None => {
                ctx.stats.incr_sent();
                ctx.handlers.success.on_response(result);
                tracing::info!(
                    r#type = "worker",
                    worker_id = ctx.worker_id,
                    token = result.recipient_identifier(),
                    response_time = resp_time,
                    resp_uid = %uid,
                    "succeeded to send a notification"
                );
            }
            Some(error_status::UNAVAILABLE) | Some(error_status::INTERNAL) => {
                retry = true;
            }
            Some(error_status::QUOTA_EXCEEDED) => {
                retry_delayed = true;
            }
            Some(status @ (error_status::INVALID_ARGUMENT | error_status::UNREGISTERED
            | error_status::NOT_FOUND)) => {
                ctx.stats.incr_errors();
                ctx.handlers.error.on_response(result);
                emit_hook(ctx, result);
                tracing::error!(
                    r#type = "worker",
                    worker_id = ctx.worker_id,
                    status = result.status(),
                    token = result.recipient_identifier(),
                    error_status = status,
                    resp_uid = %uid,
                    "fcm rejected the notification"
                );
            }
            Some(status) => {
                ctx.stats.incr_errors();
                ctx.handlers.error.on_response(result);
                tracing::error!(
                    r#type = "worker",
                    worker_id = ctx.worker_id,
                    status = result.status(),
                    token = result.recipient_identifier(),
                    error_status = status,
                    "unknown fcm error status"
                );
            }
        }
    }
    if retry {
        retry_later(ctx, request, false);
    } else if retry_delayed {
        retry_later(ctx, request, true);
    }
}

/// Count a retry attempt and requeue the request unless the bound is
/// reached. With `delayed`, the requeue happens after the rate-limit
/// interval.
fn retry_later(ctx: &Ctx<'_>, mut request: Request, delayed: bool) {
    ctx.stats.incr_retries();
    request.tries += 1;
    if request.tries >= ctx.tunables.send_retry_count {
        tracing::warn!(
            r#type = "worker",
            worker_id = ctx.worker_id,
            resend_cnt = request.tries,
            "retry count is over {}; could not deliver notification",
            ctx.tunables.send_retry_count
        );
        return;
    }

    if delayed {
        let retry_tx = ctx.retry_tx.clone();
        let delay = ctx.tunables.quota_exceeded_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if retry_tx.try_send(request).is_err() {
                tracing::warn!(r#type = "worker", "retry queue is full; dropping deferred retry");
            }
        });
        return;
    }

    if ctx.retry_tx.try_send(request).is_err() {
        tracing::warn!(
            r#type = "worker",
            worker_id = ctx.worker_id,
            "supervisor retry queue is full"
        );
    }
}

fn emit_hook(ctx: &Ctx<'_>, result: &ProviderResponse) {
    let event = match result.to_json() {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(r#type = "worker", error = %e, "failed to serialize hook event");
            return;
        }
    };
    match ctx.err_tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!(
                r#type = "worker",
                worker_id = ctx.worker_id,
                "error hook queue is full; dropping event"
            );
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apns::ApnsResult;
    use crate::config::Config;
    use crate::fcmv1::{FcmError, FcmV1Result};
    use crate::supervisor::NoopResponseHandler;

    struct Fixture {
        retry_tx: async_channel::Sender<Request>,
        retry_rx: async_channel::Receiver<Request>,
        err_tx: async_channel::Sender<HookEvent>,
        err_rx: async_channel::Receiver<HookEvent>,
        stats: Arc<Stats>,
        handlers: Handlers,
        tunables: Tunables,
    }

    impl Fixture {
        fn new() -> Fixture {
            let (retry_tx, retry_rx) = async_channel::bounded(64);
            let (err_tx, err_rx) = async_channel::bounded(64);
            Fixture {
                retry_tx,
                retry_rx,
                err_tx,
                err_rx,
                stats: Arc::new(Stats::new(&Config::default())),
                handlers: Handlers {
                    success: Arc::new(NoopResponseHandler),
                    error: Arc::new(NoopResponseHandler),
                },
                tunables: Tunables::default(),
            }
        }

        fn ctx(&self) -> Ctx<'_> {
            Ctx {
                worker_id: 0,
                retry_tx: &self.retry_tx,
                err_tx: &self.err_tx,
                stats: &self.stats,
                handlers: &self.handlers,
                tunables: &self.tunables,
            }
        }
    }

    fn apns_request(tries: usize) -> Request {
        let raw = r#"{"token":"t","payload":{"aps":{"alert":"x"}}}"#;
        let posted: crate::request::PostedData = serde_json::from_str(raw).unwrap();
        let mut request: Request = posted.into();
        request.tries = tries;
        request
    }

    fn apns_response(request: Request, status_code: u16, reason: &str) -> SenderResponse {
        SenderResponse {
            results: vec![ProviderResponse::Apns(ApnsResult {
                apns_id: "apns-id".to_string(),
                status_code,
                token: "t".to_string(),
                reason: reason.to_string(),
            })],
            resp_time: 0.01,
            request,
            err: None,
            uid: Uuid::new_v4(),
        }
    }

    fn fcm_request() -> Request {
        Request::new(Notification::FcmV1(fcmv1::Payload {
            message: fcmv1::Message { token: Some("t".to_string()), ..Default::default() },
        }))
    }

    fn fcm_response(request: Request, status_code: u16, status: Option<&str>) -> SenderResponse {
        SenderResponse {
            results: vec![ProviderResponse::FcmV1(FcmV1Result {
                status_code,
                token: "t".to_string(),
                error: status.map(|s| FcmError {
                    status: s.to_string(),
                    message: format!("mock error:{s}"),
                    details: Vec::new(),
                }),
            })],
            resp_time: 0.01,
            request,
            err: None,
            uid: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn apns_success_counts_sent_and_emits_nothing() {
        let fx = Fixture::new();
        handle_response(&fx.ctx(), apns_response(apns_request(0), 200, ""));
        assert_eq!(fx.stats.sent_count(), 1);
        assert_eq!(fx.stats.err_count(), 0);
        assert!(fx.err_rx.is_empty());
        assert!(fx.retry_rx.is_empty());
    }

    #[tokio::test]
    async fn apns_permanent_error_hooks_without_retry() {
        let fx = Fixture::new();
        handle_response(&fx.ctx(), apns_response(apns_request(0), 400, "MissingTopic"));
        assert_eq!(fx.stats.err_count(), 1);
        assert_eq!(fx.stats.retry_count(), 0);
        assert!(fx.retry_rx.is_empty());

        let event = fx.err_rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&event).unwrap();
        assert_eq!(value["provider"], "apns");
        assert_eq!(value["reason"], "MissingTopic");
    }

    #[tokio::test]
    async fn apns_expired_provider_token_hooks_and_retries() {
        let fx = Fixture::new();
        handle_response(&fx.ctx(), apns_response(apns_request(0), 403, "ExpiredProviderToken"));
        assert_eq!(fx.stats.err_count(), 1);
        assert_eq!(fx.stats.retry_count(), 1);
        assert_eq!(fx.err_rx.len(), 1);
        let requeued = fx.retry_rx.try_recv().unwrap();
        assert_eq!(requeued.tries, 1);
    }

    #[tokio::test]
    async fn transport_error_retries_without_hook() {
        let fx = Fixture::new();
        let response = SenderResponse {
            results: Vec::new(),
            resp_time: 0.0,
            request: apns_request(0),
            err: Some("connection refused".to_string()),
            uid: Uuid::new_v4(),
        };
        handle_response(&fx.ctx(), response);
        assert_eq!(fx.stats.retry_count(), 1);
        assert_eq!(fx.stats.err_count(), 0);
        assert!(fx.err_rx.is_empty());
        assert_eq!(fx.retry_rx.try_recv().unwrap().tries, 1);
    }

    #[tokio::test]
    async fn retry_bound_drops_the_request() {
        let fx = Fixture::new();
        // tries = 9 is the last allowed attempt; its failure is counted but
        // the request never re-enters the retry queue.
        handle_response(&fx.ctx(), apns_response(apns_request(9), 403, "ExpiredProviderToken"));
        assert_eq!(fx.stats.retry_count(), 1);
        assert!(fx.retry_rx.is_empty());
    }

    #[tokio::test]
    async fn fcm_unavailable_retries_without_hook() {
        let fx = Fixture::new();
        handle_response(
            &fx.ctx(),
            fcm_response(fcm_request(), 503, Some(error_status::UNAVAILABLE)),
        );
        assert_eq!(fx.stats.retry_count(), 1);
        assert_eq!(fx.stats.err_count(), 0);
        assert!(fx.err_rx.is_empty());
        assert_eq!(fx.retry_rx.try_recv().unwrap().tries, 1);
    }

    #[tokio::test]
    async fn fcm_permanent_errors_hook_without_retry() {
        let fx = Fixture::new();
        for status in [error_status::INVALID_ARGUMENT, error_status::UNREGISTERED] {
            handle_response(&fx.ctx(), fcm_response(fcm_request(), 400, Some(status)));
        }
        assert_eq!(fx.stats.err_count(), 2);
        assert_eq!(fx.err_rx.len(), 2);
        assert!(fx.retry_rx.is_empty());
    }

    #[tokio::test]
    async fn fcm_quota_exceeded_requeues_after_delay() {
        let mut fx = Fixture::new();
        fx.tunables.quota_exceeded_delay = std::time::Duration::from_millis(20);
        handle_response(
            &fx.ctx(),
            fcm_response(fcm_request(), 429, Some(error_status::QUOTA_EXCEEDED)),
        );
        assert_eq!(fx.stats.retry_count(), 1);
        assert!(fx.retry_rx.is_empty(), "requeue must be deferred");
        let requeued =
            tokio::time::timeout(std::time::Duration::from_secs(1), fx.retry_rx.recv())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(requeued.tries, 1);
    }

    #[tokio::test]
    async fn fcm_unknown_status_is_terminal_without_hook() {
        let fx = Fixture::new();
        handle_response(&fx.ctx(), fcm_response(fcm_request(), 418, Some("SENDER_ID_MISMATCH")));
        assert_eq!(fx.stats.err_count(), 1);
        assert!(fx.err_rx.is_empty());
        assert!(fx.retry_rx.is_empty());
    }

    #[tokio::test]
    async fn fcm_success_counts_sent() {
        let fx = Fixture::new();
        handle_response(&fx.ctx(), fcm_response(fcm_request(), 200, None));
        assert_eq!(fx.stats.sent_count(), 1);
    }
}
