//! Supervisor: owns the channel topology and the task lifecycle.
//!
//! The supervisor allocates the bounded channels that form the engine spine,
//! spawns the workers (each with its own sender pool), the retry ticker, and
//! the error-hook sink, and drives the orderly shutdown drain. Channels are
//! closed by their producing side: workers close their own queues, the
//! supervisor closes the shared ones.

use std::sync::Arc;
use std::time::Duration;

use async_channel::TrySendError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::apns;
use crate::config::Config;
use crate::fcmv1::{self, ServiceAccountTokenSource, TokenSource};
use crate::hook::{self, HookEvent, SinkMode};
use crate::request::Request;
use crate::response::ProviderResponse;
use crate::stats::{QueueGauges, Stats};
use crate::worker::{SenderResponse, Worker, WorkerHandle};

/// Senders per worker; each sender holds one provider call in flight.
pub const SENDER_NUM: usize = 20;
/// A request is attempted at most this many times.
pub const SEND_RETRY_COUNT: usize = 10;
/// Period of the retry ticker.
pub const RETRY_WAIT_TIME: Duration = Duration::from_millis(500);
/// Requests moved from the retry queue back to ingest per tick.
pub const RETRY_ONCE_COUNT: usize = 1000;
/// Poll interval of the shutdown drain loop.
pub const SHUTDOWN_WAIT_TIME: Duration = Duration::from_millis(10);
/// Consecutive empty polls required before closing down.
pub const RESTART_WAIT_COUNT: usize = 50;
/// Deferred-requeue delay applied to rate-limited FCM sends.
pub const QUOTA_EXCEEDED_DELAY: Duration = Duration::from_secs(60);

/// Heuristic average provider response time used to size worker queues.
pub const AVERAGE_RESPONSE_MS: usize = 150;
/// The engine is sized to absorb the target flow for this many seconds.
pub const FLOW_RATE_INTERVAL_SECS: usize = 10;
/// Target flow rate (requests per second).
pub const REQUEST_PER_SEC: usize = 2000;

/// Engine timing knobs. Production uses the defaults; tests tighten them.
#[derive(Debug, Clone)]
pub struct Tunables {
    pub sender_num: usize,
    pub send_retry_count: usize,
    pub retry_wait: Duration,
    pub retry_once_count: usize,
    pub shutdown_wait: Duration,
    pub restart_wait_count: usize,
    pub quota_exceeded_delay: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            sender_num: SENDER_NUM,
            send_retry_count: SEND_RETRY_COUNT,
            retry_wait: RETRY_WAIT_TIME,
            retry_once_count: RETRY_ONCE_COUNT,
            shutdown_wait: SHUTDOWN_WAIT_TIME,
            restart_wait_count: RESTART_WAIT_COUNT,
            quota_exceeded_delay: QUOTA_EXCEEDED_DELAY,
        }
    }
}

/// Observer of per-recipient outcomes, installed on the supervisor.
///
/// The engine calls the success handler for delivered notifications and the
/// error handler for provider rejections, before any hook event is emitted.
pub trait ResponseHandler: Send + Sync {
    fn on_response(&self, result: &ProviderResponse);
}

/// Default handler: does nothing.
pub struct NoopResponseHandler;

impl ResponseHandler for NoopResponseHandler {
    fn on_response(&self, _result: &ProviderResponse) {}
}

/// The success/error handler pair shared by all workers.
#[derive(Clone)]
pub(crate) struct Handlers {
    pub success: Arc<dyn ResponseHandler>,
    pub error: Arc<dyn ResponseHandler>,
}

/// Per-worker queue capacity, proportional to the gap between the target
/// flow rate and the queue's natural throughput, spread across workers.
pub(crate) fn worker_queue_size(request_queue_size: usize, worker_num: usize) -> usize {
    let tp = ((request_queue_size * AVERAGE_RESPONSE_MS / 1000) / SENDER_NUM).max(1);
    let diff = (REQUEST_PER_SEC as isize - (request_queue_size / tp) as isize).unsigned_abs();
    (diff * FLOW_RATE_INTERVAL_SECS / worker_num).max(1)
}

/// Errors from [`Supervisor::enqueue`].
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// The ingest queue would block; the caller should advertise Retry-After.
    #[error("supervisor queue is full")]
    QueueFull,
    /// The engine is shutting down.
    #[error("supervisor queue is closed")]
    Closed,
}

/// Errors from [`SupervisorBuilder::start`].
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("apns: {0}")]
    Apns(#[from] apns::ApnsError),
    #[error("fcm v1: {0}")]
    FcmV1(#[from] fcmv1::FcmV1Error),
}

/// Configures and starts a [`Supervisor`].
pub struct SupervisorBuilder {
    config: Config,
    tunables: Tunables,
    success_handler: Arc<dyn ResponseHandler>,
    error_handler: Arc<dyn ResponseHandler>,
    fcm_token_source: Option<(Arc<dyn TokenSource>, String)>,
}

impl SupervisorBuilder {
    pub fn new(config: Config) -> SupervisorBuilder {
        SupervisorBuilder {
            config,
            tunables: Tunables::default(),
            success_handler: Arc::new(NoopResponseHandler),
            error_handler: Arc::new(NoopResponseHandler),
            fcm_token_source: None,
        }
    }

    /// Override engine timing (tests).
    pub fn tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }

    /// Install the handler observing successful deliveries.
    pub fn on_success(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.success_handler = handler;
        self
    }

    /// Install the handler observing provider rejections.
    pub fn on_error(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Substitute the FCM token source and project id, bypassing the
    /// service-account credentials file.
    pub fn fcm_token_source(
        mut self,
        source: Arc<dyn TokenSource>,
        project_id: impl Into<String>,
    ) -> Self {
        self.fcm_token_source = Some((source, project_id.into()));
        self
    }

    /// Allocate channels, construct provider clients, and spawn the engine
    /// tasks. Fails if any adapter cannot be constructed.
    pub async fn start(self) -> Result<Supervisor, StartError> {
        let SupervisorBuilder { config, tunables, success_handler, error_handler, fcm_token_source } =
            self;
        let provider = &config.provider;
        let wq_size = worker_queue_size(provider.request_queue_size, provider.worker_num);

        let (ingest_tx, ingest_rx) = async_channel::bounded(provider.queue_size);
        let (retry_tx, retry_rx) =
            async_channel::bounded(provider.request_queue_size * provider.worker_num);
        let (err_tx, err_rx) = async_channel::bounded(wq_size * provider.worker_num);
        let (exit_tx, exit_rx) = watch::channel(false);
        let stats = Arc::new(Stats::new(&config));

        tracing::info!(r#type = "supervisor", queue_size = provider.queue_size, "queue size");
        tracing::info!(
            r#type = "supervisor",
            retry_queue_size = provider.request_queue_size * provider.worker_num,
            "retry queue size"
        );

        let sink_mode = SinkMode::from_provider(provider, provider.worker_num);
        let hook_tasks = hook::spawn(sink_mode, err_rx.clone());

        let fcm = if let Some(section) = &config.fcm_v1 {
            let (source, project_id) = match fcm_token_source {
                Some((source, project_id)) => (source, project_id),
                None => {
                    let (source, project_id) = ServiceAccountTokenSource::from_file(
                        &section.google_application_credentials,
                    )
                    .await?;
                    (Arc::new(source) as Arc<dyn TokenSource>, project_id)
                }
            };
            Some((source, project_id, section.endpoint.clone()))
        } else {
            None
        };

        let handlers = Handlers { success: success_handler, error: error_handler };
        let apns_host = config
            .apns
            .as_ref()
            .and_then(|apns| apns.host.clone())
            .unwrap_or_else(|| crate::config::PROD_SERVER.to_string());

        let mut workers = Vec::with_capacity(provider.worker_num);
        let mut worker_queues = Vec::with_capacity(provider.worker_num);
        for id in 0..provider.worker_num {
            // One HTTP client per worker; its senders share the connection
            // pool via HTTP/2 multiplexing. The APNs provider-token state is
            // per worker too, converging through the issued-at quantization.
            let apns_client = match &config.apns {
                Some(section) if section.enabled() => {
                    Some(Arc::new(apns::Client::new(section, apns_host.clone())?))
                }
                _ => None,
            };
            let fcm_client = match &fcm {
                Some((source, project_id, endpoint)) => Some(Arc::new(fcmv1::Client::new(
                    source.clone(),
                    project_id,
                    endpoint.as_deref(),
                )?)),
                None => None,
            };

            let handle = Worker {
                id,
                ingest_rx: ingest_rx.clone(),
                retry_tx: retry_tx.clone(),
                err_tx: err_tx.clone(),
                exit: exit_rx.clone(),
                stats: stats.clone(),
                handlers: handlers.clone(),
                apns: apns_client,
                fcm_v1: fcm_client,
                tunables: tunables.clone(),
                queue_size: wq_size,
            }
            .spawn();
            tracing::debug!(r#type = "worker", worker_id = id, "spawned worker");
            worker_queues.push((handle.in_tx.clone(), handle.resp_tx.clone()));
            workers.push(handle);
        }

        let ticker = spawn_retry_ticker(
            retry_rx.clone(),
            retry_tx.clone(),
            ingest_tx.clone(),
            exit_rx,
            tunables.clone(),
        );

        Ok(Supervisor {
            ingest_tx,
            ingest_rx,
            retry_tx,
            retry_rx,
            err_tx,
            err_rx,
            exit_tx,
            worker_queues,
            stats,
            tunables,
            tasks: tokio::sync::Mutex::new(Some(TaskSet { workers, hook_tasks, ticker })),
        })
    }
}

struct TaskSet {
    workers: Vec<WorkerHandle>,
    hook_tasks: Vec<JoinHandle<()>>,
    ticker: JoinHandle<()>,
}

/// The running engine.
pub struct Supervisor {
    ingest_tx: async_channel::Sender<Vec<Request>>,
    ingest_rx: async_channel::Receiver<Vec<Request>>,
    retry_tx: async_channel::Sender<Request>,
    retry_rx: async_channel::Receiver<Request>,
    err_tx: async_channel::Sender<HookEvent>,
    err_rx: async_channel::Receiver<HookEvent>,
    exit_tx: watch::Sender<bool>,
    worker_queues: Vec<(async_channel::Sender<Request>, async_channel::Sender<SenderResponse>)>,
    stats: Arc<Stats>,
    tunables: Tunables,
    tasks: tokio::sync::Mutex<Option<TaskSet>>,
}

impl Supervisor {
    pub fn builder(config: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(config)
    }

    /// Non-blocking enqueue of an accepted batch.
    pub fn enqueue(&self, batch: Vec<Request>) -> Result<(), EnqueueError> {
        let batch_len = batch.len();
        match self.ingest_tx.try_send(batch) {
            Ok(()) => {
                tracing::debug!(
                    r#type = "supervisor",
                    request_size = batch_len,
                    queue_size = self.ingest_rx.len(),
                    retry_queue_size = self.retry_rx.len(),
                    "enqueued request batch"
                );
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    r#type = "supervisor",
                    request_size = batch_len,
                    queue_size = self.ingest_rx.len(),
                    "supervisor queue is full"
                );
                Err(EnqueueError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Queue depths for the stats endpoint.
    pub fn queue_gauges(&self) -> QueueGauges {
        QueueGauges {
            queue_size: self.ingest_rx.len(),
            retry_queue_size: self.retry_rx.len(),
            workers_queue_size: self.worker_queues.iter().map(|(inq, _)| inq.len()).sum(),
            command_queue_size: self.err_rx.len(),
        }
    }

    fn backlog(&self) -> usize {
        self.ingest_rx.len()
            + self.retry_rx.len()
            + self.err_rx.len()
            + self.worker_queues.iter().map(|(inq, respq)| inq.len() + respq.len()).sum::<usize>()
    }

    /// Drain the engine and stop every task.
    ///
    /// Polls until all engine channels have been empty for
    /// `restart_wait_count` consecutive intervals (force-closing after ~2
    /// minutes), then signals exit, closes the shared channels from the
    /// producing side, and joins the tasks. Idempotent.
    pub async fn shutdown(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else { return };
        tracing::info!(r#type = "supervisor", "waiting for supervisor to stop...");

        let mut zero_cnt = 0usize;
        let mut try_cnt = 0usize;
        while zero_cnt < self.tunables.restart_wait_count {
            if self.backlog() > 0 {
                zero_cnt = 0;
                try_cnt += 1;
            } else {
                zero_cnt += 1;
                try_cnt = 0;
            }
            // Give up after restart_wait_count * 40 * 6 non-empty polls
            // (about 2 minutes at the default 10ms interval).
            if try_cnt > self.tunables.restart_wait_count * 40 * 6 {
                tracing::warn!(r#type = "supervisor", "engine did not drain; force closing");
                break;
            }
            tokio::time::sleep(self.tunables.shutdown_wait).await;
        }

        let _ = self.exit_tx.send(true);
        self.err_tx.close();
        for task in tasks.hook_tasks {
            let _ = task.await;
        }
        for worker in tasks.workers {
            let _ = worker.task.await;
        }
        self.ingest_tx.close();
        self.retry_tx.close();
        let _ = tasks.ticker.await;

        tracing::info!(r#type = "supervisor", "stopped supervisor");
    }
}

/// Periodically move requests from the retry queue back into ingest, each as
/// a singleton batch. If ingest is full the remainder stays for the next
/// tick.
fn spawn_retry_ticker(
    retry_rx: async_channel::Receiver<Request>,
    retry_tx: async_channel::Sender<Request>,
    ingest_tx: async_channel::Sender<Vec<Request>>,
    mut exit: watch::Receiver<bool>,
    tunables: Tunables,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tunables.retry_wait);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for _ in 0..tunables.retry_once_count {
                        let Ok(request) = retry_rx.try_recv() else { break };
                        let tries = request.tries;
                        match ingest_tx.try_send(vec![request]) {
                            Ok(()) => {
                                tracing::debug!(r#type = "retry", resend_cnt = tries, "requeued notification");
                            }
                            Err(TrySendError::Full(mut batch)) => {
                                tracing::info!(r#type = "retry", "could not requeue; supervisor queue is full");
                                if let Some(request) = batch.pop() {
                                    let _ = retry_tx.try_send(request);
                                }
                                break;
                            }
                            Err(TrySendError::Closed(_)) => return,
                        }
                    }
                }
                _ = exit.changed() => return,
            }
        }
    })
}
