#![forbid(unsafe_code)]

//! # Gunfish
//!
//! A push-notification provider gateway. Application backends POST batched
//! requests to a local HTTP endpoint; a fixed pool of workers delivers each
//! request to Apple Push Notification service (HTTP/2) or Firebase Cloud
//! Messaging (FCM v1), absorbing backpressure with bounded queues, retrying
//! transient failures, and surfacing permanent per-recipient failures through
//! an out-of-band error hook.
//!
//! ## Architecture
//!
//! ```text
//! POST /push/* ──▶ ingest queue ──▶ workers ──▶ senders ──▶ APNs / FCM v1
//!                       ▲              │
//!                       │              ├──▶ retry queue ──▶ retry ticker ──▶ ingest
//!                       │              └──▶ error-hook sink (subprocess/stream)
//! ```
//!
//! The [`Supervisor`] owns the channel topology and task lifecycle; the HTTP
//! ingress in [`server`] is a thin layer that validates batches and performs a
//! non-blocking enqueue, answering `503` with a computed `Retry-After` when
//! the engine is saturated.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gunfish::{Config, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("/etc/gunfish/config.toml")?;
//!     let supervisor = Supervisor::builder(config.clone()).start().await?;
//!     gunfish::server::serve(config, supervisor).await?;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod apns;
pub mod config;
pub mod fcmv1;
pub mod hook;
pub mod ltsv;
pub mod mock;
pub mod request;
pub mod response;
pub mod server;
pub mod stats;
pub mod supervisor;
pub mod worker;

pub use admission::AdmissionControl;
pub use config::{Config, ConfigError, Environment};
pub use request::{Notification, PostedData, Request};
pub use response::ProviderResponse;
pub use stats::Stats;
pub use supervisor::{EnqueueError, Supervisor, SupervisorBuilder};

/// Crate version reported by `--version` and `/stats/app`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
