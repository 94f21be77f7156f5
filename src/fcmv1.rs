//! FCM v1 adapter: HTTPS delivery to Firebase Cloud Messaging.
//!
//! The client posts `{"message": ...}` bodies to the v1 `messages:send`
//! endpoint with an OAuth2 bearer token obtained from a [`TokenSource`]
//! (service-account credentials in production, a static token in tests) and
//! maps response bodies onto [`FcmV1Result`] values.

pub mod client;
pub mod message;
pub mod response;
pub mod token;

pub use client::{Client, FcmV1Error};
pub use message::{Message, Payload};
pub use response::{error_status, FcmError, FcmV1Result, ResponseBody};
pub use token::{ServiceAccountTokenSource, StaticTokenSource, TokenSource};

/// Provider tag used in serialized results and hook events.
pub const PROVIDER: &str = "fcmv1";

/// Base endpoint; the project id and `messages:send` verb are appended.
pub const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com/v1/projects";

/// OAuth2 scope required for FCM sends.
pub const SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Max payload count accepted in one ingress call.
pub const MAX_BULK_REQUESTS: usize = 500;
