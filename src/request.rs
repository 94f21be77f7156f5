//! Requests flowing through the dispatch engine.

use serde::{Deserialize, Serialize};

use crate::{apns, fcmv1};

/// A notification bound for one of the configured providers.
#[derive(Debug, Clone)]
pub enum Notification {
    Apns(apns::Notification),
    FcmV1(fcmv1::Payload),
}

impl Notification {
    /// Provider tag for logs and dispatch.
    pub fn provider(&self) -> &'static str {
        match self {
            Notification::Apns(_) => apns::PROVIDER,
            Notification::FcmV1(_) => fcmv1::PROVIDER,
        }
    }
}

/// A notification paired with its attempt counter.
///
/// Requests are value-copied when requeued; `tries` only ever increases.
#[derive(Debug, Clone)]
pub struct Request {
    pub notification: Notification,
    pub tries: usize,
}

impl Request {
    pub fn new(notification: Notification) -> Request {
        Request { notification, tries: 0 }
    }
}

/// One element of the JSON array posted to `/push/apns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedData {
    #[serde(default)]
    pub header: apns::Header,
    pub token: String,
    pub payload: apns::Payload,
}

impl From<PostedData> for Request {
    fn from(posted: PostedData) -> Request {
        Request::new(Notification::Apns(apns::Notification {
            header: posted.header,
            token: posted.token,
            payload: posted.payload,
        }))
    }
}
