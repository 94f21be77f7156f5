//! Per-recipient APNs delivery outcome.

use serde::{Deserialize, Serialize};

/// Outcome of one provider call for one device token.
///
/// Serialized (via [`crate::response::ProviderResponse`]) with a `provider`
/// tag prepended:
/// `{"provider":"apns","apns-id":"...","status":200,"token":"...","reason":""}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApnsResult {
    #[serde(rename = "apns-id")]
    pub apns_id: String,
    #[serde(rename = "status")]
    pub status_code: u16,
    pub token: String,
    #[serde(default)]
    pub reason: String,
}

impl ApnsResult {
    /// The reason string when the provider rejected the notification.
    pub fn error(&self) -> Option<&str> {
        if self.status_code == 200 && self.reason.is_empty() {
            None
        } else {
            Some(self.reason.as_str())
        }
    }
}

/// Error body of a non-200 APNs response.
///
/// `timestamp` is present only on 410 responses: the instant after which the
/// device token stopped being valid for the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}
