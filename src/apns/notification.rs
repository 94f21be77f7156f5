//! APNs notification shapes: headers, the `aps` dictionary, and payloads.

use serde::{Deserialize, Serialize};

/// A single notification bound for one device token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub header: Header,
    pub token: String,
    pub payload: Payload,
}

/// Request headers copied onto the provider call when non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "apns-id", default, skip_serializing_if = "Option::is_none")]
    pub apns_id: Option<String>,
    #[serde(rename = "apns-expiration", default, skip_serializing_if = "Option::is_none")]
    pub apns_expiration: Option<String>,
    #[serde(rename = "apns-priority", default, skip_serializing_if = "Option::is_none")]
    pub apns_priority: Option<String>,
    #[serde(rename = "apns-topic", default, skip_serializing_if = "Option::is_none")]
    pub apns_topic: Option<String>,
    #[serde(rename = "apns-push-type", default, skip_serializing_if = "Option::is_none")]
    pub apns_push_type: Option<String>,
}

impl Header {
    /// (name, value) pairs for the headers that are actually set.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("apns-id", self.apns_id.as_deref()),
            ("apns-expiration", self.apns_expiration.as_deref()),
            ("apns-priority", self.apns_priority.as_deref()),
            ("apns-topic", self.apns_topic.as_deref()),
            ("apns-push-type", self.apns_push_type.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v)))
    }
}

/// Notification payload: the `aps` dictionary plus free-form top-level keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub aps: Aps,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The `aps` dictionary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(rename = "content-available", default, skip_serializing_if = "Option::is_none")]
    pub content_available: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// `alert` is either a bare string or a structured dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    Body(String),
    Rich(AlertBody),
}

/// Structured alert dictionary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(rename = "title-loc-key", default, skip_serializing_if = "Option::is_none")]
    pub title_loc_key: Option<String>,
    #[serde(rename = "title-loc-args", default, skip_serializing_if = "Vec::is_empty")]
    pub title_loc_args: Vec<String>,
    #[serde(rename = "action-loc-key", default, skip_serializing_if = "Option::is_none")]
    pub action_loc_key: Option<String>,
    #[serde(rename = "loc-key", default, skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,
    #[serde(rename = "loc-args", default, skip_serializing_if = "Vec::is_empty")]
    pub loc_args: Vec<String>,
    #[serde(rename = "launch-image", default, skip_serializing_if = "Option::is_none")]
    pub launch_image: Option<String>,
}
