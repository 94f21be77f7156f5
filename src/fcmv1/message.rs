//! FCM v1 message shapes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Request payload: the FCM message wrapper posted to `messages:send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub message: Message,
}

/// An FCM v1 message addressed to a device token or a topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,
}

impl Message {
    /// The recipient identifier: the device token, or the topic for fan-out.
    pub fn recipient(&self) -> &str {
        self.token.as_deref().or(self.topic.as_deref()).unwrap_or_default()
    }
}

/// Display notification fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}
