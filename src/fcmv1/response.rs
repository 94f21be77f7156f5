//! FCM v1 response bodies and per-recipient outcomes.

use serde::{Deserialize, Serialize};

/// Error statuses the worker classifies on.
pub mod error_status {
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    pub const UNREGISTERED: &str = "UNREGISTERED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const INTERNAL: &str = "INTERNAL";
    pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
}

/// Body of an FCM v1 response: `name` on success, `error` otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FcmError>,
}

/// Error object reported by FCM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcmError {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Detail>,
}

/// One entry of the error `details` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    #[serde(rename = "@type")]
    pub type_url: String,
    #[serde(rename = "errorCode", default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
}

/// Outcome of one provider call.
///
/// Serialized (via [`crate::response::ProviderResponse`]) with a `provider`
/// tag prepended:
/// `{"provider":"fcmv1","status":200,"token":"...","error":{...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FcmV1Result {
    #[serde(rename = "status")]
    pub status_code: u16,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FcmError>,
}

impl FcmV1Result {
    /// The error status when FCM rejected the message.
    pub fn error(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.status.as_str())
    }

    /// The human-readable error message, if any.
    pub fn message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_argument_body() -> ResponseBody {
        ResponseBody {
            name: String::new(),
            error: Some(FcmError {
                status: error_status::INVALID_ARGUMENT.to_string(),
                message: "The registration token is not a valid FCM registration token"
                    .to_string(),
                details: vec![
                    Detail {
                        type_url: "type.googleapis.com/google.firebase.fcm.v1.FcmError"
                            .to_string(),
                        error_code: error_status::INVALID_ARGUMENT.to_string(),
                    },
                    Detail {
                        type_url: "type.googleapis.com/google.rpc.BadRequest".to_string(),
                        error_code: String::new(),
                    },
                ],
            }),
        }
    }

    #[test]
    fn response_body_parses_error_details() {
        let raw = r#"{
          "error": {
            "code": 400,
            "message": "The registration token is not a valid FCM registration token",
            "status": "INVALID_ARGUMENT",
            "details": [
              {
                "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                "errorCode": "INVALID_ARGUMENT"
              },
              {
                "@type": "type.googleapis.com/google.rpc.BadRequest",
                "fieldViolations": [
                  {"field": "message.token", "description": "bad token"}
                ]
              }
            ]
          }
        }"#;
        let body: ResponseBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.error, invalid_argument_body().error);
    }

    #[test]
    fn response_body_serializes_compactly() {
        let encoded = serde_json::to_string(&invalid_argument_body()).unwrap();
        assert_eq!(
            encoded,
            r#"{"error":{"status":"INVALID_ARGUMENT","message":"The registration token is not a valid FCM registration token","details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"INVALID_ARGUMENT"},{"@type":"type.googleapis.com/google.rpc.BadRequest"}]}}"#
        );
    }

    #[test]
    fn success_body_parses_name() {
        let body: ResponseBody =
            serde_json::from_str(r#"{"name":"projects/test/messages/0:12345"}"#).unwrap();
        assert_eq!(body.name, "projects/test/messages/0:12345");
        assert!(body.error.is_none());
    }

    #[test]
    fn result_error_reports_status_string() {
        let result = FcmV1Result {
            status_code: 404,
            token: "t".to_string(),
            error: Some(FcmError {
                status: error_status::UNREGISTERED.to_string(),
                message: "gone".to_string(),
                details: Vec::new(),
            }),
        };
        assert_eq!(result.error(), Some("UNREGISTERED"));
        assert_eq!(result.message(), Some("gone"));
    }
}
