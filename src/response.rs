//! Provider-agnostic per-recipient outcome.
//!
//! Each sender call produces exactly one result per recipient. The variants
//! keep provider-specific data in the adapter types; this enum is what flows
//! through the worker's classification, the response handlers, and the error
//! hook. The JSON encoding carries a top-level `"provider"` tag.

use serde::{Deserialize, Serialize};

use crate::apns::{self, ApnsResult};
use crate::fcmv1::{self, FcmV1Result};

/// Outcome of one provider call for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum ProviderResponse {
    #[serde(rename = "apns")]
    Apns(ApnsResult),
    #[serde(rename = "fcmv1")]
    FcmV1(FcmV1Result),
}

impl ProviderResponse {
    /// The provider-reported error, if the delivery was rejected.
    pub fn error(&self) -> Option<&str> {
        match self {
            ProviderResponse::Apns(r) => r.error(),
            ProviderResponse::FcmV1(r) => r.error(),
        }
    }

    /// HTTP status of the provider response.
    pub fn status(&self) -> u16 {
        match self {
            ProviderResponse::Apns(r) => r.status_code,
            ProviderResponse::FcmV1(r) => r.status_code,
        }
    }

    /// Provider tag (`"apns"` or `"fcmv1"`).
    pub fn provider(&self) -> &'static str {
        match self {
            ProviderResponse::Apns(_) => apns::PROVIDER,
            ProviderResponse::FcmV1(_) => fcmv1::PROVIDER,
        }
    }

    /// The device token (or topic) the result belongs to.
    pub fn recipient_identifier(&self) -> &str {
        match self {
            ProviderResponse::Apns(r) => &r.token,
            ProviderResponse::FcmV1(r) => &r.token,
        }
    }

    /// Provider-specific keys worth attaching to structured logs.
    pub fn extra_keys(&self) -> &'static [&'static str] {
        match self {
            ProviderResponse::Apns(_) => &["apns-id", "reason"],
            ProviderResponse::FcmV1(_) => &["message"],
        }
    }

    /// Look up one of [`extra_keys`](Self::extra_keys).
    pub fn extra_value(&self, key: &str) -> Option<&str> {
        match (self, key) {
            (ProviderResponse::Apns(r), "apns-id") => Some(r.apns_id.as_str()),
            (ProviderResponse::Apns(r), "reason") => Some(r.reason.as_str()),
            (ProviderResponse::FcmV1(r), "message") => r.message(),
            _ => None,
        }
    }

    /// JSON encoding with the `provider` tag, as emitted to the error hook.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
