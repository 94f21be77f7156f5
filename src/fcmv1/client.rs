//! HTTPS client for the FCM v1 `messages:send` endpoint.

use std::sync::Arc;
use std::time::Duration;

use super::message::Payload;
use super::response::{FcmV1Result, ResponseBody};
use super::token::TokenSource;
use super::DEFAULT_ENDPOINT;

/// Per-request timeout on the provider client.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from constructing the client or performing a provider call.
#[derive(Debug, thiserror::Error)]
pub enum FcmV1Error {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("service account JSON has no project_id")]
    MissingProjectId,
    #[error("token source error: {0}")]
    Token(String),
    #[error("unexpected response (status {status}): {message}")]
    UnexpectedResponse { status: u16, message: String },
}

/// FCM v1 client. The token source is shared across workers; the HTTP client
/// is per worker.
pub struct Client {
    endpoint: String,
    http: reqwest::Client,
    token_source: Arc<dyn TokenSource>,
}

impl Client {
    /// Build a client for `{endpoint}/{project_id}/messages:send`.
    pub fn new(
        token_source: Arc<dyn TokenSource>,
        project_id: &str,
        endpoint: Option<&str>,
    ) -> Result<Client, FcmV1Error> {
        let base = endpoint.unwrap_or(DEFAULT_ENDPOINT).trim_end_matches('/');
        Ok(Client {
            endpoint: format!("{base}/{project_id}/messages:send"),
            http: reqwest::Client::builder().timeout(CLIENT_TIMEOUT).build()?,
            token_source,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver one message and map the response.
    ///
    /// A transport-level failure is an `Err`; an FCM error body is an `Ok`
    /// result carrying the error status for classification.
    pub async fn send(&self, payload: &Payload) -> Result<FcmV1Result, FcmV1Error> {
        let token = self.token_source.token().await?;
        let response = self
            .http
            .post(&self.endpoint)
            .header("authorization", format!("Bearer {token}"))
            .json(payload)
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let body: ResponseBody = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                return Err(FcmV1Error::UnexpectedResponse {
                    status: status_code,
                    message: e.to_string(),
                })
            }
        };

        let recipient = payload.message.recipient().to_string();
        if body.error.is_none() && !body.name.is_empty() {
            Ok(FcmV1Result { status_code, token: recipient, error: None })
        } else if body.error.is_some() {
            Ok(FcmV1Result { status_code, token: recipient, error: body.error })
        } else {
            Err(FcmV1Error::UnexpectedResponse {
                status: status_code,
                message: "neither name nor error in response".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcmv1::token::StaticTokenSource;

    #[test]
    fn endpoint_includes_project_and_verb() {
        let client =
            Client::new(Arc::new(StaticTokenSource::new("t")), "my-project", None).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://fcm.googleapis.com/v1/projects/my-project/messages:send"
        );
    }

    #[test]
    fn endpoint_override_is_used() {
        let client = Client::new(
            Arc::new(StaticTokenSource::new("t")),
            "test",
            Some("http://127.0.0.1:8888/v1/projects/"),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:8888/v1/projects/test/messages:send");
    }
}
