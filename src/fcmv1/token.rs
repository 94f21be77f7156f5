//! OAuth2 bearer-token sources for the FCM v1 client.
//!
//! Production uses Google service-account credentials; the authenticator
//! caches access tokens and refreshes them before expiry, and is safe to
//! share across workers.

use std::path::Path;

use async_trait::async_trait;

use super::client::FcmV1Error;
use super::SCOPE;

/// Source of OAuth2 access tokens presented as `Authorization: Bearer ...`.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, FcmV1Error>;
}

/// Token source backed by a Google service-account key.
pub struct ServiceAccountTokenSource {
    auth: yup_oauth2::authenticator::DefaultAuthenticator,
}

impl std::fmt::Debug for ServiceAccountTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokenSource").finish_non_exhaustive()
    }
}

impl ServiceAccountTokenSource {
    /// Load service-account credentials and return the source together with
    /// the project id embedded in the JSON.
    pub async fn from_file(
        path: impl AsRef<Path>,
    ) -> Result<(ServiceAccountTokenSource, String), FcmV1Error> {
        let key = yup_oauth2::read_service_account_key(path.as_ref())
            .await
            .map_err(|e| FcmV1Error::Credentials(e.to_string()))?;
        let project_id = key.project_id.clone().ok_or(FcmV1Error::MissingProjectId)?;
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| FcmV1Error::Credentials(e.to_string()))?;
        Ok((ServiceAccountTokenSource { auth }, project_id))
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> Result<String, FcmV1Error> {
        let token = self
            .auth
            .token(&[SCOPE])
            .await
            .map_err(|e| FcmV1Error::Token(e.to_string()))?;
        token
            .token()
            .map(str::to_owned)
            .ok_or_else(|| FcmV1Error::Token("authenticator returned no access token".to_string()))
    }
}

/// Fixed-token source for tests and mock deployments.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> StaticTokenSource {
        StaticTokenSource { token: token.into() }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, FcmV1Error> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_its_token() {
        let source = StaticTokenSource::new("fixed");
        assert_eq!(source.token().await.unwrap(), "fixed");
    }

    #[tokio::test]
    async fn missing_credentials_file_is_an_error() {
        let err = ServiceAccountTokenSource::from_file("/nonexistent/sa.json").await.unwrap_err();
        assert!(matches!(err, FcmV1Error::Credentials(_)));
    }
}
