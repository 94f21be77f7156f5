//! HTTP/2 client for APNs with mTLS or provider-token authentication.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use p256::ecdsa::SigningKey;

use crate::config::{unix_now, SectionApns};

use super::jwt;
use super::notification::Notification;
use super::response::{ApnsResult, ErrorResponse};

/// Per-request timeout on the provider client.
pub const HTTP2_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Provider tokens older than one hour are rejected with
/// `InvalidProviderToken`; reissue one minute ahead of that.
const TOKEN_LIFETIME_SECS: i64 = 3600 - 60;

/// Errors from constructing the client or performing a provider call.
#[derive(Debug, thiserror::Error)]
pub enum ApnsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid signing key: {0}")]
    SigningKey(String),
    #[error("invalid client certificate: {0}")]
    Certificate(String),
    #[error("apns section is missing a key_file")]
    MissingKeyFile,
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

struct AuthToken {
    jwt: String,
    issued_at: i64,
}

/// Provider-token state: the signing key plus the currently issued JWT.
struct ProviderToken {
    kid: String,
    team_id: String,
    key: SigningKey,
    current: Mutex<AuthToken>,
}

impl ProviderToken {
    fn new(kid: String, team_id: String, key: SigningKey, now: i64) -> Result<Self, ApnsError> {
        let issued_at = jwt::quantized_issued_at(now);
        let token = jwt::create_jwt(&key, &kid, &team_id, issued_at)?;
        Ok(ProviderToken {
            kid,
            team_id,
            key,
            current: Mutex::new(AuthToken { jwt: token, issued_at }),
        })
    }

    /// Current bearer value, reissuing when the token nears Apple's one-hour
    /// rejection horizon.
    fn bearer(&self, now: i64) -> Result<String, ApnsError> {
        let mut current = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.issued_at + TOKEN_LIFETIME_SECS < now {
            let issued_at = jwt::quantized_issued_at(now);
            current.jwt = jwt::create_jwt(&self.key, &self.kid, &self.team_id, issued_at)?;
            current.issued_at = issued_at;
        }
        Ok(current.jwt.clone())
    }
}

/// APNs client. One instance per worker; its senders share the underlying
/// HTTP/2 connection pool.
pub struct Client {
    host: String,
    http: reqwest::Client,
    provider_token: Option<ProviderToken>,
}

impl Client {
    /// Build a client from the `[apns]` section. Provider-token mode wins
    /// when both `kid` and `team_id` are present; otherwise the certificate
    /// pair is loaded as an mTLS identity.
    pub fn new(conf: &SectionApns, host: String) -> Result<Client, ApnsError> {
        let mut builder = reqwest::Client::builder()
            .timeout(HTTP2_CLIENT_TIMEOUT)
            .use_rustls_tls();

        let provider_token = if conf.uses_provider_token() {
            let key_file = conf.key_file.clone().ok_or(ApnsError::MissingKeyFile)?;
            let pem = std::fs::read_to_string(&key_file)
                .map_err(|source| ApnsError::Io { path: key_file, source })?;
            let key = jwt::load_signing_key(&pem)?;
            let kid = conf.kid.clone().unwrap_or_default();
            let team_id = conf.team_id.clone().unwrap_or_default();
            Some(ProviderToken::new(kid, team_id, key, unix_now())?)
        } else {
            let (Some(cert_file), Some(key_file)) = (conf.cert_file.clone(), conf.key_file.clone())
            else {
                return Err(ApnsError::MissingKeyFile);
            };
            let mut pem = std::fs::read(&cert_file)
                .map_err(|source| ApnsError::Io { path: cert_file, source })?;
            let key_pem = std::fs::read(&key_file)
                .map_err(|source| ApnsError::Io { path: key_file, source })?;
            pem.extend_from_slice(&key_pem);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ApnsError::Certificate(e.to_string()))?;
            builder = builder.identity(identity);
            None
        };

        Ok(Client {
            host,
            http: builder.build()?,
            provider_token,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Deliver one notification and map the response.
    ///
    /// A transport-level failure is an `Err`; a provider rejection is an
    /// `Ok` result whose `reason` carries Apple's error taxonomy.
    pub async fn send(&self, notification: &Notification) -> Result<ApnsResult, ApnsError> {
        let url = format!("{}/3/device/{}", self.host, notification.token);
        let mut request = self.http.post(&url).json(&notification.payload);
        for (name, value) in notification.header.entries() {
            request = request.header(name, value);
        }
        if let Some(token) = &self.provider_token {
            request = request.header("authorization", format!("bearer {}", token.bearer(unix_now())?));
        }

        let response = request.send().await?;
        let status_code = response.status().as_u16();
        let apns_id = response
            .headers()
            .get("apns-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut result = ApnsResult {
            apns_id,
            status_code,
            token: notification.token.clone(),
            reason: String::new(),
        };

        if status_code != 200 {
            let body = response.bytes().await?;
            match serde_json::from_slice::<ErrorResponse>(&body) {
                Ok(er) => {
                    if status_code == 410 {
                        // The token became invalid at `timestamp`; stop
                        // pushing until a later token is registered.
                        tracing::debug!(
                            r#type = "apns",
                            token = %result.token,
                            timestamp = er.timestamp.unwrap_or_default(),
                            "device token gone"
                        );
                    }
                    result.reason = er.reason;
                }
                Err(e) => result.reason = e.to_string(),
            }
        }

        Ok(result)
    }
}
