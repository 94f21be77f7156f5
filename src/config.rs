//! TOML configuration for the provider server.
//!
//! Loads and validates the `[provider]`, `[apns]`, and `[fcm_v1]` sections,
//! applies defaults, and checks certificate validity at startup so a broken
//! credential fails the process before any traffic is accepted.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

/// Worker-count bounds.
pub const MAX_WORKER_NUM: usize = 119;
pub const MIN_WORKER_NUM: usize = 1;
/// Ingest queue bounds.
pub const MAX_QUEUE_SIZE: usize = 40960;
pub const MIN_QUEUE_SIZE: usize = 128;
/// Per-batch request-count bounds (also sizes the retry queue per worker).
pub const MAX_REQUEST_SIZE: usize = 5000;
pub const MIN_REQUEST_SIZE: usize = 1;
/// APNs device tokens longer than this are rejected by the provider.
pub const LIMIT_APNS_TOKEN_BYTE_SIZE: usize = 100;

/// Defaults applied when the file omits a key.
pub const DEFAULT_WORKER_NUM: usize = 8;
pub const DEFAULT_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_REQUEST_QUEUE_SIZE: usize = 2000;
pub const DEFAULT_PORT: u16 = 38103;
pub const DEFAULT_MAX_CONNECTIONS: usize = 2000;

/// APNs endpoints selected by [`Environment`].
pub const PROD_SERVER: &str = "https://api.push.apple.com";
pub const DEV_SERVER: &str = "https://api.development.push.apple.com";
/// Default mock endpoint for test deployments without an explicit host.
pub const MOCK_SERVER: &str = "https://localhost:2195";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{name} was out of available range: {got}. ({min}-{max})")]
    OutOfRange { name: &'static str, got: usize, min: usize, max: usize },
    #[error("invalid certificate for APNs: {0}")]
    Certificate(String),
    #[error("certificate is expired or not yet valid (not_before: {not_before}, not_after: {not_after})")]
    CertificateExpired { not_before: i64, not_after: i64 },
    #[error("error_hook_to must be stdout, stderr, or discard (got {0:?})")]
    InvalidHookTarget(String),
}

/// Deployment environment; selects the default APNs host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    Development,
    /// Mock/test deployments configure the host explicitly.
    Test,
}

impl Environment {
    pub fn apns_host(&self) -> Option<&'static str> {
        match self {
            Environment::Production => Some(PROD_SERVER),
            Environment::Development => Some(DEV_SERVER),
            Environment::Test => None,
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Environment::Production),
            "development" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub provider: SectionProvider,
    pub apns: Option<SectionApns>,
    pub fcm_v1: Option<SectionFcmV1>,
}

/// The `[provider]` section: pipeline sizing and the error hook.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionProvider {
    #[serde(default = "default_worker_num")]
    pub worker_num: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Upper bound of a posted batch; also the per-worker retry queue unit.
    #[serde(rename = "max_request_size", default = "default_request_queue_size")]
    pub request_queue_size: usize,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Shell command executed as `sh -c <hook>` for each error event.
    #[serde(default)]
    pub error_hook: Option<String>,
    /// Stream target (`stdout`|`stderr`|`discard`); exclusive with `error_hook`.
    #[serde(default)]
    pub error_hook_to: Option<String>,
    /// Keep one hook subprocess alive and feed it newline-delimited events.
    #[serde(default)]
    pub error_hook_command_persistent: bool,
}

impl Default for SectionProvider {
    fn default() -> Self {
        SectionProvider {
            worker_num: DEFAULT_WORKER_NUM,
            queue_size: DEFAULT_QUEUE_SIZE,
            request_queue_size: DEFAULT_REQUEST_QUEUE_SIZE,
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            error_hook: None,
            error_hook_to: None,
            error_hook_command_persistent: false,
        }
    }
}

fn default_worker_num() -> usize {
    DEFAULT_WORKER_NUM
}
fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}
fn default_request_queue_size() -> usize {
    DEFAULT_REQUEST_QUEUE_SIZE
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

/// The `[apns]` section.
///
/// Two exclusive authentication modes: an mTLS certificate pair
/// (`cert_file` + `key_file`) or an ES256 provider token (`kid` + `team_id`,
/// with `key_file` pointing at the PKCS#8 `.p8` signing key). Provider-token
/// mode wins when both are configured.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionApns {
    /// Endpoint override; the environment default applies when unset.
    pub host: Option<String>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub kid: Option<String>,
    pub team_id: Option<String>,
    /// Earliest `notAfter` across the configured certificate chain
    /// (unix seconds), captured during validation for the stats endpoint.
    #[serde(skip)]
    pub certificate_not_after: Option<i64>,
}

impl SectionApns {
    pub fn enabled(&self) -> bool {
        self.uses_provider_token() || (self.cert_file.is_some() && self.key_file.is_some())
    }

    pub fn uses_provider_token(&self) -> bool {
        self.kid.is_some() && self.team_id.is_some()
    }
}

/// The `[fcm_v1]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionFcmV1 {
    /// Path to the service-account JSON used for OAuth2 bearer tokens.
    pub google_application_credentials: PathBuf,
    /// Endpoint override for mock deployments.
    pub endpoint: Option<String>,
}

impl Config {
    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Config::from_toml(&raw)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(raw: &str) -> Result<Config, ConfigError> {
        let mut config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the APNs adapter is configured.
    pub fn apns_enabled(&self) -> bool {
        self.apns.as_ref().is_some_and(|a| a.enabled())
    }

    /// Whether the FCM v1 adapter is configured.
    pub fn fcm_v1_enabled(&self) -> bool {
        self.fcm_v1.is_some()
    }

    /// Validate ranges and credentials; called by [`Config::load`].
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.validate_provider()?;
        if self.apns_enabled() {
            self.validate_apns()?;
        }
        if let Some(hook_to) = self.provider.error_hook_to.as_deref() {
            if !matches!(hook_to, "stdout" | "stderr" | "discard") {
                return Err(ConfigError::InvalidHookTarget(hook_to.to_string()));
            }
        }
        Ok(())
    }

    fn validate_provider(&self) -> Result<(), ConfigError> {
        let p = &self.provider;
        if p.request_queue_size < MIN_REQUEST_SIZE || p.request_queue_size > MAX_REQUEST_SIZE {
            return Err(ConfigError::OutOfRange {
                name: "max_request_size",
                got: p.request_queue_size,
                min: MIN_REQUEST_SIZE,
                max: MAX_REQUEST_SIZE,
            });
        }
        if p.queue_size < MIN_QUEUE_SIZE || p.queue_size > MAX_QUEUE_SIZE {
            return Err(ConfigError::OutOfRange {
                name: "queue_size",
                got: p.queue_size,
                min: MIN_QUEUE_SIZE,
                max: MAX_QUEUE_SIZE,
            });
        }
        if p.worker_num < MIN_WORKER_NUM || p.worker_num > MAX_WORKER_NUM {
            return Err(ConfigError::OutOfRange {
                name: "worker_num",
                got: p.worker_num,
                min: MIN_WORKER_NUM,
                max: MAX_WORKER_NUM,
            });
        }
        Ok(())
    }

    fn validate_apns(&mut self) -> Result<(), ConfigError> {
        let apns = match self.apns.as_mut() {
            Some(apns) => apns,
            None => return Ok(()),
        };
        if apns.uses_provider_token() {
            // The .p8 signing key is parsed by the adapter at startup.
            return Ok(());
        }
        let Some(cert_file) = apns.cert_file.clone() else { return Ok(()) };
        let pem = std::fs::read(&cert_file)
            .map_err(|source| ConfigError::Io { path: cert_file, source })?;
        apns.certificate_not_after = Some(validate_certificate_chain(&pem, unix_now())?);
        Ok(())
    }
}

/// Parse a PEM certificate chain, require `now` to fall inside every
/// certificate's validity window, and return the earliest `notAfter`.
pub fn validate_certificate_chain(pem: &[u8], now: i64) -> Result<i64, ConfigError> {
    let mut not_after: Option<i64> = None;
    for pem_entry in x509_parser::pem::Pem::iter_from_buffer(pem) {
        let pem_entry = pem_entry.map_err(|e| ConfigError::Certificate(e.to_string()))?;
        if pem_entry.label != "CERTIFICATE" {
            continue;
        }
        let cert = pem_entry.parse_x509().map_err(|e| ConfigError::Certificate(e.to_string()))?;
        let not_before = cert.validity().not_before.timestamp();
        let cert_not_after = cert.validity().not_after.timestamp();
        if now < not_before || now > cert_not_after {
            return Err(ConfigError::CertificateExpired { not_before, not_after: cert_not_after });
        }
        // Hold the earliest expiry; that is the one that bites first.
        not_after = Some(match not_after {
            Some(prev) => prev.min(cert_not_after),
            None => cert_not_after,
        });
    }
    not_after
        .ok_or_else(|| ConfigError::Certificate("no CERTIFICATE block found in PEM".to_string()))
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
