//! Reason taxonomy returned by APNs error responses.

use std::fmt;

/// Error reasons APNs reports in a non-200 response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    PayloadEmpty,
    PayloadTooLarge,
    BadTopic,
    TopicDisallowed,
    BadMessageId,
    BadExpirationDate,
    BadPriority,
    MissingDeviceToken,
    BadDeviceToken,
    DeviceTokenNotForTopic,
    Unregistered,
    DuplicateHeaders,
    BadCertificateEnvironment,
    BadCertificate,
    Forbidden,
    BadPath,
    MethodNotAllowed,
    TooManyRequests,
    IdleTimeout,
    Shutdown,
    InternalServerError,
    ServiceUnavailable,
    MissingTopic,
    BadCollapseId,
    ExpiredProviderToken,
    InvalidProviderToken,
    MissingProviderToken,
    TooManyProviderTokenUpdates,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::PayloadEmpty => "PayloadEmpty",
            Reason::PayloadTooLarge => "PayloadTooLarge",
            Reason::BadTopic => "BadTopic",
            Reason::TopicDisallowed => "TopicDisallowed",
            Reason::BadMessageId => "BadMessageId",
            Reason::BadExpirationDate => "BadExpirationDate",
            Reason::BadPriority => "BadPriority",
            Reason::MissingDeviceToken => "MissingDeviceToken",
            Reason::BadDeviceToken => "BadDeviceToken",
            Reason::DeviceTokenNotForTopic => "DeviceTokenNotForTopic",
            Reason::Unregistered => "Unregistered",
            Reason::DuplicateHeaders => "DuplicateHeaders",
            Reason::BadCertificateEnvironment => "BadCertificateEnvironment",
            Reason::BadCertificate => "BadCertificate",
            Reason::Forbidden => "Forbidden",
            Reason::BadPath => "BadPath",
            Reason::MethodNotAllowed => "MethodNotAllowed",
            Reason::TooManyRequests => "TooManyRequests",
            Reason::IdleTimeout => "IdleTimeout",
            Reason::Shutdown => "Shutdown",
            Reason::InternalServerError => "InternalServerError",
            Reason::ServiceUnavailable => "ServiceUnavailable",
            Reason::MissingTopic => "MissingTopic",
            Reason::BadCollapseId => "BadCollapseId",
            Reason::ExpiredProviderToken => "ExpiredProviderToken",
            Reason::InvalidProviderToken => "InvalidProviderToken",
            Reason::MissingProviderToken => "MissingProviderToken",
            Reason::TooManyProviderTokenUpdates => "TooManyProviderTokenUpdates",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings_match_apple_taxonomy() {
        assert_eq!(Reason::BadDeviceToken.as_str(), "BadDeviceToken");
        assert_eq!(Reason::ExpiredProviderToken.to_string(), "ExpiredProviderToken");
        assert_eq!(Reason::MissingTopic.as_str(), "MissingTopic");
    }
}
