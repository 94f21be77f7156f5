//! APNs adapter: HTTP/2 delivery to Apple Push Notification service.
//!
//! The client authenticates either with an mTLS certificate pair or with an
//! ES256 provider token ([`jwt`]), builds `POST {host}/3/device/{token}`
//! requests, and maps responses onto [`ApnsResult`] values carrying Apple's
//! reason taxonomy ([`Reason`]).

pub mod client;
pub mod jwt;
pub mod notification;
pub mod reason;
pub mod response;

pub use client::{ApnsError, Client};
pub use notification::{Alert, AlertBody, Aps, Header, Notification, Payload};
pub use reason::Reason;
pub use response::{ApnsResult, ErrorResponse};

/// Provider tag used in serialized results and hook events.
pub const PROVIDER: &str = "apns";
