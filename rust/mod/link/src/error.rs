use thiserror::Error;

use vidyarth_core::ServiceError;

/// Message shown to the end user for every decode failure.
pub const INVALID_LINK_MESSAGE: &str = "invalid or expired link";

/// Failure to build a link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link secret is empty")]
    EmptySecret,

    #[error("link key is empty")]
    EmptyKey,

    #[error("encryption failed")]
    Encrypt,

    #[error("payload encoding: {0}")]
    Payload(String),
}

/// Failure to decode a token taken from a URL.
///
/// Every variant is reported to the user as [`INVALID_LINK_MESSAGE`];
/// the distinction only matters for logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Not URL-safe base64, or too short to hold a nonce and tag.
    #[error("token is malformed")]
    Malformed,

    /// Authentication tag mismatch: wrong key or modified token.
    #[error("token failed integrity check")]
    Tampered,

    /// Authentic, but carries no destination key.
    #[error("token is empty")]
    Empty,

    /// Older than the configured maximum age.
    #[error("token has expired")]
    Expired,
}

impl From<LinkError> for ServiceError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::EmptyKey => ServiceError::Validation(e.to_string()),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<DecodeError> for ServiceError {
    fn from(_: DecodeError) -> Self {
        ServiceError::InvalidLink(INVALID_LINK_MESSAGE.into())
    }
}
