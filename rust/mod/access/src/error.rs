use thiserror::Error;

use vidyarth_core::ServiceError;

#[derive(Debug, Error)]
pub enum AccessError {
    /// No capability held by the caller admits the request.
    #[error("permission denied: {0}")]
    Denied(String),

    /// The request reached a guarded route without an authenticated caller.
    #[error("no authenticated caller")]
    NoCaller,

    /// Two entries of the same method share a priority.
    #[error("priority tie in {route} {method}: {first} and {second} both have priority {priority}")]
    PriorityTie {
        route: String,
        method: String,
        first: String,
        second: String,
        priority: u32,
    },

    /// A capability is listed twice for the same method.
    #[error("duplicate capability {capability} in {route} {method}")]
    DuplicateCapability {
        route: String,
        method: String,
        capability: String,
    },

    /// A filter is not a flat map of identifier keys to scalar values.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The permission table file could not be read or parsed.
    #[error("permission table: {0}")]
    Load(String),
}

impl From<AccessError> for ServiceError {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::Denied(m) => ServiceError::PermissionDenied(m),
            AccessError::NoCaller => ServiceError::Unauthorized("no authenticated caller".into()),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}
