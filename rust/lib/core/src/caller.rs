//! Caller identity attached to every authenticated request.
//!
//! The server's authentication layer decodes the bearer token and stores a
//! [`Caller`] in the request extensions. Modules never parse tokens; they
//! only read the caller's id and immutable capability set.

use std::collections::BTreeSet;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::ServiceError;

/// The authenticated principal behind a request.
///
/// `capabilities` is fixed for the lifetime of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// User id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Portal role, e.g. "student", "pc" or "admin".
    #[serde(default)]
    pub role: Option<String>,
    /// Granted capability tags, e.g. "MANAGE_VIDEOS".
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl Caller {
    pub fn new(id: impl Into<String>, capabilities: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            role: None,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Builder-style role assignment.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("no authenticated caller".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn capability_lookup() {
        let caller = Caller::new("u1", &["MANAGE_VIDEOS", "ENABLE_COMPANY_DIRECTORY"]);
        assert!(caller.has("MANAGE_VIDEOS"));
        assert!(!caller.has("MANAGE_ANNOUNCEMENTS"));
    }

    #[tokio::test]
    async fn extractor_requires_extension() {
        let (mut parts, _) = Request::new(()).into_parts();
        let missing = Caller::from_request_parts(&mut parts, &()).await;
        assert!(matches!(missing, Err(ServiceError::Unauthorized(_))));

        parts.extensions.insert(Caller::new("u1", &[]).with_role("student"));
        let caller = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(caller.id, "u1");
        assert_eq!(caller.role.as_deref(), Some("student"));
    }
}
