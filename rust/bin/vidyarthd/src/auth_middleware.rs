//! JWT authentication middleware.
//!
//! Extracts the JWT from `Authorization: Bearer <token>`, validates it and
//! stores the resulting [`Caller`] in the request extensions. Capabilities
//! come from the token and are fixed for the request.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vidyarth_core::{Caller, ServiceError};

/// JWT claims issued by the portal's login service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: user id.
    pub sub: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Portal role, e.g. "student" or "pc".
    #[serde(default)]
    pub role: Option<String>,
    /// Granted capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Caller {
            id: claims.sub,
            name: claims.name,
            role: claims.role,
            capabilities: claims.capabilities.into_iter().collect(),
        }
    }
}

/// Shared JWT configuration for the middleware.
#[derive(Clone)]
pub struct JwtState {
    pub decoding_key: DecodingKey,
    pub validation: Validation,
}

impl JwtState {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

/// Middleware that authenticates every non-public request.
pub async fn auth_middleware(
    State(jwt_state): State<Arc<JwtState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    if is_public_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ServiceError::Unauthorized("missing authorization token".into()))?;

    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &jwt_state.decoding_key,
        &jwt_state.validation,
    )
    .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {e}")))?;

    let caller = Caller::from(token_data.claims);
    debug!("authenticated {} with {} capabilities", caller.id, caller.capabilities.len());
    request.extensions_mut().insert(caller);

    Ok(next.run(request).await)
}

/// Endpoints reachable without a token. Link resolution is public because
/// the token in the link is its own credential.
fn is_public_path(path: &str) -> bool {
    matches!(path, "/health" | "/version" | "/link/resolve")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    pub(crate) fn mint(secret: &str, sub: &str, capabilities: &[&str], exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            name: sub.to_string(),
            role: Some("student".to_string()),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            iat: now,
            exp: now + exp_offset,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn claims_become_caller() {
        let caller = Caller::from(Claims {
            sub: "stu-1".into(),
            name: "Asha".into(),
            role: Some("student".into()),
            capabilities: vec!["VIEW_VIDEOS".into(), "VIEW_VIDEOS".into()],
            iat: 0,
            exp: 0,
        });
        assert_eq!(caller.id, "stu-1");
        assert_eq!(caller.role.as_deref(), Some("student"));
        assert_eq!(caller.capabilities.len(), 1);
        assert!(caller.has("VIEW_VIDEOS"));
    }

    #[test]
    fn public_paths() {
        assert!(is_public_path("/health"));
        assert!(is_public_path("/link/resolve"));
        assert!(!is_public_path("/api/videos"));
        assert!(!is_public_path("/link/resolve/extra"));
    }
}
