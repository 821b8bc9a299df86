use std::sync::Arc;

use axum::extract::{FromRequestParts, MatchedPath, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use vidyarth_core::{Caller, ServiceError};

use crate::error::AccessError;
use crate::rule::AccessGrant;
use crate::table::AccessControl;

/// Optional request header naming the capability the caller acts under.
pub const ACCESS_PERMISSION_HEADER: &str = "x-access-permission";

/// Route-level guard. Install with `Router::route_layer` so the matched
/// path pattern is available.
///
/// Denied requests never reach the handler. Admitted requests carry an
/// [`AccessGrant`] extension with the filter to merge into the query.
pub async fn guard(
    State(access): State<Arc<AccessControl>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let caller = request
        .extensions()
        .get::<Caller>()
        .cloned()
        .ok_or(AccessError::NoCaller)?;

    let requested = request
        .headers()
        .get(ACCESS_PERMISSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let grant = access.check(&route, request.method().as_str(), &caller, requested.as_deref())?;
    request.extensions_mut().insert(grant);

    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for AccessGrant
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // A handler asking for a grant on an unguarded route fails closed.
        parts
            .extensions
            .get::<AccessGrant>()
            .cloned()
            .ok_or_else(|| ServiceError::PermissionDenied("route is not access-guarded".into()))
    }
}
