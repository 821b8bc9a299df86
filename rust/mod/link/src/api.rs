use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use vidyarth_core::ServiceError;

use crate::codec::{SecureLinkCodec, normalize_section_key};

#[derive(Debug, Deserialize)]
struct ResolveQuery {
    #[serde(default)]
    auth: String,
}

/// Dashboard destination decoded from a link.
#[derive(Debug, Serialize)]
struct Destination {
    /// Normalised dashboard section, e.g. `company_videos`.
    section: String,
    /// Key exactly as it was encoded.
    key: String,
    id: i64,
}

pub fn routes(codec: Arc<SecureLinkCodec>) -> Router {
    Router::new()
        .route("/link/resolve", get(resolve))
        .with_state(codec)
}

/// GET /link/resolve?auth=<token>
async fn resolve(
    State(codec): State<Arc<SecureLinkCodec>>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<Destination>, ServiceError> {
    let target = codec.decode(&query.auth).map_err(|e| {
        warn!("rejected dashboard link: {e}");
        ServiceError::from(e)
    })?;

    Ok(Json(Destination {
        section: normalize_section_key(&target.key),
        key: target.key,
        id: target.id,
    }))
}
