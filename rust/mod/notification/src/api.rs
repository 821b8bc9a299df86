use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};

use access::{AccessControl, MethodPermissionRule, PermissionEntry, PermissionTable};
use vidyarth_core::{ListResult, ServiceError};

use crate::dispatcher::Dispatcher;
use crate::model::{Dispatch, DispatchListQuery, NotificationProperty, PropertyUpdate};

/// Capability that administers email notifications.
pub const MANAGE_ANNOUNCEMENTS: &str = "MANAGE_ANNOUNCEMENTS";

type DispatcherState = Arc<Dispatcher>;

/// Build the notification settings router.
///
/// Routes:
/// - `GET /api/email/props`: list per-type settings
/// - `PUT /api/email/props`: update settings
/// - `GET /api/email/dispatches`: list dispatches
/// - `GET /api/email/dispatches/{id}`: get one dispatch
pub fn router(dispatcher: Arc<Dispatcher>, access: Arc<AccessControl>) -> Router {
    Router::new()
        .route("/api/email/props", get(list_props).put(update_props))
        .route("/api/email/dispatches", get(list_dispatches))
        .route("/api/email/dispatches/{id}", get(get_dispatch))
        .route_layer(axum::middleware::from_fn_with_state(access, access::guard))
        .with_state(dispatcher)
}

/// Built-in rules for the routes above. A configured table may override them.
pub fn default_permissions() -> PermissionTable {
    let admin = || MethodPermissionRule::new(vec![PermissionEntry::new(MANAGE_ANNOUNCEMENTS, 1)]);
    PermissionTable::new()
        .with_rule("/api/email/props", "GET", admin())
        .with_rule("/api/email/props", "PUT", admin())
        .with_rule("/api/email/dispatches", "GET", admin())
        .with_rule("/api/email/dispatches/{id}", "GET", admin())
}

// ---------------------------------------------------------------------------
// GET /api/email/props
// ---------------------------------------------------------------------------

async fn list_props(
    State(dispatcher): State<DispatcherState>,
) -> Result<Json<Vec<NotificationProperty>>, ServiceError> {
    Ok(Json(dispatcher.properties()?))
}

// ---------------------------------------------------------------------------
// PUT /api/email/props
// ---------------------------------------------------------------------------

async fn update_props(
    State(dispatcher): State<DispatcherState>,
    Json(updates): Json<Vec<PropertyUpdate>>,
) -> Result<Json<Vec<NotificationProperty>>, ServiceError> {
    Ok(Json(dispatcher.update_properties(updates)?))
}

// ---------------------------------------------------------------------------
// GET /api/email/dispatches
// ---------------------------------------------------------------------------

async fn list_dispatches(
    State(dispatcher): State<DispatcherState>,
    Query(query): Query<DispatchListQuery>,
) -> Result<Json<ListResult<Dispatch>>, ServiceError> {
    Ok(Json(dispatcher.list_dispatches(&query)?))
}

async fn get_dispatch(
    State(dispatcher): State<DispatcherState>,
    Path(id): Path<String>,
) -> Result<Json<Dispatch>, ServiceError> {
    Ok(Json(dispatcher.get_dispatch(&id)?))
}
