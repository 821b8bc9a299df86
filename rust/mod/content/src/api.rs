use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use access::{AccessControl, AccessGrant, Filter, MethodPermissionRule, PermissionEntry, PermissionTable};
use notification::{EventLink, NotificationEvent, NotificationHandle, NotificationType};
use vidyarth_core::{Caller, ListParams, ListResult, ServiceError, merge_patch, now_rfc3339};

use crate::model::{
    Company, CreateCompany, CreateVideo, READ_ONLY_FIELDS, Video, VideoListQuery,
};
use crate::store::ContentStore;

/// Dashboard section that lists a company's videos.
pub const VIDEOS_SECTION: &str = "Company Videos";

pub struct ContentState {
    pub store: Arc<ContentStore>,
    pub notifier: NotificationHandle,
}

type AppState = Arc<ContentState>;

/// Build the content router.
///
/// Routes:
/// - `GET    /api/companies`: list companies
/// - `POST   /api/companies`: create company
/// - `GET    /api/companies/{id}`: get company
/// - `PUT    /api/companies/{id}`: update company (merge patch)
/// - `DELETE /api/companies/{id}`: delete company and its videos
/// - `GET    /api/videos`: list videos
/// - `POST   /api/videos`: create video
/// - `GET    /api/videos/{id}`: get video
/// - `PUT    /api/videos/{id}`: update video (merge patch)
/// - `DELETE /api/videos/{id}`: delete video
pub fn router(state: Arc<ContentState>, access: Arc<AccessControl>) -> Router {
    Router::new()
        .route("/api/companies", get(list_companies).post(create_company))
        .route(
            "/api/companies/{id}",
            get(get_company).put(update_company).delete(delete_company),
        )
        .route("/api/videos", get(list_videos).post(create_video))
        .route(
            "/api/videos/{id}",
            get(get_video).put(update_video).delete(delete_video),
        )
        .route_layer(axum::middleware::from_fn_with_state(access, access::guard))
        .with_state(state)
}

/// Built-in rules for the content routes.
pub fn default_permissions() -> PermissionTable {
    let rule = |entries: Vec<PermissionEntry>| MethodPermissionRule::new(entries);
    let manage_companies = || rule(vec![PermissionEntry::new("MANAGE_COMPANIES", 1)]);
    let own = || Filter::new().with("created_by", "$caller.id");

    let view_companies = rule(vec![
        PermissionEntry::new("MANAGE_COMPANIES", 1),
        PermissionEntry::new("ENABLE_COMPANY_DIRECTORY", 2)
            .with_filter(Filter::new().with("visible", true)),
    ]);
    let view_videos = rule(vec![
        PermissionEntry::new("MANAGE_VIDEOS", 1),
        PermissionEntry::new("VIEW_VIDEOS", 2).with_filter(Filter::new().with("is_featured", true)),
        PermissionEntry::new("VIEW_OWN_VIDEOS", 3).with_filter(own()),
    ]);
    let write_videos = || {
        rule(vec![
            PermissionEntry::new("MANAGE_VIDEOS", 1),
            PermissionEntry::new("UPLOAD_VIDEOS", 2).with_filter(own()),
        ])
    };

    PermissionTable::new()
        .with_rule("/api/companies", "GET", view_companies.clone())
        .with_rule("/api/companies", "POST", manage_companies())
        .with_rule("/api/companies/{id}", "GET", view_companies)
        .with_rule("/api/companies/{id}", "PUT", manage_companies())
        .with_rule("/api/companies/{id}", "DELETE", manage_companies())
        .with_rule("/api/videos", "GET", view_videos.clone())
        .with_rule("/api/videos", "POST", write_videos())
        .with_rule("/api/videos/{id}", "GET", view_videos)
        .with_rule("/api/videos/{id}", "PUT", write_videos())
        .with_rule(
            "/api/videos/{id}",
            "DELETE",
            rule(vec![PermissionEntry::new("MANAGE_VIDEOS", 1)]),
        )
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_value<T: Serialize>(record: &T) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(record).map_err(|e| ServiceError::Internal(e.to_string()))
}

/// Records outside the caller's filter are reported as missing.
fn visible<T: Serialize>(grant: &AccessGrant, record: T, what: String) -> Result<T, ServiceError> {
    if grant.filter.matches(&to_value(&record)?) {
        Ok(record)
    } else {
        Err(ServiceError::NotFound(what))
    }
}

/// A record the caller writes must satisfy the filter it was granted.
fn check_writable<T: Serialize>(grant: &AccessGrant, record: &T) -> Result<(), ServiceError> {
    if grant.filter.matches(&to_value(record)?) {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied(format!(
            "record is outside the scope of {}",
            grant.capability
        )))
    }
}

/// Apply a JSON merge patch, keeping server-owned fields.
fn patched<T: Serialize + DeserializeOwned>(
    current: &T,
    mut patch: serde_json::Value,
) -> Result<T, ServiceError> {
    let Some(obj) = patch.as_object_mut() else {
        return Err(ServiceError::Validation("update body must be a JSON object".into()));
    };
    for field in READ_ONLY_FIELDS {
        obj.remove(field);
    }
    let mut value = to_value(current)?;
    merge_patch(&mut value, &patch);
    serde_json::from_value(value).map_err(|e| ServiceError::Validation(e.to_string()))
}

fn require(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// The company a video points at. A missing company is the client's
/// mistake; any other failure is passed through unchanged.
fn owning_company(state: &ContentState, company_id: i64) -> Result<Company, ServiceError> {
    match state.store.get_company(company_id) {
        Err(ServiceError::NotFound(_)) => Err(ServiceError::Validation(format!(
            "company {company_id} does not exist"
        ))),
        other => other,
    }
}

fn today() -> String {
    Utc::now().format("%d %b %Y").to_string()
}

// ---------------------------------------------------------------------------
// Companies
// ---------------------------------------------------------------------------

async fn list_companies(
    State(state): State<AppState>,
    grant: AccessGrant,
    Query(page): Query<ListParams>,
) -> Result<Json<ListResult<Company>>, ServiceError> {
    let result = state.store.list_companies(
        &grant.filter,
        page.page_size(),
        page.offset,
    )?;
    Ok(Json(result))
}

async fn create_company(
    State(state): State<AppState>,
    caller: Caller,
    grant: AccessGrant,
    Json(req): Json<CreateCompany>,
) -> Result<(StatusCode, Json<Company>), ServiceError> {
    require("name", &req.name)?;
    require("full_name", &req.full_name)?;

    let now = now_rfc3339();
    let company = Company {
        id: 0,
        name: req.name.trim().to_string(),
        full_name: req.full_name.trim().to_string(),
        visible: req.visible,
        created_at: now.clone(),
        updated_at: now,
    };
    check_writable(&grant, &company)?;
    let company = state.store.create_company(&company)?;
    info!("company {} ({}) created by {}", company.id, company.name, caller.id);

    state.notifier.publish(
        NotificationEvent::new(NotificationType::Company, "added")
            .with_target(company.id)
            .with_link(EventLink::new(company.full_name.clone(), "Companies", company.id))
            .with_var("company_full", company.full_name.clone())
            .with_var("updated_at", today()),
    );

    Ok((StatusCode::CREATED, Json(company)))
}

async fn get_company(
    State(state): State<AppState>,
    grant: AccessGrant,
    Path(id): Path<i64>,
) -> Result<Json<Company>, ServiceError> {
    let company = state.store.get_company(id)?;
    Ok(Json(visible(&grant, company, format!("company {id}"))?))
}

async fn update_company(
    State(state): State<AppState>,
    grant: AccessGrant,
    Path(id): Path<i64>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<Company>, ServiceError> {
    let current = visible(&grant, state.store.get_company(id)?, format!("company {id}"))?;
    let mut company: Company = patched(&current, patch)?;
    require("name", &company.name)?;
    require("full_name", &company.full_name)?;
    company.id = current.id;
    company.created_at = current.created_at;
    company.updated_at = now_rfc3339();
    check_writable(&grant, &company)?;

    state.store.update_company(&company)?;
    Ok(Json(company))
}

async fn delete_company(
    State(state): State<AppState>,
    grant: AccessGrant,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServiceError> {
    visible(&grant, state.store.get_company(id)?, format!("company {id}"))?;
    state.store.delete_company(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Videos
// ---------------------------------------------------------------------------

async fn list_videos(
    State(state): State<AppState>,
    grant: AccessGrant,
    Query(query): Query<VideoListQuery>,
) -> Result<Json<ListResult<Video>>, ServiceError> {
    let page = ListParams {
        limit: query.limit.unwrap_or(ListParams::default().limit),
        offset: query.offset.unwrap_or(0),
    };
    let result = state.store.list_videos(
        &grant.filter,
        query.company_id,
        page.page_size(),
        page.offset,
    )?;
    Ok(Json(result))
}

async fn create_video(
    State(state): State<AppState>,
    caller: Caller,
    grant: AccessGrant,
    Json(req): Json<CreateVideo>,
) -> Result<(StatusCode, Json<Video>), ServiceError> {
    require("title", &req.title)?;
    require("url", &req.url)?;
    let company = owning_company(&state, req.company_id)?;

    let now = now_rfc3339();
    let video = Video {
        id: 0,
        company_id: req.company_id,
        title: req.title.trim().to_string(),
        url: req.url.trim().to_string(),
        is_featured: req.is_featured,
        created_by: caller.id.clone(),
        created_at: now.clone(),
        updated_at: now,
    };
    check_writable(&grant, &video)?;
    let video = state.store.create_video(&video)?;

    if video.is_featured {
        announce_featured(&state, &company, &video);
    }
    Ok((StatusCode::CREATED, Json(video)))
}

async fn get_video(
    State(state): State<AppState>,
    grant: AccessGrant,
    Path(id): Path<i64>,
) -> Result<Json<Video>, ServiceError> {
    let video = state.store.get_video(id)?;
    Ok(Json(visible(&grant, video, format!("video {id}"))?))
}

async fn update_video(
    State(state): State<AppState>,
    grant: AccessGrant,
    Path(id): Path<i64>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<Video>, ServiceError> {
    let current = visible(&grant, state.store.get_video(id)?, format!("video {id}"))?;
    let mut video: Video = patched(&current, patch)?;
    require("title", &video.title)?;
    require("url", &video.url)?;
    video.id = current.id;
    video.created_by = current.created_by.clone();
    video.created_at = current.created_at.clone();
    video.updated_at = now_rfc3339();

    let company = owning_company(&state, video.company_id)?;
    check_writable(&grant, &video)?;
    state.store.update_video(&video)?;

    if !current.is_featured && video.is_featured {
        announce_featured(&state, &company, &video);
    }
    Ok(Json(video))
}

async fn delete_video(
    State(state): State<AppState>,
    grant: AccessGrant,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServiceError> {
    visible(&grant, state.store.get_video(id)?, format!("video {id}"))?;
    state.store.delete_video(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Publish a CONTENT event for a newly featured video. Never fails the write.
fn announce_featured(state: &ContentState, company: &Company, video: &Video) {
    if company.full_name.trim().is_empty() {
        warn!("company {} has no display name, skipping notification", company.id);
        return;
    }
    state.notifier.publish(
        NotificationEvent::new(NotificationType::Content, "updated")
            .with_target(company.id)
            .with_link(EventLink::new(VIDEOS_SECTION, VIDEOS_SECTION, company.id))
            .with_var("company_full", company.full_name.clone())
            .with_var("updated_at", today()),
    );
    info!("video {} featured for company {}", video.id, company.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::Request as HttpRequest;
    use axum::middleware::Next;
    use axum::response::Response;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use vidyarth_sql::{SQLStore, SqliteStore};

    /// Test callers: `x-test-user` is the id, `x-test-caps` a comma list.
    async fn inject_caller(mut request: Request, next: Next) -> Response {
        {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            if let Some(user) = header("x-test-user") {
                let caps = header("x-test-caps").unwrap_or_default();
                let caps: Vec<&str> = caps.split(',').filter(|c| !c.is_empty()).collect();
                let caller = Caller::new(user, &caps);
                request.extensions_mut().insert(caller);
            }
        }
        next.run(request).await
    }

    struct TestApp {
        router: Router,
        events: mpsc::Receiver<NotificationEvent>,
        db: Arc<SqliteStore>,
    }

    fn app() -> TestApp {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (notifier, events) = NotificationHandle::channel(16);
        let state = Arc::new(ContentState {
            store: Arc::new(ContentStore::new(db.clone()).unwrap()),
            notifier,
        });
        let access = Arc::new(AccessControl::new(default_permissions()).unwrap());
        TestApp {
            router: router(state, access).layer(axum::middleware::from_fn(inject_caller)),
            events,
            db,
        }
    }

    const PC: (&str, &str) = ("pc-1", "MANAGE_COMPANIES,MANAGE_VIDEOS");
    const STUDENT: (&str, &str) = ("stu-1", "ENABLE_COMPANY_DIRECTORY,VIEW_VIDEOS,UPLOAD_VIDEOS");

    async fn call(
        app: &TestApp,
        who: (&str, &str),
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header("x-test-user", who.0)
            .header("x-test-caps", who.1);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app
            .router
            .clone()
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    async fn seed_company(app: &TestApp, name: &str, visible: bool) -> i64 {
        let (status, json) = call(
            app,
            PC,
            "POST",
            "/api/companies",
            Some(serde_json::json!({"name": name, "full_name": format!("{name} Corp"), "visible": visible})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn company_create_publishes_company_event() {
        let mut app = app();
        let id = seed_company(&app, "ACME", true).await;

        let event = app.events.try_recv().unwrap();
        assert_eq!(event.notification_type, NotificationType::Company);
        assert_eq!(event.subtype, "added");
        assert_eq!(event.target_id, Some(id));
        assert_eq!(event.variables["company_full"], "ACME Corp");
    }

    #[tokio::test]
    async fn directory_filter_hides_invisible_companies() {
        let app = app();
        let shown = seed_company(&app, "ACME", true).await;
        let hidden = seed_company(&app, "Stealth", false).await;

        let (status, json) = call(&app, STUDENT, "GET", "/api/companies", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 1);
        assert_eq!(json["items"][0]["id"], shown);

        let (status, _) = call(&app, STUDENT, "GET", &format!("/api/companies/{hidden}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, json) = call(&app, PC, "GET", "/api/companies", None).await;
        assert_eq!(json["total"], 2);

        let (status, json) = call(&app, STUDENT, "POST", "/api/companies", Some(serde_json::json!({"name": "x", "full_name": "X"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn featuring_a_video_publishes_content_event_once() {
        let mut app = app();
        let company = seed_company(&app, "ACME", true).await;
        app.events.try_recv().unwrap();

        let (status, json) = call(
            &app,
            PC,
            "POST",
            "/api/videos",
            Some(serde_json::json!({"company_id": company, "title": "Pitch", "url": "https://v.example/1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let video = json["id"].as_i64().unwrap();
        assert!(app.events.try_recv().is_err());

        let uri = format!("/api/videos/{video}");
        let (status, json) = call(&app, PC, "PUT", &uri, Some(serde_json::json!({"is_featured": true}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["is_featured"], true);
        assert_eq!(json["created_by"], "pc-1");

        let event = app.events.try_recv().unwrap();
        assert_eq!(event.notification_type, NotificationType::Content);
        assert_eq!(event.target_id, Some(company));
        assert_eq!(event.links, vec![EventLink::new(VIDEOS_SECTION, VIDEOS_SECTION, company)]);
        assert_eq!(event.variables["company_full"], "ACME Corp");

        // Already featured: no second event.
        let (status, _) = call(&app, PC, "PUT", &uri, Some(serde_json::json!({"title": "Pitch v2"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_succeeds_when_notification_queue_is_gone() {
        let app = app();
        let company = seed_company(&app, "ACME", true).await;
        let TestApp { router, events, db } = app;
        drop(events);
        let app = TestApp {
            router,
            events: mpsc::channel(1).1,
            db,
        };

        let (status, _) = call(
            &app,
            PC,
            "POST",
            "/api/videos",
            Some(serde_json::json!({"company_id": company, "title": "Pitch", "url": "https://v.example/1", "is_featured": true})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn student_video_visibility_and_ownership() {
        let app = app();
        let company = seed_company(&app, "ACME", true).await;
        for (title, featured) in [("Featured", true), ("Draft", false)] {
            call(
                &app,
                PC,
                "POST",
                "/api/videos",
                Some(serde_json::json!({"company_id": company, "title": title, "url": "https://v.example", "is_featured": featured})),
            )
            .await;
        }

        // VIEW_VIDEOS outranks VIEW_OWN_VIDEOS: only featured videos.
        let (_, json) = call(&app, STUDENT, "GET", "/api/videos", None).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["items"][0]["title"], "Featured");

        // Uploads are stamped with the caller and stay within the own filter.
        let (status, json) = call(
            &app,
            STUDENT,
            "POST",
            "/api/videos",
            Some(serde_json::json!({"company_id": company, "title": "My mock", "url": "https://v.example/me"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["created_by"], "stu-1");
        let mine = json["id"].as_i64().unwrap();

        // Editing someone else's video is hidden behind NOT_FOUND.
        let (_, pc_list) = call(&app, PC, "GET", "/api/videos", None).await;
        let theirs = pc_list["items"][0]["id"].as_i64().unwrap();
        let (status, _) = call(&app, STUDENT, "PUT", &format!("/api/videos/{theirs}"), Some(serde_json::json!({"title": "x"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // created_by is read-only.
        let (status, json) = call(
            &app,
            STUDENT,
            "PUT",
            &format!("/api/videos/{mine}"),
            Some(serde_json::json!({"title": "My mock v2", "created_by": "pc-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["created_by"], "stu-1");
        assert_eq!(json["title"], "My mock v2");

        // Deleting needs MANAGE_VIDEOS.
        let (status, _) = call(&app, STUDENT, "DELETE", &format!("/api/videos/{mine}"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, PC, "DELETE", &format!("/api/videos/{mine}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn video_for_unknown_company_rejected() {
        let app = app();
        let (status, json) = call(
            &app,
            PC,
            "POST",
            "/api/videos",
            Some(serde_json::json!({"company_id": 999, "title": "t", "url": "u"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn company_lookup_failure_is_not_reported_as_missing() {
        let app = app();
        app.db.exec_batch("DROP TABLE companies;").unwrap();
        let (status, json) = call(
            &app,
            PC,
            "POST",
            "/api/videos",
            Some(serde_json::json!({"company_id": 1, "title": "t", "url": "u"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "STORAGE_ERROR");
    }
}
