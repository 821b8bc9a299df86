//! Route registration: module routes plus system endpoints, behind JWT auth.

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use tracing::info;

use vidyarth_core::Module;

use crate::auth_middleware::{self, JwtState};

/// Build the complete router.
///
/// Module routes carry absolute paths and their own access guards; the JWT
/// layer wraps everything so the guards always see an authenticated caller.
pub fn build_router(jwt_state: Arc<JwtState>, modules: &[&dyn Module]) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/version", get(version));

    for module in modules {
        info!("Mounting {} routes", module.name());
        app = app.merge(module.routes());
    }

    app.layer(middleware::from_fn_with_state(
        jwt_state,
        auth_middleware::auth_middleware,
    ))
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
    }))
}

async fn version() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": "vidyarthd",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use content::{ContentModule, ContentStore};
    use link::{LinkModule, SecureLinkCodec};
    use notification::model::Recipient;
    use notification::{
        MemoryMailer, NotificationConfig, NotificationModule, NotificationStore, SqlDirectory,
    };
    use vidyarth_sql::{SQLStore, SqliteStore};

    use crate::auth_middleware::tests::mint;
    use crate::bootstrap;

    const JWT_SECRET: &str = "test-jwt-secret";

    struct TestServer {
        app: Router,
        mailer: Arc<MemoryMailer>,
        _notification: NotificationModule,
    }

    fn server() -> TestServer {
        let sql: Arc<dyn SQLStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let codec = Arc::new(SecureLinkCodec::new("test-link-secret").unwrap());
        let access = bootstrap::build_access(None).unwrap();

        let directory = SqlDirectory::new(Arc::clone(&sql)).unwrap();
        directory
            .upsert_user(
                &Recipient {
                    user_id: "stu-1".into(),
                    email: "asha@example.edu".into(),
                    role: "student".into(),
                },
                true,
            )
            .unwrap();

        let mailer = Arc::new(MemoryMailer::new());
        let notification = NotificationModule::new(
            Arc::new(NotificationStore::new(Arc::clone(&sql)).unwrap()),
            Arc::new(directory),
            mailer.clone(),
            Arc::clone(&codec),
            Arc::clone(&access),
            NotificationConfig {
                base_url: "https://placements.example.edu".into(),
                ..Default::default()
            },
        );
        let content = ContentModule::new(
            Arc::new(ContentStore::new(Arc::clone(&sql)).unwrap()),
            notification.handle(),
            Arc::clone(&access),
        );
        let link = LinkModule::new(codec);

        let app = build_router(
            Arc::new(JwtState::from_secret(JWT_SECRET)),
            &[&content, &notification, &link],
        );
        TestServer {
            app,
            mailer,
            _notification: notification,
        }
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header("authorization", format!("Bearer {t}"));
        }
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (
            status,
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
        )
    }

    #[tokio::test]
    async fn system_endpoints_are_public() {
        let s = server();
        let (status, json) = send(&s.app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");

        let (status, json) = send(&s.app, "GET", "/version", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "vidyarthd");
    }

    #[tokio::test]
    async fn api_requires_token() {
        let s = server();
        let (status, json) = send(&s.app, "GET", "/api/videos", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["code"], "UNAUTHENTICATED");

        let (status, _) = send(&s.app, "GET", "/api/videos", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let wrong_key = mint("other-secret", "stu-1", &["VIEW_VIDEOS"], 3600);
        let (status, _) = send(&s.app, "GET", "/api/videos", Some(&wrong_key), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let s = server();
        let token = mint(JWT_SECRET, "stu-1", &["VIEW_VIDEOS"], -3600);
        let (status, _) = send(&s.app, "GET", "/api/videos", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_capabilities_drive_access() {
        let s = server();
        let viewer = mint(JWT_SECRET, "stu-1", &["VIEW_VIDEOS"], 3600);
        let (status, json) = send(&s.app, "GET", "/api/videos", Some(&viewer), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 0);

        let (status, json) = send(&s.app, "GET", "/api/email/props", Some(&viewer), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "PERMISSION_DENIED");

        let admin = mint(JWT_SECRET, "pc-1", &["MANAGE_ANNOUNCEMENTS"], 3600);
        let (status, json) = send(&s.app, "GET", "/api/email/props", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().is_some_and(|a| !a.is_empty()));
    }

    #[tokio::test]
    async fn link_resolve_is_public_and_rejects_garbage() {
        let s = server();
        let (status, json) = send(&s.app, "GET", "/link/resolve?auth=garbage", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_LINK");
    }

    #[tokio::test]
    async fn company_creation_emails_a_resolvable_link() {
        let s = server();
        let admin = mint(JWT_SECRET, "pc-1", &["MANAGE_COMPANIES"], 3600);
        let (status, created) = send(
            &s.app,
            "POST",
            "/api/companies",
            Some(&admin),
            Some(serde_json::json!({ "name": "acme", "full_name": "Acme Corp" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let company_id = created["id"].as_i64().unwrap();

        let mut sent = Vec::new();
        for _ in 0..100 {
            sent = s.mailer.sent();
            if !sent.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "asha@example.edu");
        assert_eq!(sent[0].subject, "Acme Corp Has Been Added");

        let html = &sent[0].html;
        let start = html.find("auth=").unwrap() + "auth=".len();
        let end = start + html[start..].find('"').unwrap();
        let token = &html[start..end];

        let (status, json) = send(
            &s.app,
            "GET",
            &format!("/link/resolve?auth={token}"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["section"], "companies");
        assert_eq!(json["key"], "Companies");
        assert_eq!(json["id"], company_id);
    }
}
