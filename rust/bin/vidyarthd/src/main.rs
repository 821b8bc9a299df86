//! `vidyarthd`: the Vidyarth placement portal server.
//!
//! Usage:
//!   vidyarthd -c <context-name-or-path> [--listen <addr>]
//!
//! The context name resolves to `/etc/vidyarth/<name>.toml`.
//! If a path with `/` or `.` is given, it's used directly.

mod auth_middleware;
mod bootstrap;
mod config;
mod routes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use content::{ContentModule, ContentStore};
use link::{LinkModule, SecureLinkCodec};
use notification::{
    NotificationConfig, NotificationModule, NotificationStore, SqlDirectory, WorkerConfig,
};
use vidyarth_core::Module;
use vidyarth_sql::{SQLStore, SqliteStore};

use auth_middleware::JwtState;
use config::ServerConfig;

/// Vidyarth server.
#[derive(Parser, Debug)]
#[command(name = "vidyarthd", about = "Vidyarth placement portal server")]
struct Cli {
    /// Context name or path to config file.
    #[arg(short = 'c', long = "config", required = true)]
    config: String,

    /// Listen address (overrides default 0.0.0.0:8080).
    #[arg(long = "listen", default_value = "0.0.0.0:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config_path = ServerConfig::resolve_path(&cli.config);
    info!("Loading configuration from {}", config_path.display());
    let server_config = ServerConfig::load(&config_path)?;
    bootstrap::verify_config(&server_config)?;

    // Storage.
    let data_dir = PathBuf::from(&server_config.storage.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let core_config = vidyarth_core::ServiceConfig {
        data_dir: Some(data_dir),
        listen: cli.listen.clone(),
        ..Default::default()
    };
    let sql: Arc<dyn SQLStore> = Arc::new(
        SqliteStore::open(&core_config.resolve_sqlite_path())
            .map_err(|e| anyhow::anyhow!("failed to open SQL store: {}", e))?,
    );

    // Shared services.
    let codec = Arc::new(
        SecureLinkCodec::new(&server_config.link.secret)?
            .with_max_age(server_config.link.max_age_secs),
    );
    let access = bootstrap::build_access(
        server_config.permissions.file.as_deref().map(Path::new),
    )?;
    let mailer = bootstrap::build_mailer(&server_config);

    // Modules.
    let notify = &server_config.notify;
    let notification_module = NotificationModule::new(
        Arc::new(NotificationStore::new(Arc::clone(&sql))?),
        Arc::new(SqlDirectory::new(Arc::clone(&sql))?),
        mailer,
        Arc::clone(&codec),
        Arc::clone(&access),
        NotificationConfig {
            base_url: server_config.link.base_url.clone(),
            queue_capacity: notify.channel_capacity,
            worker: WorkerConfig {
                due_check_interval: notify.due_scan_secs,
                stale_check_interval: notify.stale_scan_secs,
                stale_threshold: notify.stale_threshold_secs,
            },
        },
    );
    info!("Notification module initialized");

    let content_module = ContentModule::new(
        Arc::new(ContentStore::new(Arc::clone(&sql))?),
        notification_module.handle(),
        Arc::clone(&access),
    );
    info!("Content module initialized");

    let link_module = LinkModule::new(codec);

    let modules: [&dyn Module; 3] = [&notification_module, &content_module, &link_module];

    let jwt_state = Arc::new(JwtState::from_secret(&server_config.jwt.secret));
    let app = routes::build_router(jwt_state, &modules);

    let listener = tokio::net::TcpListener::bind(&core_config.listen).await?;
    info!("Vidyarth server listening on {}", core_config.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    vidyarth_core::shutdown_all(&modules);
    Ok(())
}
