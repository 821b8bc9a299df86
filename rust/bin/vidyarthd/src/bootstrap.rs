//! Startup checks and wiring of the shared access table and mailer.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use access::{AccessControl, PermissionTable};
use notification::{HttpMailer, LogMailer, Mailer};

use crate::config::{MailProvider, ServerConfig};

/// Refuse to start with a configuration that cannot serve requests.
pub fn verify_config(config: &ServerConfig) -> anyhow::Result<()> {
    if config.jwt.secret.is_empty() {
        anyhow::bail!("JWT secret is empty in configuration.");
    }
    if config.link.secret.is_empty() {
        anyhow::bail!("Link secret is empty in configuration.");
    }
    if config.link.base_url.is_empty() {
        anyhow::bail!("Link base_url is empty in configuration.");
    }
    if config.storage.data_dir.is_empty() {
        anyhow::bail!("Storage data_dir is empty in configuration.");
    }
    if config.mail.provider == MailProvider::Http
        && (config.mail.endpoint.is_empty() || config.mail.from.is_empty())
    {
        anyhow::bail!("Mail provider \"http\" needs both endpoint and from.");
    }
    Ok(())
}

/// Built-in rules of every module, overlaid with the operator's file.
///
/// Routes in the file replace the built-in rule for the same route and
/// method. The merged table is validated before it is returned, so a
/// priority tie anywhere stops startup.
pub fn build_access(file: Option<&Path>) -> anyhow::Result<Arc<AccessControl>> {
    let mut table = content::default_permissions();
    table.merge(notification::default_permissions());

    if let Some(path) = file {
        let overrides = PermissionTable::load(path)?;
        info!("Loaded permission overrides from {}", path.display());
        table.merge(overrides);
    }

    let access = AccessControl::new(table)?;
    info!("Access table ready ({} routes)", access.table().routes().count());
    Ok(Arc::new(access))
}

pub fn build_mailer(config: &ServerConfig) -> Arc<dyn Mailer> {
    match config.mail.provider {
        MailProvider::Log => {
            info!("Mail provider: log only");
            Arc::new(LogMailer)
        }
        MailProvider::Http => {
            info!("Mail provider: {}", config.mail.endpoint);
            Arc::new(HttpMailer::new(
                config.mail.endpoint.clone(),
                config.mail.api_key.clone(),
                config.mail.from.clone(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig::from_toml_str(
            r#"
[storage]
data_dir = "/tmp/vidyarth"
[jwt]
secret = "jwt"
[link]
secret = "link"
base_url = "https://placements.example.edu"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_verify_config_ok() {
        assert!(verify_config(&config()).is_ok());
    }

    #[test]
    fn test_verify_config_empty_secrets() {
        let mut c = config();
        c.jwt.secret.clear();
        assert!(verify_config(&c).is_err());

        let mut c = config();
        c.link.secret.clear();
        assert!(verify_config(&c).is_err());
    }

    #[test]
    fn test_verify_config_http_mail_needs_endpoint() {
        let mut c = config();
        c.mail.provider = MailProvider::Http;
        assert!(verify_config(&c).is_err());
        c.mail.endpoint = "https://mail.example.com/send".into();
        c.mail.from = "placements@example.edu".into();
        assert!(verify_config(&c).is_ok());
    }

    #[test]
    fn test_build_access_defaults() {
        let access = build_access(None).unwrap();
        assert!(access.table().rule("/api/videos", "GET").is_some());
        assert!(access.table().rule("/api/email/props", "PUT").is_some());
    }

    #[test]
    fn test_build_access_override_replaces_rule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.toml");
        std::fs::write(
            &path,
            r#"
[[routes."/api/videos".GET]]
capability = "VIEW_VIDEOS"
priority = 1
"#,
        )
        .unwrap();

        let access = build_access(Some(&path)).unwrap();
        let rule = access.table().rule("/api/videos", "GET").unwrap();
        let caps: Vec<&str> = rule.capabilities().collect();
        assert_eq!(caps, vec!["VIEW_VIDEOS"]);
        // Untouched routes keep their built-in rule.
        assert!(access.table().rule("/api/companies", "POST").is_some());
    }

    #[test]
    fn test_build_access_rejects_priority_tie() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.toml");
        std::fs::write(
            &path,
            r#"
[[routes."/api/videos".GET]]
capability = "MANAGE_VIDEOS"
priority = 1

[[routes."/api/videos".GET]]
capability = "VIEW_VIDEOS"
priority = 1
"#,
        )
        .unwrap();

        assert!(build_access(Some(&path)).is_err());
    }
}
