//! Server configuration, read from a TOML file.
//!
//! ```toml
//! [storage]
//! data_dir = "/var/lib/vidyarth"
//!
//! [jwt]
//! secret = "..."
//!
//! [link]
//! secret = "..."
//! base_url = "https://placements.example.edu"
//! max_age_secs = 0
//!
//! [notify]
//! due_scan_secs = 15
//!
//! [mail]
//! provider = "http"
//! endpoint = "https://mail.example.com/v1/send"
//! api_key = "..."
//! from = "placements@example.edu"
//!
//! [permissions]
//! file = "/etc/vidyarth/permissions.toml"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub storage: StorageConfig,
    pub jwt: JwtConfig,
    pub link: LinkConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret shared with the login service.
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub secret: String,
    /// Public portal URL that email links point at.
    pub base_url: String,
    /// Token lifetime; 0 keeps links valid forever.
    #[serde(default)]
    pub max_age_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub due_scan_secs: u64,
    pub stale_scan_secs: u64,
    pub stale_threshold_secs: i64,
    pub channel_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            due_scan_secs: 15,
            stale_scan_secs: 60,
            stale_threshold_secs: 600,
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailProvider {
    /// Log messages only.
    #[default]
    Log,
    Http,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub provider: MailProvider,
    pub endpoint: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Permission table overriding the built-in rules route by route.
    pub file: Option<String>,
}

impl ServerConfig {
    /// A bare name resolves to `/etc/vidyarth/<name>.toml`; anything that
    /// looks like a path is used as is.
    pub fn resolve_path(name_or_path: &str) -> PathBuf {
        if name_or_path.contains('/') || name_or_path.contains('.') {
            PathBuf::from(name_or_path)
        } else {
            PathBuf::from(format!("/etc/vidyarth/{name_or_path}.toml"))
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
