use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sg_auth::{FileCredentialStore, HttpTimeouts, SessionConfig};
use tracing::debug;
use url::Url;

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    pub api_base: Option<String>,
    pub login_route: Option<String>,
    pub storage_dir: Option<PathBuf>,
    pub http: Option<HttpConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl CliConfig {
    /// Read the config file; a missing file yields the defaults
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        toml::from_slice(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn default_path() -> anyhow::Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Directory holding the persisted session
    pub fn storage_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(FileCredentialStore::default_storage_dir()?),
        }
    }

    /// Build the session config, letting `api_base_override` win over the file
    pub fn session_config(&self, api_base_override: Option<Url>) -> anyhow::Result<SessionConfig> {
        let api_base = match (api_base_override, &self.api_base) {
            (Some(url), _) => url,
            (None, Some(raw)) => {
                Url::parse(raw).with_context(|| format!("Invalid api_base in config: {raw}"))?
            }
            (None, None) => anyhow::bail!(
                "No API base configured; pass --api-base or set api_base in config.toml"
            ),
        };

        let mut config = SessionConfig::new(api_base);
        if let Some(route) = &self.login_route {
            config = config.with_login_route(route.clone());
        }
        if let Some(http) = &self.http {
            config = config.with_timeouts(HttpTimeouts {
                connect: Duration::from_secs(http.connect_timeout_secs),
                request: Duration::from_secs(http.request_timeout_secs),
            });
        }
        Ok(config)
    }
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("", "", "sessiongate").context("Failed to get project directories")
}
