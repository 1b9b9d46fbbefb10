use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use url::Url;

/// Console configuration: a YAML file (all keys optional) overridden by
/// environment variables, with defaults suitable for a local backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub backend: BackendConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the crawl backend's REST API.
    pub base_url: String,

    /// Token sent as `X-CSRFToken` on every mutating request.
    pub csrf_token: Option<String>,

    /// Per-request timeout for REST calls. Does not apply to status streams.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub addr: SocketAddr,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            serve: ServeConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            csrf_token: None,
            request_timeout_secs: 10,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".parse().expect("default listen addr"),
        }
    }
}

impl ConsoleConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read config: {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("parse config: {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Some(base_url) = env_non_empty("CRAWLBOARD_BACKEND_URL") {
            config.backend.base_url = base_url;
        }
        if let Some(token) = env_non_empty("CRAWLBOARD_CSRF_TOKEN") {
            config.backend.csrf_token = Some(token);
        }

        config.backend.base_url = config.backend.base_url.trim_end_matches('/').to_string();
        config.backend.validate()?;
        Ok(config)
    }
}

impl BackendConfig {
    fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("parse backend base url: {}", self.base_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("backend base url must be http/https: {}", self.base_url);
        }
        Ok(())
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_backend() {
        let config = ConsoleConfig::default();
        assert_eq!(config.backend.base_url, "http://localhost:8000/api");
        assert_eq!(config.backend.csrf_token, None);
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_keys() {
        let config: ConsoleConfig = serde_yaml::from_str(
            "backend:\n  base_url: https://backend.example.org/api\n  csrf_token: sekrit\n",
        )
        .expect("parse config");
        assert_eq!(config.backend.base_url, "https://backend.example.org/api");
        assert_eq!(config.backend.csrf_token.as_deref(), Some("sekrit"));
        assert_eq!(config.backend.request_timeout_secs, 10);
    }

    #[test]
    fn load_rejects_non_http_base_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "backend:\n  base_url: ftp://backend\n").expect("write config");

        let err = ConsoleConfig::load(Some(&path)).unwrap_err().to_string();
        assert!(err.contains("http/https"), "unexpected error: {err}");
    }
}
