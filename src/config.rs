use std::time::Duration;

use thiserror::Error;

/// Environment variable that overrides the service base URL.
pub const API_URL_ENV: &str = "FRAUDSCOPE_API_URL";
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Base URL must start with http:// or https://, got '{0}'")]
    BadScheme(String),
}

/// Connection settings for the scoring service.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// How often the health query refreshes itself.
    pub health_poll_interval: Duration,
    /// How long fetched metrics are served from cache before a refetch.
    pub metrics_stale_after: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            health_poll_interval: Duration::from_secs(15),
            metrics_stale_after: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Defaults, then `FRAUDSCOPE_API_URL`, then the explicit override.
    pub fn resolve(base_url_override: Option<&str>) -> Result<Self, ConfigError> {
        let from_env = std::env::var(API_URL_ENV).ok();
        let chosen = base_url_override
            .map(str::to_string)
            .or(from_env)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        ClientConfig::default().with_base_url(&chosen)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(ConfigError::BadScheme(base_url.to_string()));
        }
        self.base_url = trimmed.to_string();
        Ok(self)
    }

    /// Absolute URL for an API path such as `/api/v1/health`.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let cfg = ClientConfig::default()
            .with_base_url("https://scoring.internal:8443/")
            .unwrap();
        assert_eq!(cfg.base_url, "https://scoring.internal:8443");
        assert_eq!(
            cfg.url("/api/v1/models"),
            "https://scoring.internal:8443/api/v1/models"
        );
    }

    #[test]
    fn rejects_missing_scheme() {
        let err = ClientConfig::default()
            .with_base_url("localhost:5000")
            .unwrap_err();
        assert_eq!(err, ConfigError::BadScheme("localhost:5000".to_string()));
    }

    #[test]
    fn explicit_override_wins() {
        let cfg = ClientConfig::resolve(Some("http://10.0.0.5:9000")).unwrap();
        assert_eq!(cfg.base_url, "http://10.0.0.5:9000");
        assert_eq!(cfg.health_poll_interval, Duration::from_secs(15));
    }
}
