//! Configuration management for the client.

use magsync_engine::DEFAULT_KEY_PATH;
use std::env;
use std::time::Duration;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the site serving the sync endpoints
    pub site_url: String,
    /// Application whose collections are mirrored
    pub app: String,
    /// SQLite connection URL of the local mirror
    pub database_url: String,
    /// Identifier field of created collections
    pub key_path: String,
    /// Timeout applied to every remote request
    pub timeout: Duration,
    /// Session cookie sent with every remote request
    pub session_cookie: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let site_url = env::var("MAGSYNC_SITE_URL").map_err(|_| ConfigError::MissingSiteUrl)?;
        if !site_url.starts_with("http://") && !site_url.starts_with("https://") {
            return Err(ConfigError::InvalidSiteUrl(site_url));
        }

        let app = env::var("MAGSYNC_APP").map_err(|_| ConfigError::MissingApp)?;
        if app.is_empty() || app.contains('/') {
            return Err(ConfigError::InvalidApp(app));
        }

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://magsync.db?mode=rwc".to_string());

        let key_path = env::var("MAGSYNC_KEY_PATH").unwrap_or_else(|_| DEFAULT_KEY_PATH.to_string());

        let timeout = env::var("MAGSYNC_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidTimeout)?;

        let session_cookie = env::var("MAGSYNC_SESSION_COOKIE")
            .ok()
            .filter(|cookie| !cookie.is_empty());

        Ok(Self {
            site_url: site_url.trim_end_matches('/').to_string(),
            app,
            database_url,
            key_path,
            timeout,
            session_cookie,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MAGSYNC_SITE_URL environment variable is required")]
    MissingSiteUrl,

    #[error("MAGSYNC_SITE_URL must be an http(s) URL, got {0:?}")]
    InvalidSiteUrl(String),

    #[error("MAGSYNC_APP environment variable is required")]
    MissingApp,

    #[error("Invalid MAGSYNC_APP value: {0:?}")]
    InvalidApp(String),

    #[error("Invalid MAGSYNC_TIMEOUT_SECS value")]
    InvalidTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test touches the process environment so runs cannot interleave
    #[test]
    fn from_env_defaults_and_errors() {
        env::remove_var("MAGSYNC_SITE_URL");
        env::remove_var("MAGSYNC_APP");
        env::remove_var("DATABASE_URL");
        env::remove_var("MAGSYNC_KEY_PATH");
        env::remove_var("MAGSYNC_TIMEOUT_SECS");
        env::remove_var("MAGSYNC_SESSION_COOKIE");

        assert!(matches!(Config::from_env(), Err(ConfigError::MissingSiteUrl)));

        env::set_var("MAGSYNC_SITE_URL", "ftp://example.org");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidSiteUrl(_))
        ));

        env::set_var("MAGSYNC_SITE_URL", "https://example.org/");
        assert!(matches!(Config::from_env(), Err(ConfigError::MissingApp)));

        env::set_var("MAGSYNC_APP", "library");
        let config = Config::from_env().unwrap();
        assert_eq!(config.site_url, "https://example.org");
        assert_eq!(config.database_url, "sqlite://magsync.db?mode=rwc");
        assert_eq!(config.key_path, "_id");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.session_cookie.is_none());

        env::set_var("MAGSYNC_TIMEOUT_SECS", "soon");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidTimeout)));

        env::set_var("MAGSYNC_TIMEOUT_SECS", "5");
        env::set_var("MAGSYNC_SESSION_COOKIE", "sessionid=abc");
        let config = Config::from_env().unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.session_cookie.as_deref(), Some("sessionid=abc"));
    }
}
