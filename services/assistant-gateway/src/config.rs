//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OAuth client id and tenant can be supplied as MS_CLIENT_ID and
//! MS_TENANT_ID so the same file works across tenants. A missing client id
//! is not a load error: the gateway starts and the login endpoint reports a
//! configuration error instead.

use graph_auth::OAuthSettings;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub session: SessionConfig,
    pub frontend: FrontendConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Bound for every outbound call (token endpoint, Graph).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Session cookie and store housekeeping
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Set to share the cookie across subdomains, e.g. `.example.com`.
    #[serde(default)]
    pub cookie_domain: Option<String>,
    /// Cookie lifetime, also the maximum age of a stored session.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Browser frontend that opened the login popup
#[derive(Debug, Clone, Deserialize)]
pub struct FrontendConfig {
    /// Target origin for the callback page's `postMessage`.
    pub origin: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

fn default_cookie_name() -> String {
    "user_session".into()
}

fn default_max_age() -> u64 {
    86_400
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            cookie_domain: None,
            max_age_secs: default_max_age(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SessionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn require_http_url(field: &str, value: &str) -> common::Result<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("MS_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }
        if let Ok(tenant_id) = std::env::var("MS_TENANT_ID") {
            config.oauth.tenant_id = tenant_id;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        require_http_url("oauth.redirect_uri", &self.oauth.redirect_uri)?;
        require_http_url("oauth.authority_url", &self.oauth.authority_url)?;
        require_http_url("oauth.graph_url", &self.oauth.graph_url)?;
        require_http_url("frontend.origin", &self.frontend.origin)?;

        if !self.oauth.allowed_redirect_uris.is_empty()
            && !self.oauth.allowed_redirect_uris.contains(&self.oauth.redirect_uri)
        {
            return Err(common::Error::Config(format!(
                "oauth.redirect_uri {} is not in allowed_redirect_uris",
                self.oauth.redirect_uri
            )));
        }

        if self.oauth.scopes.is_empty() {
            return Err(common::Error::Config("oauth.scopes must not be empty".into()));
        }

        if self.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.session.cookie_name.trim().is_empty() {
            return Err(common::Error::Config("session.cookie_name must not be empty".into()));
        }

        if self.session.sweep_interval_secs == 0 {
            return Err(common::Error::Config(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("assistant-gateway.toml")
    }
}
