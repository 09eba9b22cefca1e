//! OAuth client settings for the Microsoft identity platform
//!
//! Everything that used to be a literal (tenant, redirect URI, endpoints) is
//! configuration here. The client is public (PKCE, no client secret), so none
//! of these values are secrets.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Authority host for authorize/token endpoints.
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";

/// Base URL for Microsoft Graph resource calls.
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";

/// Delegated scopes for To-Do and Planner access. `offline_access` is what
/// makes the token endpoint hand out a refresh token.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://graph.microsoft.com/User.Read",
    "https://graph.microsoft.com/Tasks.ReadWrite",
    "https://graph.microsoft.com/Tasks.Read",
    "https://graph.microsoft.com/Group.Read.All",
    "offline_access",
];

/// Store key for the single in-flight login. The identity is unknown until
/// the exchange completes, so the transaction cannot be keyed by user.
pub const PENDING_TRANSACTION_KEY: &str = "temp_auth";

/// How strictly the callback's `state` and the pending PKCE transaction are checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateValidation {
    /// Reject callbacks with no pending transaction or a mismatched state.
    #[default]
    Strict,
    /// Log the problem and continue the exchange.
    Permissive,
}

impl StateValidation {
    pub fn label(&self) -> &'static str {
        match self {
            StateValidation::Strict => "strict",
            StateValidation::Permissive => "permissive",
        }
    }
}

/// OAuth client configuration, deserialized from the `[oauth]` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub tenant_id: String,
    pub redirect_uri: String,
    /// When non-empty, `redirect_uri` must be one of these.
    #[serde(default)]
    pub allowed_redirect_uris: Vec<String>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default)]
    pub state_validation: StateValidation,
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_authority_url() -> String {
    DEFAULT_AUTHORITY_URL.to_string()
}

fn default_graph_url() -> String {
    DEFAULT_GRAPH_URL.to_string()
}

impl OAuthSettings {
    /// Settings with default scopes and endpoints.
    pub fn new(
        client_id: impl Into<String>,
        tenant_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
            redirect_uri: redirect_uri.into(),
            allowed_redirect_uris: Vec::new(),
            scopes: default_scopes(),
            authority_url: default_authority_url(),
            graph_url: default_graph_url(),
            state_validation: StateValidation::default(),
        }
    }

    /// Check the fields every OAuth operation depends on.
    ///
    /// Returns `Error::Configuration`, which callers must keep distinct from
    /// transport failures: retrying will not fix it.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Configuration("oauth client_id is not set".into()));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(Error::Configuration("oauth tenant_id is not set".into()));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(Error::Configuration("oauth redirect_uri is not set".into()));
        }
        if !self.allowed_redirect_uris.is_empty()
            && !self.allowed_redirect_uris.contains(&self.redirect_uri)
        {
            return Err(Error::Configuration(format!(
                "redirect_uri {} is not in allowed_redirect_uris",
                self.redirect_uri
            )));
        }
        if self.scopes.is_empty() {
            return Err(Error::Configuration("oauth scopes must not be empty".into()));
        }
        for (name, url) in [
            ("redirect_uri", &self.redirect_uri),
            ("authority_url", &self.authority_url),
            ("graph_url", &self.graph_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Configuration(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }
        Ok(())
    }

    pub fn authorize_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    /// Graph endpoint that resolves the signed-in identity.
    pub fn profile_endpoint(&self) -> String {
        format!("{}/me", self.graph_url.trim_end_matches('/'))
    }

    /// Scopes in the space-joined form the endpoints expect.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}
