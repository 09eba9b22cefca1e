//! Token endpoint interactions
//!
//! 1. Authorization code exchange (completing a login)
//! 2. Refresh-token grant (after a downstream call returns 401)
//!
//! Both POST form bodies to the tenant's `/oauth2/v2.0/token` endpoint. The
//! client is public, so no client secret is sent.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::settings::OAuthSettings;

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds; callers turn it into an absolute
/// unix millisecond timestamp when storing the record.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Absent when `offline_access` was not granted. On refresh, absent
    /// means the provider did not rotate it.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Exchange an authorization code for tokens.
///
/// `verifier` is the PKCE code verifier from the pending transaction; it is
/// omitted from the form when the transaction carried none.
pub async fn exchange_code(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    code: &str,
    verifier: Option<&str>,
) -> Result<TokenResponse> {
    let scope = settings.scope();
    let mut form = vec![
        ("client_id", settings.client_id.as_str()),
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", settings.redirect_uri.as_str()),
        ("scope", scope.as_str()),
    ];
    if let Some(verifier) = verifier {
        form.push(("code_verifier", verifier));
    }

    let response = client
        .post(settings.token_endpoint())
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::transport("token exchange request failed", e))?;

    let status = response.status();
    if !status.is_success() {
        let payload = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::OAuthExchange {
            status: status.as_u16(),
            payload,
        });
    }

    debug!("authorization code exchanged");
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Obtain a new access token with a refresh token.
///
/// A revoked or expired refresh token comes back as `InvalidCredentials`
/// (401/403, or `invalid_grant`); the user has to log in again.
pub async fn refresh_token(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    refresh: &str,
) -> Result<TokenResponse> {
    let scope = settings.scope();
    let response = client
        .post(settings.token_endpoint())
        .form(&[
            ("client_id", settings.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("scope", scope.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::transport("token refresh request failed", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 || body.contains("invalid_grant") {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}
