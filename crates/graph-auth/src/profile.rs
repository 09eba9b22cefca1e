//! Identity profile lookup
//!
//! The provider-issued `id` from Graph `/me` is the only key a token record
//! is ever stored under.

use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::settings::OAuthSettings;

/// Signed-in user as reported by Graph `/me`.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
    /// `mail`, falling back to `userPrincipalName`.
    pub email: Option<String>,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl UserProfile {
    /// Build a profile from a Graph user object. `None` without a non-empty `id`.
    pub fn from_graph(raw: serde_json::Value) -> Option<Self> {
        let id = raw
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.trim().is_empty())?
            .to_string();
        let display_name = string_field(&raw, "displayName");
        let email = string_field(&raw, "mail").or_else(|| string_field(&raw, "userPrincipalName"));
        Some(Self {
            id,
            display_name,
            email,
            raw,
        })
    }
}

fn string_field(raw: &serde_json::Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Fetch the profile for a freshly issued access token.
pub async fn fetch_profile(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    access_token: &str,
) -> Result<UserProfile> {
    let response = client
        .get(settings.profile_endpoint())
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| Error::transport("profile request failed", e))?;

    let status = response.status();
    if !status.is_success() {
        warn!(status = status.as_u16(), "profile endpoint rejected new token");
        return Err(Error::Profile(format!("profile endpoint returned {status}")));
    }

    let raw: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::Profile(format!("invalid profile response: {e}")))?;

    UserProfile::from_graph(raw).ok_or_else(|| Error::Profile("user id not found in profile".into()))
}
