//! Cookie-to-identity resolution

use crate::error::{Error, Result};
use crate::store::TokenStore;

/// Resolve a session cookie value to a live identity id.
///
/// `NotAuthenticated` when the cookie is absent or blank, or when the named
/// identity holds no usable access token. Callers treat that as logged out
/// rather than as a failure.
pub async fn resolve_identity(store: &TokenStore, cookie_value: Option<&str>) -> Result<String> {
    let identity_id = cookie_value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::NotAuthenticated("no session cookie".into()))?;

    if !store.has_token(identity_id).await {
        return Err(Error::NotAuthenticated(format!(
            "no live session for {identity_id}"
        )));
    }
    Ok(identity_id.to_string())
}
