//! Session cookie
//!
//! The cookie value is the identity id itself, unsigned. It is set with
//! `SameSite=None` because the frontend lives on a different subdomain,
//! which in turn requires `Secure`.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use crate::config::SessionConfig;

/// Session cookie value from the request, if present and non-empty.
pub fn read(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Cookie binding the client to `identity_id`.
pub fn session(config: &SessionConfig, identity_id: &str) -> Cookie<'static> {
    let max_age = Duration::seconds(i64::try_from(config.max_age_secs).unwrap_or(i64::MAX));
    build(config, identity_id.to_string(), max_age)
}

/// Removal cookie for the session.
pub fn expired(config: &SessionConfig) -> Cookie<'static> {
    build(config, String::new(), Duration::ZERO)
}

fn build(config: &SessionConfig, value: String, max_age: Duration) -> Cookie<'static> {
    let mut cookie = Cookie::build((config.cookie_name.clone(), value))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .max_age(max_age);
    if let Some(domain) = config.cookie_domain.clone().filter(|d| !d.is_empty()) {
        cookie = cookie.domain(domain);
    }
    cookie.build()
}
