//! Status classification for Graph responses
//!
//! Graph error bodies look like `{"error":{"code":"...","message":"..."}}`.
//! The message is surfaced when present; otherwise the raw body is.

use crate::error::Error;

/// Pull a human-readable message out of a Graph error body.
pub fn provider_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    if let Some(message) = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/message"))
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
    {
        return message.to_string();
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        String::from("no response body")
    } else {
        trimmed.to_string()
    }
}

/// Map an upstream status to an error. `None` for success statuses.
///
/// 401 is handled by the executor's refresh path before this is reached; a
/// 401 classified here means the retried call was rejected too.
pub fn classify_status(status: u16, body: &str) -> Option<Error> {
    if status < 400 {
        return None;
    }
    let message = provider_message(body);
    Some(match status {
        401 => Error::AuthenticationRequired(format!("access token rejected after refresh: {message}")),
        403 => Error::PermissionDenied(message),
        404 => Error::NotFound(message),
        _ => Error::ProviderApi { status, message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_taken_from_error_object() {
        let body = r#"{"error":{"code":"ErrorItemNotFound","message":"The specified object was not found in the store."}}"#;
        assert_eq!(
            provider_message(body),
            "The specified object was not found in the store."
        );
    }

    #[test]
    fn message_falls_back_to_raw_text() {
        assert_eq!(provider_message("  Service Unavailable \n"), "Service Unavailable");
        assert_eq!(provider_message(r#"{"error":"flat"}"#), r#"{"error":"flat"}"#);
        assert_eq!(provider_message(""), "no response body");
    }

    #[test]
    fn success_statuses_are_not_errors() {
        assert!(classify_status(200, "").is_none());
        assert!(classify_status(204, "").is_none());
        assert!(classify_status(304, "").is_none());
    }

    #[test]
    fn forbidden_and_not_found_have_their_own_variants() {
        let body = r#"{"error":{"message":"Insufficient privileges"}}"#;
        assert!(matches!(
            classify_status(403, body),
            Some(Error::PermissionDenied(m)) if m == "Insufficient privileges"
        ));
        assert!(matches!(classify_status(404, "{}"), Some(Error::NotFound(_))));
    }

    #[test]
    fn other_failures_are_provider_api() {
        let body = r#"{"error":{"message":"Too many requests"}}"#;
        match classify_status(429, body) {
            Some(Error::ProviderApi { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "Too many requests");
            }
            other => panic!("expected ProviderApi, got {other:?}"),
        }
        assert!(matches!(
            classify_status(500, "boom"),
            Some(Error::ProviderApi { status: 500, .. })
        ));
    }

    #[test]
    fn unauthorized_after_retry_requires_login() {
        let err = classify_status(401, "").unwrap();
        assert!(err.requires_login());
    }
}
