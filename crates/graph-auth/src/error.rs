//! Error types for the OAuth client and session store

/// Errors from OAuth and session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("no pending authorization for this callback")]
    MissingTransaction,

    #[error("state mismatch: callback state does not match the pending authorization")]
    StateMismatch,

    #[error("OAuth error ({status}): {payload}")]
    OAuthExchange { status: u16, payload: String },

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("failed to resolve user profile: {0}")]
    Profile(String),

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Map a reqwest send error, keeping timeouts apart from other transport failures.
    pub(crate) fn transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(format!("{context}: {err}"))
        } else {
            Error::Http(format!("{context}: {err}"))
        }
    }

    /// Network-level failure (connection refused, DNS, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
