//! Error types for authenticated Graph calls

/// Errors from the request executor and typed resources.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No usable session, or the provider still rejects the token after a refresh.
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("access token expired and no refresh token is available")]
    TokenExpiredNoRefresh,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("Graph API error ({status}): {message}")]
    ProviderApi { status: u16, message: String },

    #[error("transport error: {message}")]
    Transport { message: String, timeout: bool },

    /// Caller-supplied input rejected before any call was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl Error {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        Error::Transport {
            timeout: err.is_timeout(),
            message: err.to_string(),
        }
    }

    /// The caller must log in again before this can succeed.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationRequired(_) | Error::TokenExpiredNoRefresh | Error::RefreshFailed(_)
        )
    }
}

/// Result alias for Graph operations.
pub type Result<T> = std::result::Result<T, Error>;
