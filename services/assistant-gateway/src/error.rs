//! HTTP error responses
//!
//! Library errors from the OAuth flow and the Graph executor surface here
//! and are turned into JSON responses. Every authentication failure carries
//! `login_url` so the frontend can restart the login popup.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Where the frontend sends the user to (re)authenticate.
pub const LOGIN_PATH: &str = "/auth/microsoft";

/// Errors returned from request handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] graph_auth::Error),

    #[error(transparent)]
    Graph(#[from] graph_client::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use graph_auth::Error as A;
        use graph_client::Error as G;
        match self {
            ApiError::Auth(e) => match e {
                A::Configuration(_) | A::MissingTransaction | A::StateMismatch => {
                    StatusCode::BAD_REQUEST
                }
                A::NotAuthenticated(_) | A::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
                A::NotFound(_) => StatusCode::NOT_FOUND,
                A::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                A::Http(_) | A::OAuthExchange { .. } | A::TokenExchange(_) | A::Profile(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
            ApiError::Graph(e) => match e {
                G::AuthenticationRequired(_) | G::TokenExpiredNoRefresh | G::RefreshFailed(_) => {
                    StatusCode::UNAUTHORIZED
                }
                G::PermissionDenied(_) => StatusCode::FORBIDDEN,
                G::NotFound(_) => StatusCode::NOT_FOUND,
                G::InvalidInput(_) => StatusCode::BAD_REQUEST,
                G::Transport { timeout: true, .. } => StatusCode::GATEWAY_TIMEOUT,
                G::Transport { .. } | G::ProviderApi { .. } | G::Decode(_) => {
                    StatusCode::BAD_GATEWAY
                }
                G::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable machine-readable error type for the JSON body.
    pub fn kind(&self) -> &'static str {
        use graph_auth::Error as A;
        use graph_client::Error as G;
        match self {
            ApiError::Auth(A::Configuration(_)) | ApiError::Graph(G::Configuration(_)) => {
                "configuration_error"
            }
            ApiError::Auth(A::MissingTransaction | A::StateMismatch) => "invalid_callback",
            ApiError::Auth(A::NotAuthenticated(_)) => "not_authenticated",
            ApiError::Graph(G::TokenExpiredNoRefresh) => "token_expired",
            ApiError::Auth(A::InvalidCredentials(_)) | ApiError::Graph(G::RefreshFailed(_)) => {
                "refresh_failed"
            }
            ApiError::Graph(G::AuthenticationRequired(_)) => "authentication_required",
            ApiError::Graph(G::PermissionDenied(_)) => "permission_denied",
            ApiError::Auth(A::NotFound(_)) | ApiError::Graph(G::NotFound(_)) => "not_found",
            ApiError::Graph(G::InvalidInput(_)) => "invalid_request",
            ApiError::Auth(A::Http(_) | A::Timeout(_)) | ApiError::Graph(G::Transport { .. }) => {
                "upstream_unreachable"
            }
            _ => "upstream_error",
        }
    }

    pub fn requires_login(&self) -> bool {
        self.status() == StatusCode::UNAUTHORIZED
    }
}

/// JSON error body: `{"error":{"type":"...","message":"..."}}`, plus `login_url` on 401.
pub fn error_response(status: StatusCode, kind: &str, message: &str, login: bool) -> Response {
    let mut body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
        }
    });
    if login {
        body["login_url"] = serde_json::Value::from(LOGIN_PATH);
    }
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        error_response(status, self.kind(), &self.to_string(), self.requires_login())
    }
}
