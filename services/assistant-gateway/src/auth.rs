//! Login, callback, logout, and session introspection routes
//!
//! - `GET /auth/microsoft` redirects the popup to the Microsoft authorize page
//! - `GET /auth/callback` exchanges the code and renders the popup page
//! - `POST /auth/logout` drops the session and expires the cookie
//! - `GET|POST /auth/me` reports what the store knows about the caller
//! - `GET /auth/status` verifies the session against Graph

use axum::Router;
use axum::extract::{Query, State};
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::cookie;
use crate::error::{ApiError, LOGIN_PATH, error_response};
use crate::metrics::record_login;
use crate::page::{self, Outcome};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/microsoft", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me).post(me))
        .route("/auth/status", get(status))
}

/// Query parameters Microsoft appends to the redirect URI.
#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[instrument(skip_all)]
async fn login(State(state): State<AppState>) -> Response {
    match graph_auth::build_authorization_url(&state.settings, &state.store).await {
        Ok(url) => {
            info!("redirecting to Microsoft login");
            Redirect::to(&url).into_response()
        }
        Err(e @ graph_auth::Error::Configuration(_)) => {
            warn!(error = %e, "login attempted without complete OAuth settings");
            ApiError::from(e).into_response()
        }
        Err(e) => {
            warn!(error = %e, "failed to start login");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                &format!("failed to start login: {e}"),
                false,
            )
        }
    }
}

#[instrument(skip_all)]
async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, Response) {
    if let Some(error) = params.error.as_deref() {
        warn!(
            error,
            description = params.error_description.as_deref().unwrap_or(""),
            "provider returned an error to the callback"
        );
        record_login("denied");
        let outcome = Outcome::provider_error(error, params.error_description.as_deref());
        return (jar, popup_page(&state, &outcome));
    }

    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        warn!("callback without authorization code");
        record_login("missing_code");
        return (jar, popup_page(&state, &Outcome::missing_code()));
    };

    match graph_auth::exchange(
        &state.http,
        &state.settings,
        &state.store,
        code,
        params.state.as_deref(),
    )
    .await
    {
        Ok(record) => {
            info!(identity_id = %record.identity_id, "login completed");
            record_login("success");
            let session = cookie::session(&state.session, &record.identity_id);
            (jar.add(session), popup_page(&state, &Outcome::Success))
        }
        Err(e) => {
            warn!(error = %e, "code exchange failed");
            record_login("failure");
            (jar, popup_page(&state, &Outcome::exchange_error(&e)))
        }
    }
}

/// HTML popup response, never cached.
fn popup_page(state: &AppState, outcome: &Outcome) -> Response {
    let mut response = Html(page::render(outcome, &state.frontend_origin)).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Logout always succeeds and always expires the cookie.
///
/// Without a resolvable session every stored token is cleared. Any caller
/// can trigger that, which is acceptable only while the gateway serves a
/// single user.
#[instrument(skip_all)]
async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let cookie_value = cookie::read(&jar, &state.session.cookie_name);
    match graph_auth::resolve_identity(&state.store, cookie_value.as_deref()).await {
        Ok(identity_id) => {
            state.store.clear_token(&identity_id).await;
            info!(identity_id = %identity_id, "logged out");
        }
        Err(_) => {
            warn!("logout without a resolvable session, clearing all sessions");
            state.store.clear_all().await;
        }
    }

    (
        jar.add(cookie::expired(&state.session)),
        axum::Json(json!({
            "status": "success",
            "message": "Successfully logged out",
            "authenticated": false,
        })),
    )
}

/// Session introspection from the store alone; never calls Graph.
async fn me(State(state): State<AppState>, jar: CookieJar) -> axum::Json<serde_json::Value> {
    let cookie_value = cookie::read(&jar, &state.session.cookie_name);
    let phase = state.store.phase(cookie_value.as_deref()).await;

    let record = match graph_auth::resolve_identity(&state.store, cookie_value.as_deref()).await {
        Ok(identity_id) => state.store.get_token(&identity_id).await,
        Err(_) => None,
    };

    axum::Json(match record {
        Some(record) => json!({
            "authenticated": true,
            "user_id": record.identity_id,
            "display_name": record.profile.display_name,
            "email": record.profile.email,
            "session_state": phase.label(),
        }),
        None => json!({
            "authenticated": false,
            "user_id": null,
            "display_name": null,
            "email": null,
            "session_state": phase.label(),
            "login_url": LOGIN_PATH,
        }),
    })
}

/// Live check: calls Graph `/me` with the stored token (refreshing on 401).
#[instrument(skip_all)]
async fn status(State(state): State<AppState>, jar: CookieJar) -> axum::Json<serde_json::Value> {
    let cookie_value = cookie::read(&jar, &state.session.cookie_name);
    let Ok(identity_id) = graph_auth::resolve_identity(&state.store, cookie_value.as_deref()).await
    else {
        return axum::Json(json!({
            "authenticated": false,
            "verified": true,
            "status": "Not logged in",
            "login_url": LOGIN_PATH,
        }));
    };

    axum::Json(match state.graph.me(&identity_id).await {
        Ok(profile) => json!({
            "authenticated": true,
            "verified": true,
            "status": format!(
                "Logged in as: {} ({})",
                profile.display_name.as_deref().unwrap_or("Unknown"),
                profile.email.as_deref().unwrap_or("Unknown"),
            ),
            "user_id": profile.id,
        }),
        Err(e) if e.requires_login() => {
            info!(identity_id = %identity_id, error = %e, "stored session no longer valid");
            json!({
                "authenticated": false,
                "verified": true,
                "status": "Token invalid",
                "login_url": LOGIN_PATH,
            })
        }
        Err(e) => {
            warn!(identity_id = %identity_id, error = %e, "could not verify session");
            json!({
                "authenticated": false,
                "verified": false,
                "status": "Unable to verify session",
            })
        }
    })
}
