//! Authenticated request executor
//!
//! Every Graph call goes through `GraphClient::request`. It looks the
//! identity's token up in the store, sends the call with a bearer header,
//! and on 401 refreshes once and retries once.
//!
//! Refresh is single-flight per identity: callers queue on the identity's
//! refresh guard, and whoever gets the guard after a successful refresh sees
//! that the stored access token no longer matches the one that was rejected
//! and reuses it. Only the first caller spends the refresh token. When the
//! provider refuses the refresh, the guard remembers the rejected access
//! token and later callers holding that token fail without asking again. A
//! transport failure is not remembered, so the next caller retries.

use std::sync::Arc;
use std::time::Duration;

use graph_auth::{OAuthSettings, TokenStore, expiry_millis, now_millis};
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::classify::classify_status;
use crate::error::{Error, Result};

/// Upper bound for a single outbound Graph call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Graph client bound to the shared token store.
///
/// Cheap to clone; clones share the store, settings, and connection pool.
#[derive(Clone)]
pub struct GraphClient {
    store: Arc<TokenStore>,
    settings: Arc<OAuthSettings>,
    http: reqwest::Client,
    timeout: Duration,
}

impl GraphClient {
    pub fn new(store: Arc<TokenStore>, settings: Arc<OAuthSettings>, http: reqwest::Client) -> Self {
        Self {
            store,
            settings,
            http,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// Graph URL for a resource path. Each segment is percent-encoded, so ids
    /// taken from a request path cannot add segments or a query.
    pub fn resource_url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.settings.graph_url)
            .map_err(|e| Error::Configuration(format!("invalid graph_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Configuration("graph_url cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send an authenticated call on behalf of `identity_id`.
    ///
    /// Returns the decoded JSON body, or `{"success": true}` for 204 and
    /// empty bodies.
    pub async fn request(
        &self,
        method: Method,
        url: reqwest::Url,
        identity_id: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let record = self
            .store
            .get_token(identity_id)
            .await
            .filter(|r| r.has_access_token())
            .ok_or_else(|| Error::AuthenticationRequired(format!("no session for {identity_id}")))?;
        let access_token = record.access_token.expose().clone();

        let response = self.send(&method, &url, &access_token, body).await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return finish(response).await;
        }

        debug!(identity_id, path = url.path(), "access token rejected, refreshing");
        let refreshed = self.refresh(identity_id, &access_token).await?;

        let retried = self.send(&method, &url, &refreshed, body).await?;
        if retried.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!(identity_id, path = url.path(), "access token rejected after refresh");
        }
        finish(retried).await
    }

    async fn send(
        &self,
        method: &Method,
        url: &reqwest::Url,
        access_token: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            metrics::counter!("graph_requests_total", "status" => "transport_error").increment(1);
            Error::transport(e)
        })?;
        metrics::counter!("graph_requests_total", "status" => response.status().as_u16().to_string())
            .increment(1);
        Ok(response)
    }

    /// Obtain a usable access token after `rejected` came back 401.
    async fn refresh(&self, identity_id: &str, rejected: &str) -> Result<String> {
        let guard = self.store.refresh_guard(identity_id).await;
        let mut state = guard.lock().await;

        let record = self
            .store
            .get_token(identity_id)
            .await
            .ok_or_else(|| Error::AuthenticationRequired("session ended during refresh".into()))?;

        if record.has_access_token() && record.access_token.expose() != rejected {
            debug!(identity_id, "token already refreshed by a concurrent request");
            record_refresh("reused");
            return Ok(record.access_token.expose().clone());
        }

        if state.refused(rejected) {
            debug!(identity_id, "refresh already refused for this token");
            record_refresh("refused");
            return Err(Error::RefreshFailed(
                "token refresh was already refused for this session".into(),
            ));
        }

        let Some(refresh) = record.refresh_token.filter(|rt| !rt.is_blank()) else {
            info!(identity_id, "access token expired with no refresh token");
            record_refresh("no_refresh_token");
            return Err(Error::TokenExpiredNoRefresh);
        };

        let response =
            match graph_auth::refresh_token(&self.http, &self.settings, refresh.expose()).await {
                Ok(response) => response,
                Err(e) if e.is_transport() => {
                    warn!(identity_id, error = %e, "token refresh transport failure");
                    record_refresh("transport_error");
                    return Err(Error::Transport {
                        timeout: matches!(e, graph_auth::Error::Timeout(_)),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(identity_id, error = %e, "token refresh rejected");
                    state.refuse(rejected);
                    record_refresh("failure");
                    return Err(Error::RefreshFailed(e.to_string()));
                }
            };

        let expires_at = expiry_millis(now_millis(), response.expires_in);
        self.store
            .update_tokens(
                identity_id,
                response.access_token.clone(),
                response.refresh_token,
                expires_at,
                response.scope,
            )
            .await
            .map_err(|_| Error::AuthenticationRequired("session ended during refresh".into()))?;

        info!(identity_id, "token refresh succeeded");
        record_refresh("success");
        Ok(response.access_token)
    }
}

fn record_refresh(outcome: &'static str) {
    metrics::counter!("oauth_token_refresh_total", "outcome" => outcome).increment(1);
}

async fn finish(response: reqwest::Response) -> Result<Value> {
    let status = response.status().as_u16();
    let text = response.text().await.map_err(Error::transport)?;

    if let Some(err) = classify_status(status, &text) {
        return Err(err);
    }
    if status == 204 || text.trim().is_empty() {
        return Ok(json!({"success": true}));
    }
    serde_json::from_str(&text).map_err(|e| Error::Decode(format!("invalid JSON from Graph: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::{Json, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use common_test::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Shared fixtures for executor and resource tests.
    pub(crate) mod common_test {
        use super::super::*;
        use graph_auth::{TokenRecord, UserProfile};
        use serde_json::json;

        pub(crate) fn settings_for(base: &str) -> Arc<OAuthSettings> {
            let mut settings = OAuthSettings::new(
                "client-123",
                "tenant-abc",
                "https://assistant.example.com/auth/callback",
            );
            settings.authority_url = base.to_string();
            settings.graph_url = base.to_string();
            Arc::new(settings)
        }

        pub(crate) async fn store_with(
            id: &str,
            access: &str,
            refresh: Option<&str>,
        ) -> Arc<TokenStore> {
            let store = Arc::new(TokenStore::new());
            store
                .set_token(
                    id,
                    TokenRecord {
                        identity_id: id.to_string(),
                        access_token: access.into(),
                        refresh_token: refresh.map(Into::into),
                        expires_at: now_millis() - 1,
                        received_at: now_millis(),
                        scope: None,
                        profile: UserProfile::from_graph(json!({"id": id})).unwrap(),
                    },
                )
                .await;
            store
        }

        pub(crate) async fn serve(app: axum::Router) -> String {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            url
        }
    }

    #[derive(Default)]
    struct Counters {
        token: AtomicUsize,
        graph: AtomicUsize,
    }

    /// Graph stub that only accepts `at_new`, plus a token endpoint that issues it.
    async fn start_provider(refresh_status: StatusCode) -> (String, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let app = Router::new()
            .route(
                "/{tenant}/oauth2/v2.0/token",
                post(
                    move |State(c): State<Arc<Counters>>| async move {
                        c.token.fetch_add(1, Ordering::SeqCst);
                        // Hold the refresh open so concurrent 401s pile up on the guard
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        if refresh_status != StatusCode::OK {
                            return (refresh_status, r#"{"error":"invalid_grant"}"#).into_response();
                        }
                        (
                            StatusCode::OK,
                            r#"{"access_token":"at_new","refresh_token":"rt_new","expires_in":3600}"#,
                        )
                            .into_response()
                    },
                ),
            )
            .route(
                "/me/todo/lists",
                get(|State(c): State<Arc<Counters>>, headers: HeaderMap| async move {
                    c.graph.fetch_add(1, Ordering::SeqCst);
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if auth != "Bearer at_new" {
                        return (StatusCode::UNAUTHORIZED, "{}").into_response();
                    }
                    Json(json!({"value": [{"id": "l1", "displayName": "Tasks"}]})).into_response()
                })
                .post(|Json(body): Json<Value>| async move { Json(json!({"echo": body})) }),
            )
            .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
            .route(
                "/forbidden",
                get(|| async {
                    (
                        StatusCode::FORBIDDEN,
                        r#"{"error":{"code":"Authorization_RequestDenied","message":"Insufficient privileges"}}"#,
                    )
                }),
            )
            .route("/throttled", get(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }))
            .route("/garbage", get(|| async { "not json" }))
            .with_state(counters.clone());
        (common_test::serve(app).await, counters)
    }

    #[tokio::test]
    async fn no_session_requires_authentication() {
        let (url, counters) = start_provider(StatusCode::OK).await;
        let client = GraphClient::new(Arc::new(TokenStore::new()), settings_for(&url), reqwest::Client::new());

        let target = client.resource_url(&["me", "todo", "lists"]).unwrap();
        let err = client.request(Method::GET, target, "u1", None).await.unwrap_err();

        assert!(matches!(err, Error::AuthenticationRequired(_)), "got {err:?}");
        assert_eq!(counters.graph.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_token_makes_one_call() {
        let (url, counters) = start_provider(StatusCode::OK).await;
        let store = store_with("u1", "at_new", Some("rt")).await;
        let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new());

        let target = client.resource_url(&["me", "todo", "lists"]).unwrap();
        let value = client.request(Method::GET, target, "u1", None).await.unwrap();

        assert_eq!(value["value"][0]["id"], "l1");
        assert_eq!(counters.graph.load(Ordering::SeqCst), 1);
        assert_eq!(counters.token.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_refreshes_once_and_retries_once() {
        let (url, counters) = start_provider(StatusCode::OK).await;
        let store = store_with("u1", "at_old", Some("rt_old")).await;
        let client = GraphClient::new(store.clone(), settings_for(&url), reqwest::Client::new());

        let target = client.resource_url(&["me", "todo", "lists"]).unwrap();
        let value = client.request(Method::GET, target, "u1", None).await.unwrap();

        assert_eq!(value["value"][0]["displayName"], "Tasks");
        assert_eq!(counters.token.load(Ordering::SeqCst), 1);
        assert_eq!(counters.graph.load(Ordering::SeqCst), 2);

        let record = store.get_token("u1").await.unwrap();
        assert_eq!(record.access_token.expose(), "at_new");
        assert_eq!(record.refresh_token.unwrap().expose(), "rt_new");
        assert!(record.expires_at > now_millis());
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_fails_without_refresh_call() {
        let (url, counters) = start_provider(StatusCode::OK).await;
        let store = store_with("u1", "at_old", None).await;
        let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new());

        let target = client.resource_url(&["me", "todo", "lists"]).unwrap();
        let err = client.request(Method::GET, target, "u1", None).await.unwrap_err();

        assert!(matches!(err, Error::TokenExpiredNoRefresh), "got {err:?}");
        assert_eq!(counters.token.load(Ordering::SeqCst), 0);
        assert_eq!(counters.graph.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_is_refresh_failed() {
        let (url, counters) = start_provider(StatusCode::BAD_REQUEST).await;
        let store = store_with("u1", "at_old", Some("rt_revoked")).await;
        let client = GraphClient::new(store.clone(), settings_for(&url), reqwest::Client::new());

        let target = client.resource_url(&["me", "todo", "lists"]).unwrap();
        let err = client.request(Method::GET, target, "u1", None).await.unwrap_err();

        assert!(matches!(err, Error::RefreshFailed(_)), "got {err:?}");
        assert!(err.requires_login());
        assert_eq!(counters.token.load(Ordering::SeqCst), 1);
        // Tokens are left as they were
        let record = store.get_token("u1").await.unwrap();
        assert_eq!(record.access_token.expose(), "at_old");
    }

    #[tokio::test]
    async fn concurrent_401s_trigger_exactly_one_refresh() {
        let (url, counters) = start_provider(StatusCode::OK).await;
        let store = store_with("u1", "at_old", Some("rt_old")).await;
        let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new());

        let mut handles = vec![];
        for _ in 0..8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let target = client.resource_url(&["me", "todo", "lists"]).unwrap();
                client.request(Method::GET, target, "u1", None).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(counters.token.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_refresh_is_not_retried_by_queued_callers() {
        for refresh_status in [StatusCode::BAD_REQUEST, StatusCode::INTERNAL_SERVER_ERROR] {
            let (url, counters) = start_provider(refresh_status).await;
            let store = store_with("u1", "at_old", Some("rt_revoked")).await;
            let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new());

            let mut handles = vec![];
            for _ in 0..8 {
                let client = client.clone();
                handles.push(tokio::spawn(async move {
                    let target = client.resource_url(&["me", "todo", "lists"]).unwrap();
                    client.request(Method::GET, target, "u1", None).await
                }));
            }
            for h in handles {
                let err = h.await.unwrap().unwrap_err();
                assert!(matches!(err, Error::RefreshFailed(_)), "got {err:?}");
            }

            assert_eq!(counters.token.load(Ordering::SeqCst), 1, "{refresh_status}");
            assert_eq!(counters.graph.load(Ordering::SeqCst), 8);
        }
    }

    #[tokio::test]
    async fn huge_expires_in_on_refresh_saturates() {
        let app = Router::new()
            .route(
                "/{tenant}/oauth2/v2.0/token",
                post(|| async { r#"{"access_token":"at_new","expires_in":18446744073709551}"# }),
            )
            .route(
                "/me",
                get(|headers: HeaderMap| async move {
                    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
                    if auth != Some("Bearer at_new") {
                        return (StatusCode::UNAUTHORIZED, "{}").into_response();
                    }
                    Json(json!({"id": "u1"})).into_response()
                }),
            );
        let url = serve(app).await;
        let store = store_with("u1", "at_old", Some("rt_old")).await;
        let client = GraphClient::new(store.clone(), settings_for(&url), reqwest::Client::new());

        client
            .request(Method::GET, client.resource_url(&["me"]).unwrap(), "u1", None)
            .await
            .unwrap();

        let record = store.get_token("u1").await.unwrap();
        assert_eq!(record.access_token.expose(), "at_new");
        assert_eq!(record.expires_at, u64::MAX);
    }

    #[tokio::test]
    async fn status_classification_reaches_caller() {
        let (url, _) = start_provider(StatusCode::OK).await;
        let store = store_with("u1", "at_new", Some("rt")).await;
        let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new());

        let err = client
            .request(Method::GET, client.resource_url(&["forbidden"]).unwrap(), "u1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(ref m) if m == "Insufficient privileges"), "got {err:?}");

        let err = client
            .request(Method::GET, client.resource_url(&["missing"]).unwrap(), "u1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got {err:?}");

        let err = client
            .request(Method::GET, client.resource_url(&["throttled"]).unwrap(), "u1", None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::ProviderApi { status: 429, ref message } if message == "slow down"),
            "got {err:?}"
        );

        let err = client
            .request(Method::GET, client.resource_url(&["garbage"]).unwrap(), "u1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn no_content_is_success_marker() {
        let (url, _) = start_provider(StatusCode::OK).await;
        let store = store_with("u1", "at_new", Some("rt")).await;
        let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new());

        let value = client
            .request(Method::GET, client.resource_url(&["empty"]).unwrap(), "u1", None)
            .await
            .unwrap();
        assert_eq!(value, json!({"success": true}));
    }

    #[tokio::test]
    async fn json_body_is_sent() {
        let (url, _) = start_provider(StatusCode::OK).await;
        let store = store_with("u1", "at_new", Some("rt")).await;
        let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new());

        let body = json!({"title": "Write report"});
        let value = client
            .request(
                Method::POST,
                client.resource_url(&["me", "todo", "lists"]).unwrap(),
                "u1",
                Some(&body),
            )
            .await
            .unwrap();
        assert_eq!(value["echo"]["title"], "Write report");
    }

    #[tokio::test]
    async fn unreachable_graph_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let store = store_with("u1", "at", Some("rt")).await;
        let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new());
        let err = client
            .request(Method::GET, client.resource_url(&["me"]).unwrap(), "u1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { timeout: false, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn slow_graph_is_transport_timeout() {
        let app = Router::new().route(
            "/me",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        );
        let url = common_test::serve(app).await;
        let store = store_with("u1", "at", Some("rt")).await;
        let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new())
            .with_timeout(Duration::from_millis(100));

        let err = client
            .request(Method::GET, client.resource_url(&["me"]).unwrap(), "u1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { timeout: true, .. }), "got {err:?}");
    }

    #[test]
    fn resource_url_encodes_segments() {
        let client = GraphClient::new(
            Arc::new(TokenStore::new()),
            settings_for("https://graph.microsoft.com/v1.0"),
            reqwest::Client::new(),
        );
        let url = client
            .resource_url(&["me", "todo", "lists", "a/b?c", "tasks"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://graph.microsoft.com/v1.0/me/todo/lists/a%2Fb%3Fc/tasks"
        );
    }

    #[tokio::test]
    async fn refresh_outcome_metrics_are_recorded() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let (url, _) = start_provider(StatusCode::OK).await;
        let store = store_with("u1", "at_old", Some("rt_old")).await;
        let client = GraphClient::new(store, settings_for(&url), reqwest::Client::new());
        client
            .request(Method::GET, client.resource_url(&["me", "todo", "lists"]).unwrap(), "u1", None)
            .await
            .unwrap();

        let output = handle.render();
        assert!(output.contains("oauth_token_refresh_total{outcome=\"success\"} 1"), "{output}");
        assert!(output.contains("graph_requests_total{status=\"401\"} 1"), "{output}");
        assert!(output.contains("graph_requests_total{status=\"200\"} 1"), "{output}");
    }
}
