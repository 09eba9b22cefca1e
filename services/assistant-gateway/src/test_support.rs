//! Router test fixtures: app state pointed at a stub Microsoft endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::{Form, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use graph_auth::{OAuthSettings, TokenRecord, TokenStore, UserProfile, now_millis};
use graph_client::GraphClient;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{Value, json};

use crate::AppState;
use crate::config::SessionConfig;
use crate::metrics::ServiceMetrics;

pub const FRONTEND: &str = "https://app.example.com";

/// State whose authority and Graph base both point at `base`.
pub fn test_state(base: &str) -> AppState {
    let mut settings = OAuthSettings::new(
        "client-123",
        "tenant-abc",
        "https://assistant.example.com/auth/callback",
    );
    settings.authority_url = base.to_string();
    settings.graph_url = base.to_string();
    state_with(settings)
}

pub fn state_with(settings: OAuthSettings) -> AppState {
    let settings = Arc::new(settings);
    let store = Arc::new(TokenStore::new());
    let http = reqwest::Client::new();
    AppState {
        graph: GraphClient::new(store.clone(), settings.clone(), http.clone()),
        store,
        settings,
        http,
        session: Arc::new(SessionConfig::default()),
        frontend_origin: Arc::from(FRONTEND),
        metrics: ServiceMetrics::new(),
        prometheus: PrometheusBuilder::new().build_recorder().handle(),
    }
}

/// Store a logged-in identity without going through the login flow.
pub async fn seed_session(store: &TokenStore, id: &str, access: &str, refresh: Option<&str>) {
    let now = now_millis();
    store
        .set_token(
            id,
            TokenRecord {
                identity_id: id.to_string(),
                access_token: access.into(),
                refresh_token: refresh.map(Into::into),
                expires_at: now + 3_600_000,
                received_at: now,
                scope: None,
                profile: UserProfile::from_graph(json!({
                    "id": id,
                    "displayName": "Ari Tester",
                    "mail": "ari@example.com",
                }))
                .unwrap(),
            },
        )
        .await;
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// Request counts seen by the stub provider.
#[derive(Default)]
pub struct Counters {
    pub token: AtomicUsize,
    pub refresh: AtomicUsize,
    pub graph: AtomicUsize,
}

impl Counters {
    pub fn token(&self) -> usize {
        self.token.load(Ordering::SeqCst)
    }

    pub fn refresh(&self) -> usize {
        self.refresh.load(Ordering::SeqCst)
    }
}

/// Bearer tokens the stub Graph accepts. `rt_1` refreshes to `at_2`.
fn authorized(headers: &HeaderMap) -> bool {
    matches!(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer at_1" | "Bearer at_2")
    )
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({"error": {"code": "InvalidAuthenticationToken", "message": "Access token has expired"}})),
    )
        .into_response()
}

fn guarded(counters: &Counters, headers: &HeaderMap, body: Value) -> Response {
    counters.graph.fetch_add(1, Ordering::SeqCst);
    if authorized(headers) {
        axum::Json(body).into_response()
    } else {
        unauthorized()
    }
}

/// Stub token endpoint plus the Graph resources the gateway proxies.
pub async fn start_provider() -> (String, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let c_token = counters.clone();
    let c_me = counters.clone();
    let c_lists = counters.clone();
    let c_tasks = counters.clone();
    let c_create = counters.clone();
    let c_complete = counters.clone();
    let c_delete = counters.clone();
    let c_groups = counters.clone();
    let c_plans = counters.clone();
    let c_plan_tasks = counters.clone();
    let c_buckets = counters.clone();
    let c_planner_task = counters.clone();
    let c_details = counters.clone();

    let app = Router::new()
        .route(
            "/{tenant}/oauth2/v2.0/token",
            post(move |Form(form): Form<Vec<(String, String)>>| {
                let counters = c_token.clone();
                async move {
                    counters.token.fetch_add(1, Ordering::SeqCst);
                    let field = |key: &str| {
                        form.iter()
                            .find(|(k, _)| k == key)
                            .map(|(_, v)| v.clone())
                            .unwrap_or_default()
                    };
                    let grant = field("grant_type");
                    if grant == "refresh_token" {
                        counters.refresh.fetch_add(1, Ordering::SeqCst);
                    }
                    match grant.as_str() {
                        "authorization_code" if field("code") == "good-code" => axum::Json(json!({
                            "access_token": "at_1",
                            "refresh_token": "rt_1",
                            "expires_in": 3600,
                            "token_type": "Bearer",
                            "scope": "User.Read Tasks.ReadWrite",
                        }))
                        .into_response(),
                        "refresh_token" if field("refresh_token") == "rt_1" => axum::Json(json!({
                            "access_token": "at_2",
                            "refresh_token": "rt_2",
                            "expires_in": 3600,
                            "token_type": "Bearer",
                        }))
                        .into_response(),
                        _ => (
                            StatusCode::BAD_REQUEST,
                            axum::Json(json!({
                                "error": "invalid_grant",
                                "error_description": "AADSTS70008: The provided authorization code or refresh token has expired",
                            })),
                        )
                            .into_response(),
                    }
                }
            }),
        )
        .route(
            "/me",
            get(move |headers: HeaderMap| {
                let counters = c_me.clone();
                async move {
                    guarded(
                        &counters,
                        &headers,
                        json!({
                            "id": "u-42",
                            "displayName": "Ari Tester",
                            "mail": "ari@example.com",
                        }),
                    )
                }
            }),
        )
        .route(
            "/me/todo/lists",
            get(move |headers: HeaderMap| {
                let counters = c_lists.clone();
                async move {
                    guarded(
                        &counters,
                        &headers,
                        json!({"value": [
                            {"id": "l-work", "displayName": "Work"},
                            {"id": "l-tasks", "displayName": "Tasks", "wellknownListName": "defaultList"},
                        ]}),
                    )
                }
            }),
        )
        .route(
            "/me/todo/lists/{list_id}/tasks",
            get(move |Path(list_id): Path<String>, headers: HeaderMap| {
                let counters = c_tasks.clone();
                async move {
                    guarded(
                        &counters,
                        &headers,
                        json!({"value": [
                            {"id": format!("t-{list_id}"), "title": format!("From {list_id}"), "status": "notStarted"},
                        ]}),
                    )
                }
            })
            .post(
                move |Path(list_id): Path<String>,
                      headers: HeaderMap,
                      axum::Json(body): axum::Json<Value>| {
                    let counters = c_create.clone();
                    async move {
                        let mut created = body.clone();
                        created["id"] = json!(format!("t-new-{list_id}"));
                        created["status"] = json!("notStarted");
                        let response = guarded(&counters, &headers, created);
                        if response.status() == StatusCode::OK {
                            (StatusCode::CREATED, response).into_response()
                        } else {
                            response
                        }
                    }
                },
            ),
        )
        .route(
            "/me/todo/lists/{list_id}/tasks/{task_id}",
            patch(
                move |Path((_list_id, task_id)): Path<(String, String)>,
                      headers: HeaderMap,
                      axum::Json(body): axum::Json<Value>| {
                    let counters = c_complete.clone();
                    async move {
                        let mut task = json!({"id": task_id, "title": "Done", "status": "notStarted"});
                        if let (Some(task), Some(fields)) = (task.as_object_mut(), body.as_object()) {
                            task.extend(fields.clone());
                        }
                        guarded(&counters, &headers, task)
                    }
                },
            )
            .delete(move |headers: HeaderMap| {
                let counters = c_delete.clone();
                async move {
                    let response = guarded(&counters, &headers, json!({}));
                    if response.status() == StatusCode::OK {
                        StatusCode::NO_CONTENT.into_response()
                    } else {
                        response
                    }
                }
            }),
        )
        .route(
            "/me/memberOf",
            get(move |headers: HeaderMap| {
                let counters = c_groups.clone();
                async move {
                    guarded(
                        &counters,
                        &headers,
                        json!({"value": [
                            {"@odata.type": "#microsoft.graph.group", "id": "g-1", "displayName": "Platform"},
                            {"@odata.type": "#microsoft.graph.directoryRole", "id": "r-1", "displayName": "Reader"},
                        ]}),
                    )
                }
            }),
        )
        .route(
            "/groups/{group_id}/planner/plans",
            get(move |Path(group_id): Path<String>, headers: HeaderMap| {
                let counters = c_plans.clone();
                async move {
                    guarded(
                        &counters,
                        &headers,
                        json!({"value": [
                            {"id": "p-1", "title": "Roadmap", "owner": group_id},
                        ]}),
                    )
                }
            }),
        )
        .route(
            "/planner/plans/{plan_id}/tasks",
            get(move |Path(plan_id): Path<String>, headers: HeaderMap| {
                let counters = c_plan_tasks.clone();
                async move {
                    guarded(
                        &counters,
                        &headers,
                        json!({"value": [
                            {"id": "pt-1", "title": "Ship it", "planId": plan_id, "percentComplete": 50},
                        ]}),
                    )
                }
            }),
        )
        .route(
            "/planner/plans/{plan_id}/buckets",
            get(move |Path(plan_id): Path<String>, headers: HeaderMap| {
                let counters = c_buckets.clone();
                async move {
                    guarded(
                        &counters,
                        &headers,
                        json!({"value": [
                            {"id": "b-1", "name": "To do", "planId": plan_id, "orderHint": "8585269235419181003P'"},
                        ]}),
                    )
                }
            }),
        )
        .route(
            "/planner/tasks/{task_id}",
            get(move |Path(task_id): Path<String>, headers: HeaderMap| {
                let counters = c_planner_task.clone();
                async move {
                    guarded(
                        &counters,
                        &headers,
                        json!({"id": task_id, "title": "Ship it", "planId": "p-1", "priority": 5}),
                    )
                }
            }),
        )
        .route(
            "/planner/tasks/{task_id}/details",
            get(move |Path(task_id): Path<String>, headers: HeaderMap| {
                let counters = c_details.clone();
                async move {
                    guarded(
                        &counters,
                        &headers,
                        json!({
                            "id": task_id,
                            "description": "Cut the release branch",
                            "previewType": "automatic",
                            "checklist": {},
                            "references": {},
                        }),
                    )
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (url, counters)
}
