//! Microsoft To-Do and Planner pass-through routes
//!
//! Every route resolves the session cookie first; without a live session the
//! caller gets 401 with `login_url`. The list id `default` stands for the
//! user's default To-Do list.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use graph_client::{NewTodoTask, TodoTaskUpdate};
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::AppState;
use crate::cookie;
use crate::error::ApiError;

/// Path alias resolved through `find_default_list_id`.
const DEFAULT_LIST: &str = "default";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/todo/lists", get(todo_lists))
        .route(
            "/todo/lists/{list_id}/tasks",
            get(todo_tasks).post(create_todo_task),
        )
        .route(
            "/todo/lists/{list_id}/tasks/{task_id}",
            patch(update_todo_task).delete(delete_todo_task),
        )
        .route(
            "/todo/lists/{list_id}/tasks/{task_id}/complete",
            patch(complete_todo_task),
        )
        .route("/todo/tasks", get(all_todo_tasks))
        .route("/projects/groups", get(groups))
        .route("/projects/groups/{group_id}/plans", get(group_plans))
        .route("/projects/plans/{plan_id}/tasks", get(plan_tasks))
        .route("/projects/plans/{plan_id}/buckets", get(plan_buckets))
        .route("/projects/tasks/{task_id}", get(planner_task))
}

async fn identity(state: &AppState, jar: &CookieJar) -> Result<String, ApiError> {
    let cookie_value = cookie::read(jar, &state.session.cookie_name);
    Ok(graph_auth::resolve_identity(&state.store, cookie_value.as_deref()).await?)
}

async fn list_id(state: &AppState, identity_id: &str, list_id: String) -> Result<String, ApiError> {
    if list_id == DEFAULT_LIST {
        Ok(state.graph.find_default_list_id(identity_id).await?)
    } else {
        Ok(list_id)
    }
}

async fn todo_lists(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let lists = state.graph.todo_lists(&identity_id).await?;
    Ok(Json(json!({ "count": lists.len(), "lists": lists })))
}

async fn todo_tasks(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(list): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let list = list_id(&state, &identity_id, list).await?;
    let tasks = state.graph.todo_tasks(&identity_id, &list).await?;
    Ok(Json(json!({ "list_id": list, "count": tasks.len(), "tasks": tasks })))
}

#[instrument(skip_all)]
async fn create_todo_task(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(list): Path<String>,
    Json(task): Json<NewTodoTask>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let list = list_id(&state, &identity_id, list).await?;
    let created = state
        .graph
        .create_todo_task(&identity_id, &list, &task)
        .await?;
    info!(identity_id = %identity_id, list_id = %list, task_id = %created.id, "created task");
    Ok((StatusCode::CREATED, Json(json!({ "list_id": list, "task": created }))))
}

#[instrument(skip_all)]
async fn complete_todo_task(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((list, task_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let list = list_id(&state, &identity_id, list).await?;
    let task = state
        .graph
        .complete_todo_task(&identity_id, &list, &task_id)
        .await?;
    info!(identity_id = %identity_id, list_id = %list, task_id = %task.id, "completed task");
    Ok(Json(json!({ "list_id": list, "task": task })))
}

#[instrument(skip_all)]
async fn update_todo_task(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((list, task_id)): Path<(String, String)>,
    Json(update): Json<TodoTaskUpdate>,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let list = list_id(&state, &identity_id, list).await?;
    let task = state
        .graph
        .update_todo_task(&identity_id, &list, &task_id, &update)
        .await?;
    info!(identity_id = %identity_id, list_id = %list, task_id = %task.id, "updated task");
    Ok(Json(json!({ "list_id": list, "task": task })))
}

#[instrument(skip_all)]
async fn delete_todo_task(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((list, task_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let list = list_id(&state, &identity_id, list).await?;
    state
        .graph
        .delete_todo_task(&identity_id, &list, &task_id)
        .await?;
    info!(identity_id = %identity_id, list_id = %list, task_id = %task_id, "deleted task");
    Ok(Json(json!({ "success": true, "list_id": list, "task_id": task_id })))
}

async fn all_todo_tasks(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let tasks = state.graph.all_todo_tasks(&identity_id).await?;
    Ok(Json(json!({ "count": tasks.len(), "tasks": tasks })))
}

async fn groups(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let groups = state.graph.user_groups(&identity_id).await?;
    Ok(Json(json!({ "count": groups.len(), "groups": groups })))
}

async fn group_plans(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(group_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let plans = state.graph.group_plans(&identity_id, &group_id).await?;
    Ok(Json(json!({ "group_id": group_id, "count": plans.len(), "plans": plans })))
}

async fn plan_tasks(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(plan_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let tasks = state.graph.plan_tasks(&identity_id, &plan_id).await?;
    Ok(Json(json!({ "plan_id": plan_id, "count": tasks.len(), "tasks": tasks })))
}

async fn plan_buckets(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(plan_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let buckets = state.graph.plan_buckets(&identity_id, &plan_id).await?;
    Ok(Json(json!({ "plan_id": plan_id, "count": buckets.len(), "buckets": buckets })))
}

/// Planner task together with its details (description, checklist).
async fn planner_task(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity_id = identity(&state, &jar).await?;
    let (task, details) = tokio::try_join!(
        state.graph.planner_task(&identity_id, &task_id),
        state.graph.planner_task_details(&identity_id, &task_id),
    )?;
    Ok(Json(json!({ "task": task, "details": details })))
}
