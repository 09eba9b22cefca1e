//! Typed Microsoft Graph resources: profile, To-Do, and Planner
//!
//! Thin wrappers over `GraphClient::request` that build the resource path
//! and decode the collection envelope (`{"value": [...]}`).

use graph_auth::UserProfile;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use crate::error::{Error, Result};
use crate::executor::GraphClient;

/// List names treated as the user's default To-Do list, in preference order.
const DEFAULT_LIST_NAMES: &[&str] = &["Tasks", "My Tasks", "Task"];

/// `@odata.type` of directory objects that are groups (as opposed to roles).
const GROUP_ODATA_TYPE: &str = "#microsoft.graph.group";

const IMPORTANCE_LEVELS: &[&str] = &["low", "normal", "high"];

const TASK_STATUSES: &[&str] = &[
    "notStarted",
    "inProgress",
    "completed",
    "waitingOnOthers",
    "deferred",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoList {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub wellknown_list_name: Option<String>,
    #[serde(default)]
    pub is_owner: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeTimeZone {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoTask {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// `notStarted`, `inProgress`, `completed`, ...
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_importance")]
    pub importance: String,
    #[serde(default)]
    pub body: Option<ItemBody>,
    #[serde(default)]
    pub due_date_time: Option<DateTimeTimeZone>,
    #[serde(default)]
    pub created_date_time: Option<String>,
}

fn default_status() -> String {
    "notStarted".into()
}

fn default_importance() -> String {
    "normal".into()
}

impl TodoTask {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

/// Input for creating a To-Do task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTodoTask {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    /// ISO date or date-time, interpreted as UTC.
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub importance: Option<String>,
}

impl NewTodoTask {
    /// Graph request body. Unknown importance levels fall back to `normal`;
    /// blank body and due date are left out.
    pub fn to_graph(&self) -> Result<Value> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("task title is required".into()));
        }

        let importance = self
            .importance
            .as_deref()
            .filter(|i| IMPORTANCE_LEVELS.contains(i))
            .unwrap_or("normal");
        let mut task = json!({"title": title, "importance": importance});

        if let Some(body) = self.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            task["body"] = json!({"content": body, "contentType": "text"});
        }
        if let Some(due) = self.due_date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            task["dueDateTime"] = json!({"dateTime": normalize_due_date(due)?, "timeZone": "UTC"});
        }
        Ok(task)
    }
}

/// Partial update of a To-Do task. Blank fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TodoTaskUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TodoTaskUpdate {
    /// Graph PATCH body. Unknown importance or status values are rejected,
    /// as is an update that changes nothing.
    pub fn to_graph(&self) -> Result<Value> {
        let present = |field: &Option<String>| {
            field
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };

        let mut patch = serde_json::Map::new();
        if let Some(title) = present(&self.title) {
            patch.insert("title".into(), json!(title));
        }
        if let Some(body) = present(&self.body) {
            patch.insert("body".into(), json!({"content": body, "contentType": "text"}));
        }
        if let Some(due) = present(&self.due_date) {
            patch.insert(
                "dueDateTime".into(),
                json!({"dateTime": normalize_due_date(&due)?, "timeZone": "UTC"}),
            );
        }
        if let Some(importance) = present(&self.importance) {
            if !IMPORTANCE_LEVELS.contains(&importance.as_str()) {
                return Err(Error::InvalidInput(format!("unknown importance {importance:?}")));
            }
            patch.insert("importance".into(), json!(importance));
        }
        if let Some(status) = present(&self.status) {
            if !TASK_STATUSES.contains(&status.as_str()) {
                return Err(Error::InvalidInput(format!("unknown status {status:?}")));
            }
            patch.insert("status".into(), json!(status));
        }

        if patch.is_empty() {
            return Err(Error::InvalidInput("no update fields provided".into()));
        }
        Ok(Value::Object(patch))
    }
}

/// A task from a cross-list listing, tagged with the list it lives in.
#[derive(Debug, Clone, Serialize)]
pub struct ListedTask {
    pub list_id: String,
    pub list_name: String,
    #[serde(flatten)]
    pub task: TodoTask,
}

/// Accept `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM[:SS[.fff]]`; a bare date becomes
/// midnight. Output is always `YYYY-MM-DDTHH:MM:SS`.
fn normalize_due_date(due: &str) -> Result<String> {
    let invalid = |e: &dyn std::fmt::Display| {
        Error::InvalidInput(format!("invalid due date {due:?}, expected YYYY-MM-DD: {e}"))
    };

    let parsed = if due.contains('T') {
        PrimitiveDateTime::parse(
            due,
            format_description!(
                "[year]-[month]-[day]T[hour]:[minute][optional [:[second][optional [.[subsecond]]]]]"
            ),
        )
    } else {
        Date::parse(due, format_description!("[year]-[month]-[day]")).map(Date::midnight)
    }
    .map_err(|e| invalid(&e))?;

    parsed
        .format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"))
        .map_err(|e| invalid(&e))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub created_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerTask {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub percent_complete: u8,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub bucket_id: Option<String>,
    /// 0 (urgent) to 10 (low); Graph defaults to 5.
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub start_date_time: Option<String>,
    #[serde(default)]
    pub due_date_time: Option<String>,
    #[serde(default)]
    pub completed_date_time: Option<String>,
    #[serde(default)]
    pub created_date_time: Option<String>,
    #[serde(default)]
    pub checklist_item_count: Option<u32>,
    #[serde(default)]
    pub active_checklist_item_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerBucket {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub order_hint: Option<String>,
}

/// `planner/tasks/{id}/details`. Checklist and references are keyed maps
/// whose keys are caller-chosen ids, so they stay as raw JSON.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerTaskDetails {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub preview_type: Option<String>,
    #[serde(default)]
    pub checklist: Value,
    #[serde(default)]
    pub references: Value,
}

fn collection<T: DeserializeOwned>(envelope: Value) -> Result<Vec<T>> {
    match envelope.get("value") {
        Some(items) => serde_json::from_value(items.clone())
            .map_err(|e| Error::Decode(format!("invalid collection: {e}"))),
        None => Ok(Vec::new()),
    }
}

fn item<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Decode(format!("invalid item: {e}")))
}

impl GraphClient {
    async fn get(&self, identity_id: &str, segments: &[&str]) -> Result<Value> {
        let url = self.resource_url(segments)?;
        self.request(Method::GET, url, identity_id, None).await
    }

    /// Signed-in user's profile.
    pub async fn me(&self, identity_id: &str) -> Result<UserProfile> {
        let raw = self.get(identity_id, &["me"]).await?;
        UserProfile::from_graph(raw).ok_or_else(|| Error::Decode("user id not found in profile".into()))
    }

    pub async fn todo_lists(&self, identity_id: &str) -> Result<Vec<TodoList>> {
        collection(self.get(identity_id, &["me", "todo", "lists"]).await?)
    }

    pub async fn todo_tasks(&self, identity_id: &str, list_id: &str) -> Result<Vec<TodoTask>> {
        collection(
            self.get(identity_id, &["me", "todo", "lists", list_id, "tasks"])
                .await?,
        )
    }

    pub async fn create_todo_task(
        &self,
        identity_id: &str,
        list_id: &str,
        task: &NewTodoTask,
    ) -> Result<TodoTask> {
        let body = task.to_graph()?;
        let url = self.resource_url(&["me", "todo", "lists", list_id, "tasks"])?;
        item(self.request(Method::POST, url, identity_id, Some(&body)).await?)
    }

    pub async fn complete_todo_task(
        &self,
        identity_id: &str,
        list_id: &str,
        task_id: &str,
    ) -> Result<TodoTask> {
        let body = json!({"status": "completed"});
        let url = self.resource_url(&["me", "todo", "lists", list_id, "tasks", task_id])?;
        item(self.request(Method::PATCH, url, identity_id, Some(&body)).await?)
    }

    pub async fn update_todo_task(
        &self,
        identity_id: &str,
        list_id: &str,
        task_id: &str,
        update: &TodoTaskUpdate,
    ) -> Result<TodoTask> {
        let body = update.to_graph()?;
        let url = self.resource_url(&["me", "todo", "lists", list_id, "tasks", task_id])?;
        item(self.request(Method::PATCH, url, identity_id, Some(&body)).await?)
    }

    pub async fn delete_todo_task(&self, identity_id: &str, list_id: &str, task_id: &str) -> Result<()> {
        let url = self.resource_url(&["me", "todo", "lists", list_id, "tasks", task_id])?;
        self.request(Method::DELETE, url, identity_id, None).await?;
        Ok(())
    }

    /// Every task in every list, one list at a time.
    pub async fn all_todo_tasks(&self, identity_id: &str) -> Result<Vec<ListedTask>> {
        let mut all = Vec::new();
        for list in self.todo_lists(identity_id).await? {
            let tasks = self.todo_tasks(identity_id, &list.id).await?;
            all.extend(tasks.into_iter().map(|task| ListedTask {
                list_id: list.id.clone(),
                list_name: list.display_name.clone(),
                task,
            }));
        }
        Ok(all)
    }

    /// Id of the list named "Tasks", "My Tasks" or "Task" (in that order),
    /// else the first list. `NotFound` when the user has no lists.
    pub async fn find_default_list_id(&self, identity_id: &str) -> Result<String> {
        let lists = self.todo_lists(identity_id).await?;
        DEFAULT_LIST_NAMES
            .iter()
            .find_map(|name| lists.iter().find(|l| l.display_name == *name))
            .or_else(|| lists.first())
            .map(|l| l.id.clone())
            .ok_or_else(|| Error::NotFound("user has no To-Do lists".into()))
    }

    /// Groups the user is a member of. Directory roles and other object
    /// types in `memberOf` are dropped.
    pub async fn user_groups(&self, identity_id: &str) -> Result<Vec<Group>> {
        let envelope = self.get(identity_id, &["me", "memberOf"]).await?;
        let groups = envelope
            .get("value")
            .and_then(Value::as_array)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|o| o.get("@odata.type").and_then(Value::as_str) == Some(GROUP_ODATA_TYPE))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        groups.into_iter().map(item::<Group>).collect()
    }

    pub async fn group_plans(&self, identity_id: &str, group_id: &str) -> Result<Vec<Plan>> {
        collection(
            self.get(identity_id, &["groups", group_id, "planner", "plans"])
                .await?,
        )
    }

    pub async fn plan_tasks(&self, identity_id: &str, plan_id: &str) -> Result<Vec<PlannerTask>> {
        collection(
            self.get(identity_id, &["planner", "plans", plan_id, "tasks"])
                .await?,
        )
    }

    pub async fn plan_buckets(&self, identity_id: &str, plan_id: &str) -> Result<Vec<PlannerBucket>> {
        collection(
            self.get(identity_id, &["planner", "plans", plan_id, "buckets"])
                .await?,
        )
    }

    pub async fn planner_task(&self, identity_id: &str, task_id: &str) -> Result<PlannerTask> {
        item(self.get(identity_id, &["planner", "tasks", task_id]).await?)
    }

    pub async fn planner_task_details(
        &self,
        identity_id: &str,
        task_id: &str,
    ) -> Result<PlannerTaskDetails> {
        item(
            self.get(identity_id, &["planner", "tasks", task_id, "details"])
                .await?,
        )
    }
}
