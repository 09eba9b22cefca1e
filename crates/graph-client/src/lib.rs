//! Authenticated Microsoft Graph client
//!
//! Executes Graph calls on behalf of a stored identity: bearer injection,
//! a single refresh-and-retry on 401, and status classification. Typed
//! wrappers for the profile, To-Do, and Planner resources sit on top.

pub mod classify;
pub mod error;
pub mod executor;
pub mod resources;

pub use classify::{classify_status, provider_message};
pub use error::{Error, Result};
pub use executor::{DEFAULT_TIMEOUT, GraphClient};
pub use resources::{
    Group, ListedTask, NewTodoTask, Plan, PlannerBucket, PlannerTask, PlannerTaskDetails, TodoList,
    TodoTask, TodoTaskUpdate,
};
