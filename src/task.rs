//! Background task queue collaborator.
//!
//! Schemas only hold a queue and drive its lifecycle (`initialize` on schema initialisation,
//! `destroy` on close). Import/export workers use the rest of the interface.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Import,
    Export,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_code: String,
    pub user_code: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Node that picked the task up.
    pub node_id: Option<String>,
    /// File handed to (or produced by) the worker, relative to the queue's base path.
    pub data_path: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskInfo {
    pub fn new(task_code: &str, user_code: &str, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            task_code: task_code.to_string(),
            user_code: user_code.to_string(),
            task_type,
            status: TaskStatus::Pending,
            node_id: None,
            data_path: None,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Finished | TaskStatus::Failed)
    }
}

pub trait TaskQueue: Send + Sync {
    fn initialize(&self, base_path: &Path) -> Result<()>;

    fn destroy(&self) -> Result<()>;

    fn add_task(&self, task: TaskInfo) -> Result<()>;

    /// Claim a pending task for `node_id`. Returns `false` when another node got it first.
    fn process_task(&self, task_code: &str, node_id: &str) -> Result<bool>;

    /// Remove finished tasks last updated before `expire_time`. Returns how many were removed.
    fn drop_expired(&self, expire_time: DateTime<Utc>) -> Result<usize>;

    fn drop_task(&self, user_code: &str, task_code: &str) -> Result<bool>;

    fn next_task(&self, node_id: &str) -> Result<Option<TaskInfo>>;

    fn finish_task(&self, task_code: &str, has_error: bool, message: &str) -> Result<()>;

    /// One page (1-based) of a user's tasks, newest first.
    fn task_list(&self, user_code: &str, page: u64, page_size: u64) -> Result<Vec<TaskInfo>>;

    fn task_info(&self, user_code: &str, task_code: &str) -> Result<Option<TaskInfo>>;
}
