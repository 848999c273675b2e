use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskflow_core::now_rfc3339;

/// Default retry budget for newly created tasks.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
///
/// ```text
/// UNSPECIFIED → PENDING → RUNNING → SUCCEEDED
///                                 → FAILED → PENDING (retry)
///                                 → TIMEOUT
///                       → CANCELLED
/// ```
///
/// Terminal set: SUCCEEDED, CANCELLED, TIMEOUT. FAILED is not terminal —
/// it may go back to PENDING while retry budget remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Unspecified,
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "UNSPECIFIED" => Some(Self::Unspecified),
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            "TIMEOUT" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Whether the task has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Cancelled | Self::Timeout)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskPriority
// ---------------------------------------------------------------------------

/// Advisory scheduling priority — an ordering hint, never a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Unspecified,
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    /// Numeric value used for storage and ordering (higher = more urgent).
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Unspecified => 0,
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Urgent => 4,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Unspecified),
            1 => Some(Self::Low),
            2 => Some(Self::Normal),
            3 => Some(Self::High),
            4 => Some(Self::Urgent),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task — the core data model, maps 1:1 to SQL columns
// ---------------------------------------------------------------------------

/// A single unit of work tracked by the orchestration core.
///
/// The status field is only ever mutated through validated state-machine
/// transitions; the store's conditional update is the only persistence
/// path for it. `input_params` and `dependencies` are immutable after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    // --- definition ---
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: TaskPriority,

    // --- execution state ---
    pub status: TaskStatus,
    /// Input parameters for the handler (opaque to the core).
    #[serde(default)]
    pub input_params: HashMap<String, String>,
    /// Handler output, set on success.
    #[serde(default)]
    pub output_result: HashMap<String, String>,
    /// Error description from the last failure; cleared on success.
    #[serde(default)]
    pub error_message: String,

    // --- dependencies ---
    /// Upstream task ids that must reach SUCCEEDED before this task runs.
    #[serde(default)]
    pub dependencies: Vec<String>,

    // --- retry accounting ---
    #[serde(default)]
    pub retry_count: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,

    // --- audit ---
    #[serde(default)]
    pub created_by: String,

    // --- timestamps (RFC 3339) ---
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

fn default_max_retries() -> i64 {
    DEFAULT_MAX_RETRIES
}

impl Task {
    /// Build a new task in PENDING. The id is left empty — the service
    /// assigns it before persisting.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        description: &str,
        priority: TaskPriority,
        task_type: &str,
        input_params: HashMap<String, String>,
        dependencies: Vec<String>,
        max_retries: i64,
        created_by: &str,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            id: String::new(),
            name: name.to_string(),
            description: description.to_string(),
            task_type: task_type.to_string(),
            priority,
            status: TaskStatus::Pending,
            input_params,
            output_result: HashMap::new(),
            error_message: String::new(),
            dependencies,
            retry_count: 0,
            max_retries,
            created_by: created_by.to_string(),
            created_at: now.clone(),
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the task has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether an operator-initiated retry is allowed: the task must be
    /// FAILED with retry budget remaining.
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// TaskEvent — append-only audit record
// ---------------------------------------------------------------------------

/// One status change of one task. Replaying a task's events in timestamp
/// order reconstructs its full lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub id: String,
    pub task_id: String,
    pub from_status: TaskStatus,
    pub to_status: TaskStatus,
    pub message: String,
    pub operator: String,
    /// RFC 3339.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Query / patch types
// ---------------------------------------------------------------------------

/// Filter for task listing. All criteria are conjunctive.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    #[serde(default)]
    pub status: Option<TaskStatus>,

    #[serde(default)]
    pub priority: Option<TaskPriority>,

    #[serde(default)]
    pub created_by: Option<String>,

    /// Zero-based page index.
    #[serde(default)]
    pub page_index: usize,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    50
}

/// Body for task creation — the caller-facing shape of a new task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_priority")]
    pub priority: TaskPriority,

    #[serde(rename = "type")]
    pub task_type: String,

    #[serde(default)]
    pub input_params: HashMap<String, String>,

    /// Ids of tasks that must succeed before this one runs. Every id must
    /// exist at creation time.
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub max_retries: Option<i64>,

    #[serde(default)]
    pub created_by: String,
}

fn default_priority() -> TaskPriority {
    TaskPriority::Normal
}

/// Partial update applied by `TaskService::update_task`. A present status
/// is routed through the state machine; the other fields overwrite.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default)]
    pub status: Option<TaskStatus>,

    #[serde(default)]
    pub output_result: Option<HashMap<String, String>>,

    #[serde(default)]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for s in &[
            TaskStatus::Unspecified,
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::Timeout,
        ] {
            assert_eq!(TaskStatus::from_str(s.as_str()), Some(*s));
            let json = serde_json::to_string(s).unwrap();
            assert_eq!(json, format!("\"{}\"", s.as_str()));
            let back: TaskStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, *s);
        }
        assert_eq!(TaskStatus::from_str("NOPE"), None);
    }

    #[test]
    fn status_terminal_set() {
        assert!(!TaskStatus::Unspecified.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
    }

    #[test]
    fn priority_numeric_roundtrip() {
        for p in &[
            TaskPriority::Unspecified,
            TaskPriority::Low,
            TaskPriority::Normal,
            TaskPriority::High,
            TaskPriority::Urgent,
        ] {
            assert_eq!(TaskPriority::from_i64(p.as_i64()), Some(*p));
        }
        assert_eq!(TaskPriority::from_i64(99), None);
        assert!(TaskPriority::Urgent.as_i64() > TaskPriority::Low.as_i64());
    }

    #[test]
    fn new_task_defaults() {
        let task = Task::new(
            "Build",
            "build the thing",
            TaskPriority::High,
            "build",
            HashMap::from([("key".to_string(), "value".to_string())]),
            vec!["dep-1".to_string(), "dep-2".to_string()],
            3,
            "tester",
        );

        assert!(task.id.is_empty(), "id is assigned by the service");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.dependencies.len(), 2);
        assert_eq!(task.input_params["key"], "value");
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn can_retry_truth_table() {
        let cases = [
            (TaskStatus::Pending, 0, 3, false),
            (TaskStatus::Running, 0, 3, false),
            (TaskStatus::Succeeded, 0, 3, false),
            (TaskStatus::Failed, 0, 3, true),
            (TaskStatus::Failed, 1, 3, true),
            (TaskStatus::Failed, 2, 3, true),
            (TaskStatus::Failed, 3, 3, false),
            (TaskStatus::Failed, 4, 3, false),
            (TaskStatus::Cancelled, 0, 3, false),
            (TaskStatus::Timeout, 0, 3, false),
        ];

        for (status, retry_count, max_retries, expected) in cases {
            let mut task = Task::new(
                "t",
                "",
                TaskPriority::Normal,
                "test",
                HashMap::new(),
                vec![],
                max_retries,
                "test",
            );
            task.status = status;
            task.retry_count = retry_count;
            assert_eq!(
                task.can_retry(),
                expected,
                "status={status} retry_count={retry_count} max_retries={max_retries}"
            );
        }
    }

    #[test]
    fn task_json_roundtrip() {
        let mut task = Task::new(
            "Export",
            "export data",
            TaskPriority::Normal,
            "export",
            HashMap::new(),
            vec![],
            3,
            "user1",
        );
        task.id = "abc123".into();
        task.status = TaskStatus::Running;
        task.started_at = Some(now_rfc3339());

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "abc123");
        assert_eq!(back.status, TaskStatus::Running);
        assert!(back.started_at.is_some());
        // Absent optionals stay out of the JSON.
        assert!(!json.contains("completedAt"));
    }

    #[test]
    fn filter_deserialize_defaults() {
        let filter: TaskFilter = serde_json::from_str("{}").unwrap();
        assert!(filter.status.is_none());
        assert!(filter.priority.is_none());
        assert_eq!(filter.page_index, 0);
        assert_eq!(filter.page_size, 50);

        let filter: TaskFilter =
            serde_json::from_str(r#"{"status":"PENDING","pageSize":10}"#).unwrap();
        assert_eq!(filter.status, Some(TaskStatus::Pending));
        assert_eq!(filter.page_size, 10);
    }

    #[test]
    fn patch_deserialize_partial() {
        let patch: TaskPatch = serde_json::from_str(r#"{"errorMessage":"boom"}"#).unwrap();
        assert!(patch.status.is_none());
        assert!(patch.output_result.is_none());
        assert_eq!(patch.error_message.as_deref(), Some("boom"));
    }
}
