use std::sync::Arc;

use taskflow_core::{new_id, now_rfc3339, ListResult, ServiceError};
use taskflow_sql::{Row, SQLConn, SQLStore, Value};

use crate::model::{Task, TaskEvent, TaskFilter, TaskPriority, TaskStatus};

/// SQL schema. One statement per entry — executed in order at startup.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tasks (
        id            TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        description   TEXT NOT NULL DEFAULT '',
        status        TEXT NOT NULL,
        priority      INTEGER NOT NULL,
        task_type     TEXT NOT NULL,
        input_params  TEXT NOT NULL,
        output_result TEXT NOT NULL,
        dependencies  TEXT NOT NULL,
        error_message TEXT NOT NULL DEFAULT '',
        retry_count   INTEGER NOT NULL DEFAULT 0,
        max_retries   INTEGER NOT NULL DEFAULT 0,
        created_by    TEXT NOT NULL DEFAULT '',
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL,
        started_at    TEXT,
        completed_at  TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_created_by ON tasks(created_by)",
    "CREATE TABLE IF NOT EXISTS task_events (
        id          TEXT PRIMARY KEY,
        task_id     TEXT NOT NULL,
        from_status TEXT NOT NULL,
        to_status   TEXT NOT NULL,
        message     TEXT NOT NULL DEFAULT '',
        operator    TEXT NOT NULL DEFAULT '',
        timestamp   TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_task_events_task_id ON task_events(task_id)",
    "CREATE TABLE IF NOT EXISTS task_deps (
        task_id    TEXT NOT NULL,
        depends_on TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_task_deps_depends_on ON task_deps(depends_on)",
];

const TASK_COLUMNS: &str = "id, name, description, status, priority, task_type, \
     input_params, output_result, dependencies, error_message, retry_count, \
     max_retries, created_by, created_at, updated_at, started_at, completed_at";

/// Outcome of a conditional status update, captured inside the
/// transaction body and mapped to an error afterwards.
enum CasOutcome {
    Applied,
    NotFound,
    Mismatch(String),
}

/// Persistent storage for tasks and their status-change audit trail,
/// backed by an embedded SQL store.
///
/// `input_params`, `output_result` and `dependencies` are stored as JSON
/// text; the encoding never crosses this API. The `task_deps` table
/// mirrors each task's dependency list so dependents of a finished task
/// can be looked up without scanning.
pub struct TaskStore {
    db: Arc<dyn SQLStore>,
}

impl TaskStore {
    /// Create a new TaskStore and initialise the schema.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        for stmt in SCHEMA {
            db.exec(stmt, &[])
                .map_err(|e| ServiceError::Storage(format!("task schema init: {e}")))?;
        }
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Insert a new task and mirror its dependency list into `task_deps`.
    /// Fails with `Conflict` on a duplicate id.
    pub fn create(&self, task: &Task) -> Result<(), ServiceError> {
        let params = task_params(task)?;
        let mut duplicate = false;

        self.db
            .with_transaction(&mut |tx| {
                let existing = tx.query(
                    "SELECT id FROM tasks WHERE id = ?1",
                    &[Value::Text(task.id.clone())],
                )?;
                if !existing.is_empty() {
                    duplicate = true;
                    return Ok(());
                }

                tx.exec(
                    &format!(
                        "INSERT INTO tasks ({TASK_COLUMNS}) VALUES \
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                    ),
                    &params,
                )?;

                for dep in &task.dependencies {
                    tx.exec(
                        "INSERT INTO task_deps (task_id, depends_on) VALUES (?1, ?2)",
                        &[Value::Text(task.id.clone()), Value::Text(dep.clone())],
                    )?;
                }
                Ok(())
            })
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        if duplicate {
            return Err(ServiceError::Conflict(format!(
                "task {} already exists",
                task.id
            )));
        }
        Ok(())
    }

    /// Get a task by id. Absent is not an error.
    pub fn get(&self, id: &str) -> Result<Option<Task>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                &[Value::Text(id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.first().map(row_to_task).transpose()
    }

    /// Full-record overwrite. `NotFound` if the task is absent.
    pub fn update(&self, task: &Task) -> Result<(), ServiceError> {
        let mut params = task_params(task)?;
        // Move id to the end for the WHERE clause.
        let id = params.remove(0);
        params.push(id);

        let affected = self
            .db
            .exec(
                "UPDATE tasks SET name = ?1, description = ?2, status = ?3, priority = ?4, \
                 task_type = ?5, input_params = ?6, output_result = ?7, dependencies = ?8, \
                 error_message = ?9, retry_count = ?10, max_retries = ?11, created_by = ?12, \
                 created_at = ?13, updated_at = ?14, started_at = ?15, completed_at = ?16 \
                 WHERE id = ?17",
                &params,
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        if affected == 0 {
            return Err(ServiceError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    /// Delete a task and its dependency rows. Idempotent. The event log
    /// is append-only and survives the delete.
    pub fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.db
            .with_transaction(&mut |tx| {
                tx.exec(
                    "DELETE FROM task_deps WHERE task_id = ?1",
                    &[Value::Text(id.to_string())],
                )?;
                tx.exec(
                    "DELETE FROM tasks WHERE id = ?1",
                    &[Value::Text(id.to_string())],
                )?;
                Ok(())
            })
            .map_err(|e| ServiceError::Storage(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // List / Query
    // -----------------------------------------------------------------------

    /// List tasks in a given status, oldest first.
    pub fn list_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 \
                     ORDER BY created_at ASC LIMIT ?2"
                ),
                &[
                    Value::Text(status.as_str().to_string()),
                    Value::Integer(limit as i64),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(row_to_task).collect()
    }

    /// Fetch PENDING tasks for the scheduler's poll, highest priority
    /// first, then oldest first. Priority is an ordering hint only.
    pub fn list_pending(&self, limit: usize) -> Result<Vec<Task>, ServiceError> {
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 \
                     ORDER BY priority DESC, created_at ASC LIMIT ?2"
                ),
                &[
                    Value::Text(TaskStatus::Pending.as_str().to_string()),
                    Value::Integer(limit as i64),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(row_to_task).collect()
    }

    /// List tasks with optional filters, newest first, plus the total
    /// count across all pages.
    pub fn list_by_filter(&self, filter: &TaskFilter) -> Result<ListResult<Task>, ServiceError> {
        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        let mut idx = 1;

        if let Some(status) = filter.status {
            where_clauses.push(format!("status = ?{idx}"));
            params.push(Value::Text(status.as_str().to_string()));
            idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("priority = ?{idx}"));
            params.push(Value::Integer(priority.as_i64()));
            idx += 1;
        }
        if let Some(ref created_by) = filter.created_by {
            where_clauses.push(format!("created_by = ?{idx}"));
            params.push(Value::Text(created_by.clone()));
            idx += 1;
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        // Count total
        let count_sql = format!("SELECT COUNT(*) as cnt FROM tasks {where_sql}");
        let count_rows = self
            .db
            .query(&count_sql, &params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        let total = count_rows.first().and_then(|r| r.get_i64("cnt")).unwrap_or(0) as usize;

        // Fetch page
        let select_sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {where_sql} \
             ORDER BY created_at DESC LIMIT ?{idx} OFFSET ?{}",
            idx + 1
        );
        let mut select_params = params;
        select_params.push(Value::Integer(filter.page_size as i64));
        select_params.push(Value::Integer((filter.page_index * filter.page_size) as i64));

        let rows = self
            .db
            .query(&select_sql, &select_params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let items = rows.iter().map(row_to_task).collect::<Result<Vec<_>, _>>()?;

        Ok(ListResult { items, total })
    }

    /// Case-insensitive substring search against name and description.
    pub fn search(
        &self,
        keyword: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>, ServiceError> {
        let pattern = format!("%{keyword}%");
        let rows = self
            .db
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE name LIKE ?1 OR description LIKE ?1 \
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
                ),
                &[
                    Value::Text(pattern),
                    Value::Integer(limit as i64),
                    Value::Integer(offset as i64),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(row_to_task).collect()
    }

    /// Count tasks, optionally restricted to one status.
    pub fn count(&self, status: Option<TaskStatus>) -> Result<usize, ServiceError> {
        let rows = match status {
            Some(s) => self.db.query(
                "SELECT COUNT(*) as cnt FROM tasks WHERE status = ?1",
                &[Value::Text(s.as_str().to_string())],
            ),
            None => self.db.query("SELECT COUNT(*) as cnt FROM tasks", &[]),
        }
        .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(rows.first().and_then(|r| r.get_i64("cnt")).unwrap_or(0) as usize)
    }

    /// Ids of tasks that declare `upstream_id` as a dependency.
    pub fn list_dependents(&self, upstream_id: &str) -> Result<Vec<String>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT task_id FROM task_deps WHERE depends_on = ?1",
                &[Value::Text(upstream_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .filter_map(|r| r.get_str("task_id").map(|s| s.to_string()))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Conditional status updates (CAS)
    // -----------------------------------------------------------------------

    /// Persist a caller-mutated task, conditional on the stored status
    /// still matching `expected_from`. Exactly one of two racing callers
    /// with the same pre-image wins; the loser gets `StatusMismatch`.
    pub fn update_status(&self, task: &Task, expected_from: TaskStatus) -> Result<(), ServiceError> {
        let mut outcome = CasOutcome::Applied;
        let params = cas_params(task, expected_from)?;

        self.db
            .with_transaction(&mut |tx| {
                let affected = tx.exec(CAS_UPDATE_SQL, &params)?;
                if affected == 0 {
                    outcome = cas_miss(tx, &task.id)?;
                }
                Ok(())
            })
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        cas_result(outcome, task, expected_from)
    }

    /// Same as [`update_status`](Self::update_status), plus an audit event
    /// appended in the same transaction. Either both land or neither does.
    pub fn update_status_with_event(
        &self,
        task: &Task,
        expected_from: TaskStatus,
        operator: &str,
        message: &str,
    ) -> Result<(), ServiceError> {
        let mut outcome = CasOutcome::Applied;
        let params = cas_params(task, expected_from)?;
        let event = TaskEvent {
            id: new_id(),
            task_id: task.id.clone(),
            from_status: expected_from,
            to_status: task.status,
            message: message.to_string(),
            operator: operator.to_string(),
            timestamp: now_rfc3339(),
        };

        self.db
            .with_transaction(&mut |tx| {
                let affected = tx.exec(CAS_UPDATE_SQL, &params)?;
                if affected == 0 {
                    outcome = cas_miss(tx, &task.id)?;
                    return Ok(());
                }
                insert_event(tx, &event)?;
                Ok(())
            })
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        cas_result(outcome, task, expected_from)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Append an audit event outside a status change (e.g. creation).
    pub fn add_event(&self, event: &TaskEvent) -> Result<(), ServiceError> {
        self.db
            .with_transaction(&mut |tx| insert_event(tx, event))
            .map_err(|e| ServiceError::Storage(e.to_string()))
    }

    /// All events for a task, ascending by timestamp.
    pub fn get_events_by_task_id(&self, task_id: &str) -> Result<Vec<TaskEvent>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT id, task_id, from_status, to_status, message, operator, timestamp \
                 FROM task_events WHERE task_id = ?1 ORDER BY timestamp ASC, rowid ASC",
                &[Value::Text(task_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(row_to_event).collect()
    }
}

// ---------------------------------------------------------------------------
// Row / parameter plumbing
// ---------------------------------------------------------------------------

const CAS_UPDATE_SQL: &str =
    "UPDATE tasks SET name = ?1, description = ?2, status = ?3, priority = ?4, \
     task_type = ?5, input_params = ?6, output_result = ?7, dependencies = ?8, \
     error_message = ?9, retry_count = ?10, max_retries = ?11, created_by = ?12, \
     created_at = ?13, updated_at = ?14, started_at = ?15, completed_at = ?16 \
     WHERE id = ?17 AND status = ?18";

/// Task columns in `TASK_COLUMNS` order, id first.
fn task_params(task: &Task) -> Result<Vec<Value>, ServiceError> {
    let input_params = serde_json::to_string(&task.input_params)
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    let output_result = serde_json::to_string(&task.output_result)
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    let dependencies = serde_json::to_string(&task.dependencies)
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    Ok(vec![
        Value::Text(task.id.clone()),
        Value::Text(task.name.clone()),
        Value::Text(task.description.clone()),
        Value::Text(task.status.as_str().to_string()),
        Value::Integer(task.priority.as_i64()),
        Value::Text(task.task_type.clone()),
        Value::Text(input_params),
        Value::Text(output_result),
        Value::Text(dependencies),
        Value::Text(task.error_message.clone()),
        Value::Integer(task.retry_count),
        Value::Integer(task.max_retries),
        Value::Text(task.created_by.clone()),
        Value::Text(task.created_at.clone()),
        Value::Text(task.updated_at.clone()),
        opt_text(&task.started_at),
        opt_text(&task.completed_at),
    ])
}

/// CAS parameters: the full record (id moved to the WHERE position) plus
/// the expected pre-image status.
fn cas_params(task: &Task, expected_from: TaskStatus) -> Result<Vec<Value>, ServiceError> {
    let mut params = task_params(task)?;
    let id = params.remove(0);
    params.push(id);
    params.push(Value::Text(expected_from.as_str().to_string()));
    Ok(params)
}

/// Inside a CAS transaction, classify a zero-row update.
fn cas_miss(tx: &dyn SQLConn, id: &str) -> Result<CasOutcome, taskflow_sql::SQLError> {
    let rows = tx.query(
        "SELECT status FROM tasks WHERE id = ?1",
        &[Value::Text(id.to_string())],
    )?;
    Ok(match rows.first().and_then(|r| r.get_str("status")) {
        None => CasOutcome::NotFound,
        Some(current) => CasOutcome::Mismatch(current.to_string()),
    })
}

fn cas_result(
    outcome: CasOutcome,
    task: &Task,
    expected_from: TaskStatus,
) -> Result<(), ServiceError> {
    match outcome {
        CasOutcome::Applied => Ok(()),
        CasOutcome::NotFound => Err(ServiceError::NotFound(format!("task {}", task.id))),
        CasOutcome::Mismatch(current) => Err(ServiceError::StatusMismatch(format!(
            "task {} is {current}, expected {expected_from}",
            task.id
        ))),
    }
}

fn insert_event(tx: &dyn SQLConn, event: &TaskEvent) -> Result<(), taskflow_sql::SQLError> {
    tx.exec(
        "INSERT INTO task_events (id, task_id, from_status, to_status, message, operator, timestamp) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        &[
            Value::Text(event.id.clone()),
            Value::Text(event.task_id.clone()),
            Value::Text(event.from_status.as_str().to_string()),
            Value::Text(event.to_status.as_str().to_string()),
            Value::Text(event.message.clone()),
            Value::Text(event.operator.clone()),
            Value::Text(event.timestamp.clone()),
        ],
    )?;
    Ok(())
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

fn row_to_task(row: &Row) -> Result<Task, ServiceError> {
    let get_text = |name: &str| -> Result<String, ServiceError> {
        row.get_str(name)
            .map(|s| s.to_string())
            .ok_or_else(|| ServiceError::Storage(format!("missing column {name}")))
    };

    let status_str = get_text("status")?;
    let status = TaskStatus::from_str(&status_str)
        .ok_or_else(|| ServiceError::Storage(format!("bad status {status_str}")))?;

    let priority_num = row
        .get_i64("priority")
        .ok_or_else(|| ServiceError::Storage("missing column priority".into()))?;
    let priority = TaskPriority::from_i64(priority_num)
        .ok_or_else(|| ServiceError::Storage(format!("bad priority {priority_num}")))?;

    let input_params = serde_json::from_str(&get_text("input_params")?)
        .map_err(|e| ServiceError::Storage(format!("bad input_params json: {e}")))?;
    let output_result = serde_json::from_str(&get_text("output_result")?)
        .map_err(|e| ServiceError::Storage(format!("bad output_result json: {e}")))?;
    let dependencies = serde_json::from_str(&get_text("dependencies")?)
        .map_err(|e| ServiceError::Storage(format!("bad dependencies json: {e}")))?;

    Ok(Task {
        id: get_text("id")?,
        name: get_text("name")?,
        description: get_text("description")?,
        status,
        priority,
        task_type: get_text("task_type")?,
        input_params,
        output_result,
        dependencies,
        error_message: get_text("error_message")?,
        retry_count: row.get_i64("retry_count").unwrap_or(0),
        max_retries: row.get_i64("max_retries").unwrap_or(0),
        created_by: get_text("created_by")?,
        created_at: get_text("created_at")?,
        updated_at: get_text("updated_at")?,
        started_at: row.get_str("started_at").map(|s| s.to_string()),
        completed_at: row.get_str("completed_at").map(|s| s.to_string()),
    })
}

fn row_to_event(row: &Row) -> Result<TaskEvent, ServiceError> {
    let get_text = |name: &str| -> Result<String, ServiceError> {
        row.get_str(name)
            .map(|s| s.to_string())
            .ok_or_else(|| ServiceError::Storage(format!("missing column {name}")))
    };

    let from_str = get_text("from_status")?;
    let to_str = get_text("to_status")?;

    Ok(TaskEvent {
        id: get_text("id")?,
        task_id: get_text("task_id")?,
        from_status: TaskStatus::from_str(&from_str)
            .ok_or_else(|| ServiceError::Storage(format!("bad status {from_str}")))?,
        to_status: TaskStatus::from_str(&to_str)
            .ok_or_else(|| ServiceError::Storage(format!("bad status {to_str}")))?,
        message: get_text("message")?,
        operator: get_text("operator")?,
        timestamp: get_text("timestamp")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use taskflow_sql::SqliteStore;

    fn test_store() -> TaskStore {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        TaskStore::new(db).unwrap()
    }

    fn make_task(id: &str, name: &str, status: TaskStatus) -> Task {
        let mut task = Task::new(
            name,
            "desc",
            TaskPriority::Normal,
            "test.type",
            HashMap::new(),
            vec![],
            3,
            "tester",
        );
        task.id = id.into();
        task.status = status;
        task
    }

    #[test]
    fn create_and_get_roundtrip() {
        let store = test_store();
        let mut task = make_task("t1", "Test Task", TaskStatus::Pending);
        task.input_params = HashMap::from([("key".to_string(), "value".to_string())]);
        task.dependencies = vec!["up-1".to_string()];
        store.create(&task).unwrap();

        let got = store.get("t1").unwrap().expect("task exists");
        assert_eq!(got.id, "t1");
        assert_eq!(got.name, "Test Task");
        assert_eq!(got.status, TaskStatus::Pending);
        assert_eq!(got.priority, TaskPriority::Normal);
        assert_eq!(got.input_params["key"], "value");
        assert_eq!(got.dependencies, vec!["up-1".to_string()]);
        assert!(got.started_at.is_none());
    }

    #[test]
    fn get_absent_is_none_not_error() {
        let store = test_store();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_create_conflicts() {
        let store = test_store();
        let task = make_task("t1", "Test", TaskStatus::Pending);
        store.create(&task).unwrap();

        let err = store.create(&task).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn update_overwrites_record() {
        let store = test_store();
        let mut task = make_task("t1", "Test", TaskStatus::Pending);
        store.create(&task).unwrap();

        task.description = "updated".into();
        task.output_result = HashMap::from([("out".to_string(), "42".to_string())]);
        store.update(&task).unwrap();

        let got = store.get("t1").unwrap().unwrap();
        assert_eq!(got.description, "updated");
        assert_eq!(got.output_result["out"], "42");
    }

    #[test]
    fn update_absent_is_not_found() {
        let store = test_store();
        let task = make_task("ghost", "Test", TaskStatus::Pending);
        let err = store.update(&task).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = test_store();
        let mut task = make_task("t1", "Test", TaskStatus::Pending);
        task.dependencies = vec!["up-1".to_string()];
        store.create(&task).unwrap();

        store.delete("t1").unwrap();
        assert!(store.get("t1").unwrap().is_none());
        assert!(store.list_dependents("up-1").unwrap().is_empty());

        // Second delete is a no-op.
        store.delete("t1").unwrap();
    }

    #[test]
    fn list_by_status_filters() {
        let store = test_store();
        store.create(&make_task("p1", "a", TaskStatus::Pending)).unwrap();
        store.create(&make_task("r1", "b", TaskStatus::Running)).unwrap();
        store.create(&make_task("s1", "c", TaskStatus::Succeeded)).unwrap();

        assert_eq!(store.list_by_status(TaskStatus::Pending, 10).unwrap().len(), 1);
        assert_eq!(store.list_by_status(TaskStatus::Running, 10).unwrap().len(), 1);
        assert_eq!(store.list_by_status(TaskStatus::Succeeded, 10).unwrap().len(), 1);
        assert_eq!(store.list_by_status(TaskStatus::Failed, 10).unwrap().len(), 0);
    }

    #[test]
    fn list_pending_orders_by_priority() {
        let store = test_store();
        let mut low = make_task("low", "low", TaskStatus::Pending);
        low.priority = TaskPriority::Low;
        let mut urgent = make_task("urgent", "urgent", TaskStatus::Pending);
        urgent.priority = TaskPriority::Urgent;
        store.create(&low).unwrap();
        store.create(&urgent).unwrap();
        store.create(&make_task("done", "done", TaskStatus::Succeeded)).unwrap();

        let pending = store.list_pending(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "urgent");
        assert_eq!(pending[1].id, "low");
    }

    #[test]
    fn list_pending_respects_limit() {
        let store = test_store();
        for i in 0..5 {
            store
                .create(&make_task(&format!("p{i}"), "p", TaskStatus::Pending))
                .unwrap();
        }
        assert_eq!(store.list_pending(3).unwrap().len(), 3);
    }

    #[test]
    fn list_by_filter_criteria_and_total() {
        let store = test_store();
        let mut t1 = make_task("f1", "one", TaskStatus::Pending);
        t1.priority = TaskPriority::High;
        t1.created_by = "user1".into();
        let mut t2 = make_task("f2", "two", TaskStatus::Pending);
        t2.created_by = "user1".into();
        let mut t3 = make_task("f3", "three", TaskStatus::Running);
        t3.created_by = "user2".into();
        store.create(&t1).unwrap();
        store.create(&t2).unwrap();
        store.create(&t3).unwrap();

        let result = store
            .list_by_filter(&TaskFilter {
                status: Some(TaskStatus::Pending),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.items.len(), 2);

        let result = store
            .list_by_filter(&TaskFilter {
                priority: Some(TaskPriority::High),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.items[0].id, "f1");

        let result = store
            .list_by_filter(&TaskFilter {
                created_by: Some("user1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.total, 2);

        // Pagination: page_size 1 returns one item but the full total.
        let result = store
            .list_by_filter(&TaskFilter {
                page_size: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.items.len(), 1);
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let store = test_store();
        store.create(&make_task("s1", "Go Build Task", TaskStatus::Pending)).unwrap();
        let mut t2 = make_task("s2", "Deploy", TaskStatus::Pending);
        t2.description = "go live checklist".into();
        store.create(&t2).unwrap();
        store.create(&make_task("s3", "Python Script", TaskStatus::Pending)).unwrap();

        let results = store.search("go", 10, 0).unwrap();
        assert_eq!(results.len(), 2);

        let none = store.search("xyz123", 10, 0).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn count_with_and_without_status() {
        let store = test_store();
        store.create(&make_task("c1", "a", TaskStatus::Pending)).unwrap();
        store.create(&make_task("c2", "b", TaskStatus::Pending)).unwrap();
        store.create(&make_task("c3", "c", TaskStatus::Running)).unwrap();

        assert_eq!(store.count(None).unwrap(), 3);
        assert_eq!(store.count(Some(TaskStatus::Pending)).unwrap(), 2);
        assert_eq!(store.count(Some(TaskStatus::Failed)).unwrap(), 0);
    }

    #[test]
    fn dependents_index_lookup() {
        let store = test_store();
        store.create(&make_task("up", "upstream", TaskStatus::Pending)).unwrap();
        let mut down1 = make_task("down1", "d1", TaskStatus::Pending);
        down1.dependencies = vec!["up".to_string()];
        let mut down2 = make_task("down2", "d2", TaskStatus::Pending);
        down2.dependencies = vec!["up".to_string(), "other".to_string()];
        store.create(&down1).unwrap();
        store.create(&down2).unwrap();

        let mut dependents = store.list_dependents("up").unwrap();
        dependents.sort();
        assert_eq!(dependents, vec!["down1".to_string(), "down2".to_string()]);
        assert!(store.list_dependents("down1").unwrap().is_empty());
    }

    #[test]
    fn cas_applies_once_then_mismatches() {
        let store = test_store();
        let task = make_task("t1", "Test", TaskStatus::Pending);
        store.create(&task).unwrap();

        let mut claimed = task.clone();
        claimed.status = TaskStatus::Running;
        store.update_status(&claimed, TaskStatus::Pending).unwrap();

        let got = store.get("t1").unwrap().unwrap();
        assert_eq!(got.status, TaskStatus::Running);

        // Second claim from the same pre-image loses.
        let err = store
            .update_status(&claimed, TaskStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, ServiceError::StatusMismatch(_)));
    }

    #[test]
    fn cas_on_absent_task_is_not_found() {
        let store = test_store();
        let mut task = make_task("ghost", "Test", TaskStatus::Pending);
        task.status = TaskStatus::Running;
        let err = store.update_status(&task, TaskStatus::Pending).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn cas_with_event_writes_both() {
        let store = test_store();
        let task = make_task("t1", "Test", TaskStatus::Pending);
        store.create(&task).unwrap();

        let mut claimed = task.clone();
        claimed.status = TaskStatus::Running;
        claimed.started_at = Some(taskflow_core::now_rfc3339());
        store
            .update_status_with_event(&claimed, TaskStatus::Pending, "scheduler", "task scheduled")
            .unwrap();

        let got = store.get("t1").unwrap().unwrap();
        assert_eq!(got.status, TaskStatus::Running);
        assert!(got.started_at.is_some());

        let events = store.get_events_by_task_id("t1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from_status, TaskStatus::Pending);
        assert_eq!(events[0].to_status, TaskStatus::Running);
        assert_eq!(events[0].operator, "scheduler");
        assert_eq!(events[0].message, "task scheduled");
    }

    #[test]
    fn cas_with_event_on_mismatch_writes_nothing() {
        let store = test_store();
        let task = make_task("t1", "Test", TaskStatus::Running);
        store.create(&task).unwrap();

        let mut next = task.clone();
        next.status = TaskStatus::Running;
        let err = store
            .update_status_with_event(&next, TaskStatus::Pending, "scheduler", "task scheduled")
            .unwrap_err();
        assert!(matches!(err, ServiceError::StatusMismatch(_)));

        // No event leaked out of the aborted update.
        assert!(store.get_events_by_task_id("t1").unwrap().is_empty());
    }

    #[test]
    fn events_ordered_by_timestamp() {
        let store = test_store();
        let task = make_task("t1", "Test", TaskStatus::Pending);
        store.create(&task).unwrap();

        for (i, (from, to)) in [
            (TaskStatus::Unspecified, TaskStatus::Pending),
            (TaskStatus::Pending, TaskStatus::Running),
            (TaskStatus::Running, TaskStatus::Succeeded),
        ]
        .iter()
        .enumerate()
        {
            store
                .add_event(&TaskEvent {
                    id: format!("e{i}"),
                    task_id: "t1".into(),
                    from_status: *from,
                    to_status: *to,
                    message: format!("step {i}"),
                    operator: "test".into(),
                    timestamp: format!("2026-01-01T00:00:0{i}+00:00"),
                })
                .unwrap();
        }

        let events = store.get_events_by_task_id("t1").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].to_status, TaskStatus::Pending);
        assert_eq!(events[1].to_status, TaskStatus::Running);
        assert_eq!(events[2].to_status, TaskStatus::Succeeded);
    }
}
