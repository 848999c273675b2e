use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use taskflow_core::{new_id, now_rfc3339, ListResult, ServiceError};

use crate::model::{
    CreateTaskRequest, Task, TaskEvent, TaskFilter, TaskPatch, TaskStatus, DEFAULT_MAX_RETRIES,
};
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerStatus};
use crate::state_machine::StateMachine;
use crate::store::TaskStore;

/// The façade the transport layer calls into.
///
/// Thin orchestration over the core: validates requests, assigns ids,
/// records the creation event and delegates scheduling to the
/// [`Scheduler`]. Errors propagate verbatim to the caller.
pub struct TaskService {
    store: Arc<TaskStore>,
    scheduler: Arc<Scheduler>,
    state_machine: StateMachine,
}

impl TaskService {
    pub fn new(store: Arc<TaskStore>, config: SchedulerConfig) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(Arc::clone(&store), config)),
            store,
            state_machine: StateMachine::new(),
        }
    }

    /// The scheduler, for handler registration at startup.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Validate, persist and (when dependency-free) immediately offer the
    /// new task to the scheduler. Returns the task as created, in PENDING.
    pub async fn create_task(&self, req: CreateTaskRequest) -> Result<Task, ServiceError> {
        if req.name.trim().is_empty() {
            return Err(ServiceError::Validation("task name is required".into()));
        }
        if req.task_type.trim().is_empty() {
            return Err(ServiceError::Validation("task type is required".into()));
        }
        let max_retries = req.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries < 0 {
            return Err(ServiceError::Validation("max_retries must be >= 0".into()));
        }

        // Every declared upstream must already exist.
        for dep_id in &req.dependencies {
            if self.store.get(dep_id)?.is_none() {
                return Err(ServiceError::DependencyMissing(format!(
                    "dependency task not found: {dep_id}"
                )));
            }
        }
        self.check_upstream_cycle(&req.dependencies)?;

        let mut task = Task::new(
            &req.name,
            &req.description,
            req.priority,
            &req.task_type,
            req.input_params,
            req.dependencies,
            max_retries,
            &req.created_by,
        );
        task.id = new_id();

        self.store.create(&task)?;
        self.record_event(
            &task,
            TaskStatus::Unspecified,
            TaskStatus::Pending,
            "task created",
            &req.created_by,
        );

        if task.dependencies.is_empty() {
            let _ = self.scheduler.try_schedule(&task.id).await;
        }

        Ok(task)
    }

    /// Reject creation when the declared upstream closure contains a
    /// cycle. Ids are server-assigned and dependency lists immutable, so a
    /// cycle cannot be built through this API — this guards stores seeded
    /// by other means, which would otherwise yield tasks that never become
    /// ready.
    fn check_upstream_cycle(&self, roots: &[String]) -> Result<(), ServiceError> {
        // Iterative DFS; 1 = on the current path, 2 = fully explored.
        let mut state: HashMap<String, u8> = HashMap::new();

        for root in roots {
            if state.get(root) == Some(&2) {
                continue;
            }
            let mut stack: Vec<(String, bool)> = vec![(root.clone(), false)];

            while let Some((id, children_done)) = stack.pop() {
                if children_done {
                    state.insert(id, 2);
                    continue;
                }
                if state.get(&id).is_some() {
                    continue;
                }
                state.insert(id.clone(), 1);
                stack.push((id.clone(), true));

                let task = self.store.get(&id)?.ok_or_else(|| {
                    ServiceError::DependencyMissing(format!("dependency task not found: {id}"))
                })?;

                for dep_id in task.dependencies {
                    match state.get(&dep_id) {
                        Some(1) => {
                            return Err(ServiceError::DependencyCycle(format!(
                                "dependency cycle through task {dep_id}"
                            )))
                        }
                        Some(_) => {}
                        None => stack.push((dep_id, false)),
                    }
                }
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, ServiceError> {
        self.store.get(id)
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<ListResult<Task>, ServiceError> {
        self.store.list_by_filter(filter)
    }

    pub fn search_tasks(
        &self,
        keyword: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>, ServiceError> {
        self.store.search(keyword, limit, offset)
    }

    pub fn get_task_events(&self, task_id: &str) -> Result<Vec<TaskEvent>, ServiceError> {
        self.store.get_events_by_task_id(task_id)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Apply a partial update. A status change is routed through the state
    /// machine and lands with its audit event; other fields overwrite in
    /// place.
    pub async fn update_task(
        &self,
        id: &str,
        patch: TaskPatch,
        operator: &str,
    ) -> Result<Task, ServiceError> {
        let mut task = self
            .store
            .get(id)?
            .ok_or_else(|| ServiceError::NotFound(format!("task not found: {id}")))?;

        if let Some(result) = patch.output_result {
            task.output_result = result;
        }
        if let Some(error_message) = patch.error_message {
            task.error_message = error_message;
        }

        match patch.status {
            Some(new_status) => {
                let from = task.status;
                self.state_machine.transition(&mut task, new_status)?;
                self.store
                    .update_status_with_event(&task, from, operator, "status updated")?;

                if new_status == TaskStatus::Succeeded {
                    self.scheduler.schedule_dependents(&task.id).await;
                }
            }
            None => {
                task.updated_at = now_rfc3339();
                self.store.update(&task)?;
            }
        }

        Ok(task)
    }

    /// Cancel a task. Rejected once the task is terminal; a FAILED task
    /// may still be cancelled.
    ///
    /// A cancel racing the scheduler's claim is retried against the new
    /// status: if scheduling won, the cancel lands as RUNNING → CANCELLED.
    pub async fn cancel_task(&self, id: &str, operator: &str) -> Result<(), ServiceError> {
        for _ in 0..2 {
            let mut task = self
                .store
                .get(id)?
                .ok_or_else(|| ServiceError::NotFound(format!("task not found: {id}")))?;

            if task.is_terminal() {
                return Err(ServiceError::Terminal(format!(
                    "cannot cancel task {id} in terminal status {}",
                    task.status
                )));
            }

            let from = task.status;
            self.state_machine.transition(&mut task, TaskStatus::Cancelled)?;
            match self
                .store
                .update_status_with_event(&task, from, operator, "task cancelled")
            {
                Err(ServiceError::StatusMismatch(_)) => continue,
                result => return result,
            }
        }

        Err(ServiceError::StatusMismatch(format!(
            "task {id} kept changing status during cancel"
        )))
    }

    /// Put a FAILED task with remaining retry budget back in PENDING.
    pub async fn retry_task(&self, id: &str, operator: &str) -> Result<(), ServiceError> {
        let mut task = self
            .store
            .get(id)?
            .ok_or_else(|| ServiceError::NotFound(format!("task not found: {id}")))?;

        if !task.can_retry() {
            return Err(ServiceError::CannotRetry(format!(
                "task {id} cannot be retried (status {}, attempt {}/{})",
                task.status, task.retry_count, task.max_retries
            )));
        }

        let retry_msg = format!("retry attempt {}", task.retry_count + 1);
        let from = task.status;
        self.state_machine.transition(&mut task, TaskStatus::Pending)?;
        self.store
            .update_status_with_event(&task, from, operator, &retry_msg)
    }

    /// Remove a task. Admin affordance — tasks are never deleted in
    /// normal operation. The event log is retained.
    pub fn delete_task(&self, id: &str) -> Result<(), ServiceError> {
        self.store.delete(id)
    }

    // -----------------------------------------------------------------------
    // Scheduler control
    // -----------------------------------------------------------------------

    pub async fn start_scheduler(&self, parent: &CancellationToken) {
        self.scheduler.start(parent).await;
    }

    pub async fn stop_scheduler(&self) {
        self.scheduler.stop().await;
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Append an audit event outside the CAS path (creation only). A
    /// failed append is logged, not surfaced — the task itself is already
    /// durable.
    fn record_event(
        &self,
        task: &Task,
        from_status: TaskStatus,
        to_status: TaskStatus,
        message: &str,
        operator: &str,
    ) {
        let event = TaskEvent {
            id: new_id(),
            task_id: task.id.clone(),
            from_status,
            to_status,
            message: message.to_string(),
            operator: operator.to_string(),
            timestamp: now_rfc3339(),
        };
        if let Err(e) = self.store.add_event(&event) {
            warn!("failed to record event for task {}: {e}", task.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
