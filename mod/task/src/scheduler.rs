use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskflow_core::{parse_rfc3339, ServiceError};

use crate::model::{Task, TaskStatus};
use crate::resolver::DependencyResolver;
use crate::state_machine::StateMachine;
use crate::store::TaskStore;
use crate::worker_pool::WorkerPool;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of parallel workers.
    pub worker_count: usize,
    /// How often the poll loop scans for PENDING tasks.
    pub polling_interval: Duration,
    /// Max PENDING tasks pulled per poll tick.
    pub max_pending: usize,
    /// How often the timeout sweeper scans RUNNING tasks.
    pub sweep_interval: Duration,
    /// RUNNING tasks older than this are moved to TIMEOUT.
    /// Zero disables the sweeper.
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            polling_interval: Duration::from_secs(5),
            max_pending: 100,
            sweep_interval: Duration::from_secs(10),
            task_timeout: Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// The async function signature a task handler must satisfy.
///
/// Receives the full task (for reading `input_params`) and returns the
/// output map on success. A handler error is routed to the retry-or-FAILED
/// path; it never escapes the scheduler.
pub type TaskHandler = Arc<
    dyn Fn(Task) -> Pin<Box<dyn Future<Output = Result<HashMap<String, String>, ServiceError>> + Send>>
        + Send
        + Sync,
>;

/// Fallback handler for task types with no registered handler: a short
/// simulated delay, then a fixed success payload.
async fn default_handler(_task: Task) -> Result<HashMap<String, String>, ServiceError> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(HashMap::from([
        ("status".to_string(), "completed".to_string()),
        ("output".to_string(), "task executed successfully".to_string()),
    ]))
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Point-in-time scheduler state. Counters are loosely consistent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub pending_count: usize,
    pub running_count: usize,
    pub scheduled_count: usize,
    pub finished_count: usize,
    pub worker_count: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    pending: usize,
    running: usize,
    scheduled: usize,
    finished: usize,
}

/// Per-run state created by `start` and torn down by `stop`.
#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    pool: Option<Arc<WorkerPool>>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives PENDING tasks through claim, execution and completion.
///
/// One background loop polls the store for PENDING tasks and feeds them
/// through [`try_schedule`](Self::try_schedule); a bounded [`WorkerPool`]
/// executes claimed tasks. All status flips go through the store's
/// conditional update, so concurrent schedulers sharing one store never
/// double-execute a task.
pub struct Scheduler {
    store: Arc<TaskStore>,
    state_machine: StateMachine,
    resolver: DependencyResolver,
    config: SchedulerConfig,
    /// Registered handlers keyed by task type.
    handlers: Mutex<HashMap<String, TaskHandler>>,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    /// Dedicated lock, separate from `lifecycle` — counter updates on the
    /// hot path must not contend with start/stop.
    counters: std::sync::Mutex<Counters>,
}

impl Scheduler {
    pub fn new(store: Arc<TaskStore>, config: SchedulerConfig) -> Self {
        Self {
            resolver: DependencyResolver::new(Arc::clone(&store)),
            store,
            state_machine: StateMachine::new(),
            config,
            handlers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::default()),
            counters: std::sync::Mutex::new(Counters::default()),
        }
    }

    /// Register a handler for a task type. Types without a registered
    /// handler fall back to the built-in default handler.
    pub async fn register_handler<F, Fut>(&self, task_type: &str, handler: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<String, String>, ServiceError>> + Send + 'static,
    {
        let handler: TaskHandler = Arc::new(move |task| Box::pin(handler(task)));
        self.handlers.lock().await.insert(task_type.to_string(), handler);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the poll loop and worker pool. Idempotent — a second call on
    /// a running scheduler is a no-op. The scheduler stops when `parent`
    /// is cancelled or [`stop`](Self::stop) is called.
    pub async fn start(self: &Arc<Self>, parent: &CancellationToken) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return;
        }

        let cancel = parent.child_token();
        let pool = Arc::new(WorkerPool::new(self.config.worker_count));

        let weak = Arc::downgrade(self);
        pool.run(move |task_id| {
            let weak = weak.clone();
            async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.execute_task(&task_id).await;
                }
            }
        });

        lifecycle.cancel = Some(cancel.clone());
        lifecycle.pool = Some(pool);
        self.running.store(true, Ordering::SeqCst);
        drop(lifecycle);

        tokio::spawn(Arc::clone(self).poll_loop(cancel.clone()));
        if !self.config.task_timeout.is_zero() {
            tokio::spawn(Arc::clone(self).sweep_loop(cancel));
        }

        info!("scheduler started");
    }

    /// Cancel the poll loop and drain the worker pool. In-flight handlers
    /// finish; queued tasks still execute before the workers exit.
    pub async fn stop(&self) {
        let (cancel, pool) = {
            let mut lifecycle = self.lifecycle.lock().await;
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            self.running.store(false, Ordering::SeqCst);
            (lifecycle.cancel.take(), lifecycle.pool.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(pool) = pool {
            pool.stop().await;
        }

        info!("scheduler stopped");
    }

    /// Loosely consistent snapshot of the scheduler state.
    pub fn status(&self) -> SchedulerStatus {
        let counters = *self.counters.lock().expect("counters lock poisoned");
        SchedulerStatus {
            is_running: self.running.load(Ordering::SeqCst),
            pending_count: counters.pending,
            running_count: counters.running,
            scheduled_count: counters.scheduled,
            finished_count: counters.finished,
            worker_count: self.config.worker_count,
        }
    }

    // -----------------------------------------------------------------------
    // Poll loop
    // -----------------------------------------------------------------------

    async fn poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.config.polling_interval, "task poll loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("task poll loop stopped");
                    break;
                }
                _ = tokio::time::sleep(self.config.polling_interval) => {
                    self.poll_pending_tasks(&cancel).await;
                }
            }
        }
    }

    async fn poll_pending_tasks(&self, cancel: &CancellationToken) {
        let tasks = match self.store.list_pending(self.config.max_pending) {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("failed to list pending tasks: {e}");
                return;
            }
        };

        let count = tasks.len();
        for task in tasks {
            if cancel.is_cancelled() {
                return;
            }
            let _ = self.try_schedule(&task.id).await;
        }

        self.counters.lock().expect("counters lock poisoned").pending = count;
    }

    // -----------------------------------------------------------------------
    // Claim path
    // -----------------------------------------------------------------------

    /// Try to claim and enqueue one PENDING task.
    ///
    /// Returns `Ok(true)` when this call won the claim and handed the task
    /// to the worker pool. Losing the claim race, unmet dependencies and a
    /// stopped scheduler all return `Ok(false)`.
    pub async fn try_schedule(&self, task_id: &str) -> Result<bool, ServiceError> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(false);
        }

        // Dependency gate.
        match self.resolver.check(task_id) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) => {
                warn!("dependency check failed for task {task_id}: {e}");
                return Err(e);
            }
        }

        // Reload — the task may have changed since it was listed.
        let Some(mut task) = self.store.get(task_id)? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }

        // Claim: PENDING → RUNNING, atomically.
        self.state_machine.transition(&mut task, TaskStatus::Running)?;
        match self
            .store
            .update_status_with_event(&task, TaskStatus::Pending, "scheduler", "task scheduled")
        {
            Ok(()) => {}
            Err(ServiceError::StatusMismatch(_)) => {
                // Another claimant won.
                debug!("task {task_id} already claimed");
                return Ok(false);
            }
            Err(e) => {
                warn!("failed to claim task {task_id}: {e}");
                return Err(e);
            }
        }

        let pool = self.lifecycle.lock().await.pool.clone();
        let submitted = match pool {
            Some(pool) => pool.submit(task_id),
            None => false,
        };

        if submitted {
            self.counters.lock().expect("counters lock poisoned").scheduled += 1;
            info!("task {task_id} scheduled");
            return Ok(true);
        }

        // The claim is committed but the queue is full (or the pool is
        // gone). Roll back to PENDING so the task stays live for a later
        // tick. This does not consume retry budget.
        self.state_machine.transition(&mut task, TaskStatus::Pending)?;
        match self
            .store
            .update_status_with_event(&task, TaskStatus::Running, "scheduler", "resubmitted")
        {
            Ok(()) => warn!("worker pool full, task {task_id} returned to PENDING"),
            Err(e) => error!("failed to roll back task {task_id} after full queue: {e}"),
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Execution path (worker handler)
    // -----------------------------------------------------------------------

    async fn execute_task(&self, task_id: &str) {
        self.counters.lock().expect("counters lock poisoned").running += 1;
        self.execute_task_inner(task_id).await;
        self.counters.lock().expect("counters lock poisoned").running -= 1;
    }

    async fn execute_task_inner(&self, task_id: &str) {
        debug!("executing task {task_id}");

        let task = match self.store.get(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!("task {task_id} vanished before execution");
                return;
            }
            Err(e) => {
                error!("failed to load task {task_id}: {e}");
                return;
            }
        };

        // Cancelled after claim but before execution: the cancel path
        // already recorded the event, just abandon.
        if task.status == TaskStatus::Cancelled {
            debug!("task {task_id} was cancelled, abandoning");
            return;
        }

        let handler = self.handlers.lock().await.get(&task.task_type).cloned();
        let result = match handler {
            Some(handler) => handler(task.clone()).await,
            None => default_handler(task.clone()).await,
        };

        match result {
            Ok(output) => self.handle_success(task, output).await,
            Err(e) => self.handle_failure(task_id, e).await,
        }
    }

    async fn handle_success(&self, mut task: Task, output: HashMap<String, String>) {
        let task_id = task.id.clone();

        task.output_result = output;
        if let Err(e) = self.state_machine.transition(&mut task, TaskStatus::Succeeded) {
            error!("task {task_id}: {e}");
            return;
        }

        match self
            .store
            .update_status_with_event(&task, TaskStatus::Running, "scheduler", "task completed")
        {
            Ok(()) => {}
            Err(ServiceError::StatusMismatch(e)) => {
                // Cancel (or the sweeper) got there first; discard.
                debug!("task {task_id} completion discarded: {e}");
                return;
            }
            Err(e) => {
                error!("failed to record success for task {task_id}: {e}");
                return;
            }
        }

        self.counters.lock().expect("counters lock poisoned").finished += 1;
        info!("task {task_id} succeeded");

        self.schedule_dependents(&task_id).await;
    }

    async fn handle_failure(&self, task_id: &str, handler_err: ServiceError) {
        let task = match self.store.get(task_id) {
            Ok(Some(task)) => task,
            _ => {
                error!("failed to reload task {task_id} after handler failure");
                return;
            }
        };

        let result = if task.retry_count < task.max_retries {
            self.requeue_for_retry(task, &handler_err)
        } else {
            self.mark_failed(task, &handler_err)
        };

        match result {
            Ok(()) => {}
            Err(ServiceError::StatusMismatch(e)) => {
                debug!("task {task_id} failure handling discarded: {e}")
            }
            Err(e) => error!("failed to update task {task_id} after failure: {e}"),
        }
    }

    /// Retry budget remains: bump the attempt counter and put the task
    /// back in PENDING for the next poll tick.
    fn requeue_for_retry(&self, mut task: Task, handler_err: &ServiceError) -> Result<(), ServiceError> {
        task.retry_count += 1;
        self.state_machine.transition(&mut task, TaskStatus::Pending)?;

        self.store.update_status_with_event(
            &task,
            TaskStatus::Running,
            "scheduler",
            &format!("retry: {handler_err}"),
        )?;
        info!(
            "task {} failed, will retry (attempt {}/{})",
            task.id, task.retry_count, task.max_retries
        );
        Ok(())
    }

    /// Budget exhausted: record the error and mark the task FAILED.
    fn mark_failed(&self, mut task: Task, handler_err: &ServiceError) -> Result<(), ServiceError> {
        task.error_message = handler_err.to_string();
        self.state_machine.transition(&mut task, TaskStatus::Failed)?;

        self.store.update_status_with_event(
            &task,
            TaskStatus::Running,
            "scheduler",
            &handler_err.to_string(),
        )?;
        info!("task {} failed permanently", task.id);
        Ok(())
    }

    /// After a task succeeds, its dependents may have become ready —
    /// schedule them now instead of waiting for the next poll tick.
    pub(crate) async fn schedule_dependents(&self, completed_task_id: &str) {
        let dependents = match self.store.list_dependents(completed_task_id) {
            Ok(ids) => ids,
            Err(e) => {
                error!("failed to list dependents of {completed_task_id}: {e}");
                return;
            }
        };

        for dep_id in dependents {
            // Dependents with other unmet upstreams simply stay PENDING.
            let _ = self.try_schedule(&dep_id).await;
        }
    }

    // -----------------------------------------------------------------------
    // Timeout sweeper
    // -----------------------------------------------------------------------

    async fn sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.config.sweep_interval, "task timeout sweeper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("task timeout sweeper stopped");
                    break;
                }
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    match self.sweep_timeouts() {
                        Ok(0) => {}
                        Ok(n) => info!("sweeper timed out {n} tasks"),
                        Err(e) => error!("sweeper error: {e}"),
                    }
                }
            }
        }
    }

    /// Move RUNNING tasks whose `started_at` is older than `task_timeout`
    /// to TIMEOUT. Pulls at most `max_pending` per sweep; stragglers are
    /// caught on the next pass.
    fn sweep_timeouts(&self) -> Result<usize, ServiceError> {
        let running = self
            .store
            .list_by_status(TaskStatus::Running, self.config.max_pending)?;
        let now = chrono::Utc::now();
        let mut timed_out = 0;

        for mut task in running {
            let Some(started) = task.started_at.as_deref().and_then(parse_rfc3339) else {
                continue;
            };

            let elapsed = (now - started).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.config.task_timeout {
                continue;
            }

            self.state_machine.transition(&mut task, TaskStatus::Timeout)?;
            match self
                .store
                .update_status_with_event(&task, TaskStatus::Running, "scheduler", "timeout")
            {
                Ok(()) => timed_out += 1,
                Err(ServiceError::StatusMismatch(_)) => {} // finished just in time
                Err(e) => return Err(e),
            }
        }

        Ok(timed_out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
