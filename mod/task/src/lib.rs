//! Task orchestration core.
//!
//! Accepts, persists, schedules and executes units of work subject to
//! dependency gating, bounded retries and strict status-transition rules.
//! The layers, leaves first:
//!
//! - [`model`] — task/event records and the status + priority enums
//! - [`state_machine`] — validated transitions and their side effects
//! - [`store`] — durable SQL store with CAS status updates and the
//!   append-only event log
//! - [`resolver`] — readiness gating on upstream completion
//! - [`worker_pool`] — bounded, non-blocking execution pool
//! - [`scheduler`] — periodic poll loop driving PENDING tasks through
//!   claim, execution and completion
//! - [`service`] — the façade the transport layer calls into

pub mod model;
pub mod resolver;
pub mod scheduler;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod worker_pool;

pub use model::{
    CreateTaskRequest, Task, TaskEvent, TaskFilter, TaskPatch, TaskPriority, TaskStatus,
};
pub use resolver::DependencyResolver;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStatus};
pub use service::TaskService;
pub use state_machine::StateMachine;
pub use store::TaskStore;
pub use worker_pool::WorkerPool;
