use taskflow_core::{now_rfc3339, ServiceError};

use crate::model::{Task, TaskStatus};

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

/// Validates task status transitions and applies their side effects.
///
/// Transition table:
///
/// | from        | allowed to                                      |
/// |-------------|-------------------------------------------------|
/// | UNSPECIFIED | PENDING                                         |
/// | PENDING     | RUNNING, CANCELLED                              |
/// | RUNNING     | SUCCEEDED, FAILED, TIMEOUT, CANCELLED, PENDING  |
/// | FAILED      | PENDING, CANCELLED                              |
/// | SUCCEEDED   | —                                               |
/// | CANCELLED   | —                                               |
/// | TIMEOUT     | —                                               |
///
/// RUNNING → PENDING covers the scheduler's retry and resubmit paths, so
/// the recorded event trail always replays as a valid path through this
/// table.
///
/// The state machine is stateless and performs no I/O. It mutates the
/// in-memory record only; callers persist the mutated task through the
/// store's conditional update.
#[derive(Debug, Default, Clone, Copy)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Allowed targets from a given status.
    pub fn allowed_transitions(&self, from: TaskStatus) -> &'static [TaskStatus] {
        match from {
            TaskStatus::Unspecified => &[TaskStatus::Pending],
            TaskStatus::Pending => &[TaskStatus::Running, TaskStatus::Cancelled],
            TaskStatus::Running => &[
                TaskStatus::Succeeded,
                TaskStatus::Failed,
                TaskStatus::Timeout,
                TaskStatus::Cancelled,
                TaskStatus::Pending,
            ],
            TaskStatus::Failed => &[TaskStatus::Pending, TaskStatus::Cancelled],
            TaskStatus::Succeeded | TaskStatus::Cancelled | TaskStatus::Timeout => &[],
        }
    }

    /// Pure table lookup.
    pub fn can_transition(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.allowed_transitions(from).contains(&to)
    }

    /// Whether the status admits no further transitions.
    pub fn is_terminal(&self, status: TaskStatus) -> bool {
        status.is_terminal()
    }

    /// Validate and apply a transition to the in-memory task.
    ///
    /// On success the task's status is updated and the transition's side
    /// effects are applied:
    /// - entering RUNNING stamps `started_at` (first time only)
    /// - entering SUCCEEDED stamps `completed_at` and clears `error_message`
    /// - entering FAILED increments `retry_count` and stamps `completed_at`
    ///   if unset
    /// - entering CANCELLED/TIMEOUT stamps `completed_at` if the task had
    ///   started and is not yet stamped
    /// - `updated_at` is always refreshed
    pub fn transition(&self, task: &mut Task, to: TaskStatus) -> Result<(), ServiceError> {
        let from = task.status;

        if !self.can_transition(from, to) {
            return Err(ServiceError::InvalidTransition(format!(
                "invalid state transition from {from} to {to}"
            )));
        }

        let now = now_rfc3339();

        task.status = to;
        match to {
            TaskStatus::Running => {
                if task.started_at.is_none() {
                    task.started_at = Some(now.clone());
                }
            }
            TaskStatus::Succeeded => {
                task.completed_at = Some(now.clone());
                task.error_message.clear();
            }
            TaskStatus::Failed => {
                task.retry_count += 1;
                if task.completed_at.is_none() {
                    task.completed_at = Some(now.clone());
                }
            }
            TaskStatus::Cancelled | TaskStatus::Timeout => {
                if task.started_at.is_some() && task.completed_at.is_none() {
                    task.completed_at = Some(now.clone());
                }
            }
            TaskStatus::Pending | TaskStatus::Unspecified => {}
        }
        task.updated_at = now;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
