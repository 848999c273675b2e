use std::sync::Arc;

use taskflow_core::ServiceError;

use crate::model::TaskStatus;
use crate::store::TaskStore;

/// Gates task readiness on upstream completion.
///
/// A task is ready when every id in its `dependencies` list has reached
/// SUCCEEDED. Only the declared upstreams are consulted — there is no
/// transitive walk, and a cycle in an externally seeded graph simply
/// manifests as permanent non-readiness.
pub struct DependencyResolver {
    store: Arc<TaskStore>,
}

impl DependencyResolver {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Returns `true` when the task may be scheduled.
    ///
    /// Errors when the task itself or any declared upstream is absent.
    /// Short-circuits on the first upstream that is not SUCCEEDED.
    pub fn check(&self, task_id: &str) -> Result<bool, ServiceError> {
        let task = self
            .store
            .get(task_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("task {task_id}")))?;

        if task.dependencies.is_empty() {
            return Ok(true);
        }

        for dep_id in &task.dependencies {
            let dep = self.store.get(dep_id)?.ok_or_else(|| {
                ServiceError::DependencyMissing(format!(
                    "dependency {dep_id} of task {task_id} not found"
                ))
            })?;

            if dep.status != TaskStatus::Succeeded {
                return Ok(false);
            }
        }

        Ok(true)
    }
}
