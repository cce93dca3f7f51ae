//! Tasks: one execution of a plan fragment against a set of partitions.

pub mod manager;
pub mod output_buffer;

pub use manager::TaskManager;
pub use output_buffer::{OutputBuffer, PartitionOutputBuffer, QueryResult, QueryResultBuilder, QueryResultStream};

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::execution::{ExecutionContext, ExecutionError, TaskExecutionPlanner};
use crate::query::fragment::PlanFragment;
use crate::spi::Partitions;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task queue is closed")]
    QueueClosed,
    #[error("Task manager already started")]
    AlreadyStarted,
    #[error("Task execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

/// Identifies one query across every node taking part in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub request_id: RequestId,
    pub local_id: u32,
}

impl TaskId {
    pub fn new(request_id: RequestId, local_id: u32) -> Self {
        Self { request_id, local_id }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.request_id, self.local_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Finished,
    Failed,
}

/// A fragment scheduled on this node, with the partitions it scans and the buffer
/// receiving its results
pub struct SqlTask {
    pub id: TaskId,
    pub fragment: PlanFragment,
    pub partitions: Partitions,
    pub output: Arc<dyn OutputBuffer>,
    state: Mutex<TaskState>,
}

impl SqlTask {
    pub fn new(id: TaskId, fragment: PlanFragment, partitions: Partitions, output: Arc<dyn OutputBuffer>) -> Self {
        Self {
            id,
            fragment,
            partitions,
            output,
            state: Mutex::new(TaskState::Queued),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state.lock().map_or(TaskState::Failed, |state| *state)
    }

    fn set_state(&self, next: TaskState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Plans and runs the fragment on the calling thread, then closes the output.
    /// On error the output is left open for the caller to fail.
    pub fn run(&self, context: &ExecutionContext) -> Result<(), ExecutionError> {
        self.set_state(TaskState::Running);
        let result = TaskExecutionPlanner::new(context, self.id.request_id, &self.partitions)
            .plan(&self.fragment, Arc::clone(&self.output))
            .and_then(|plan| plan.run(&context.driver_manager));
        match result {
            Ok(()) => {
                self.output.no_more_pages()?;
                self.set_state(TaskState::Finished);
                debug!("Task {} finished", self.id);
                Ok(())
            }
            Err(e) => {
                self.set_state(TaskState::Failed);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for SqlTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlTask")
            .field("id", &self.id)
            .field("fragment", &self.fragment.id)
            .field("partitions", &self.partitions)
            .field("state", &self.state())
            .finish()
    }
}
