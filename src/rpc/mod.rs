//! Messages exchanged between nodes and the transport carrying them.
//!
//! Every message travels as JSON inside a checksummed envelope, whether or not the
//! receiving node lives in the same process.

pub mod transport;

pub use transport::{Envelope, InProcessTransport, Transport};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::page::Page;
use crate::query::fragment::PlanFragment;
use crate::query::plan::PlanNodeId;
use crate::spi::{NodeId, Partitions};
use crate::task::{RequestId, TaskId};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Failed to encode or decode message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupted message: CRC mismatch (expected {expected:#010x}, got {actual:#010x})")]
    Checksum { expected: u32, actual: u32 },
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("Inbox of node {0} is closed")]
    Closed(NodeId),
}

/// Instructions a coordinator sends to worker nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    SubmitTask {
        task_id: TaskId,
        partitions: Partitions,
        fragment: PlanFragment,
    },
    Cleanup {
        request_id: RequestId,
    },
}

/// Output of a task on its way to the exchange `target` of the downstream task.
///
/// A sender ends its stream with `no_more`; a `failure` replaces every further page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultSet {
    pub task_id: TaskId,
    /// Node the producing task ran on
    pub node_id: NodeId,
    pub target: PlanNodeId,
    pub page: Option<Page>,
    pub no_more: bool,
    pub failure: Option<String>,
}

impl TaskResultSet {
    pub fn page(task_id: TaskId, node_id: NodeId, target: PlanNodeId, page: Page) -> Self {
        Self {
            task_id,
            node_id,
            target,
            page: Some(page),
            no_more: false,
            failure: None,
        }
    }

    pub fn no_more(task_id: TaskId, node_id: NodeId, target: PlanNodeId) -> Self {
        Self {
            task_id,
            node_id,
            target,
            page: None,
            no_more: true,
            failure: None,
        }
    }

    pub fn failed(task_id: TaskId, node_id: NodeId, target: PlanNodeId, message: &str) -> Self {
        Self {
            task_id,
            node_id,
            target,
            page: None,
            no_more: true,
            failure: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Command(Command),
    ResultSet(TaskResultSet),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Command(Command::SubmitTask { .. }) => "SubmitTask",
            Message::Command(Command::Cleanup { .. }) => "Cleanup",
            Message::ResultSet(_) => "ResultSet",
        }
    }
}
