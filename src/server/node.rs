use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::execution::{DriverManager, ExecutionContext};
use crate::query::functions::FunctionRegistry;
use crate::query::plan::Symbol;
use crate::rpc::{Command, Envelope, InProcessTransport, Message, Transport};
use crate::spi::{Metadata, NodeId, PageSourceProvider, SplitSourceProvider};
use crate::task::{OutputBuffer, PartitionOutputBuffer, SqlTask, TaskError, TaskManager};

/// One engine instance: the tasks it runs, the exchanges waiting for results and
/// the storage it reads. Everything a query touches on this node hangs off it.
pub struct Node {
    config: NodeConfig,
    metadata: Arc<dyn Metadata>,
    functions: Arc<FunctionRegistry>,
    context: Arc<ExecutionContext>,
    task_manager: Arc<TaskManager>,
    transport: Arc<InProcessTransport>,
}

impl Node {
    pub fn new<S>(config: NodeConfig, storage: Arc<S>, transport: Arc<InProcessTransport>) -> Self
    where
        S: Metadata + SplitSourceProvider + PageSourceProvider + 'static,
    {
        let context = ExecutionContext::new(
            config.node_id.clone(),
            Arc::new(DriverManager::new()),
            storage.clone(),
            storage.clone(),
        );
        Self {
            task_manager: Arc::new(TaskManager::new(config.task_manager.clone())),
            metadata: storage,
            functions: Arc::new(FunctionRegistry::new()),
            context: Arc::new(context),
            transport,
            config,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metadata(&self) -> Arc<dyn Metadata> {
        Arc::clone(&self.metadata)
    }

    pub fn functions(&self) -> Arc<FunctionRegistry> {
        Arc::clone(&self.functions)
    }

    pub fn driver_manager(&self) -> &DriverManager {
        &self.context.driver_manager
    }

    pub fn task_manager(&self) -> &TaskManager {
        &self.task_manager
    }

    pub fn transport(&self) -> &Arc<InProcessTransport> {
        &self.transport
    }

    /// Opens the node's inbox and starts its task workers
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, TaskError> {
        let inbox = self.transport.register(self.node_id());
        self.task_manager.start(Arc::clone(&self.context))?;
        info!("Node {} started", self.node_id());
        let node = Arc::clone(self);
        Ok(tokio::spawn(async move { node.serve(inbox).await }))
    }

    /// Handles messages in arrival order until every sender is gone
    async fn serve(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = inbox.recv().await {
            match envelope.open() {
                Ok(message) => self.handle(message).await,
                Err(e) => error!("Node {} dropped a message: {}", self.node_id(), e),
            }
        }
        debug!("Inbox of node {} closed", self.node_id());
    }

    async fn handle(&self, message: Message) {
        debug!("Node {} received {}", self.node_id(), message.kind());
        match message {
            Message::Command(Command::SubmitTask {
                task_id,
                partitions,
                fragment,
            }) => {
                let Some(target) = fragment.remote_parent_node_id else {
                    warn!("Task {} has no downstream exchange, ignoring it", task_id);
                    return;
                };
                let output = Arc::new(PartitionOutputBuffer::new(
                    task_id,
                    self.node_id().clone(),
                    target,
                    fragment.receivers.clone(),
                    partition_channels(&fragment.output_layout, &fragment.output_partitioning),
                    Arc::clone(&self.transport) as Arc<dyn Transport>,
                ));
                let task = SqlTask::new(task_id, fragment, partitions, output.clone());
                if let Err(e) = self.task_manager.submit_task(task).await {
                    error!("Failed to submit task {}: {}", task_id, e);
                    output.fail(&e.to_string());
                }
            }
            Message::Command(Command::Cleanup { request_id }) => {
                self.context.driver_manager.cleanup(request_id);
                let removed = self.task_manager.remove_request(request_id).await;
                debug!("Node {} forgot {} tasks of request {}", self.node_id(), removed, request_id);
            }
            Message::ResultSet(result) => {
                let task_id = result.task_id;
                if let Err(e) = self.context.driver_manager.deliver(result) {
                    error!("Failed to deliver results of task {}: {}", task_id, e);
                }
            }
        }
    }
}

/// Positions of the partitioning symbols within the output layout
fn partition_channels(layout: &[Symbol], partitioning: &[Symbol]) -> Vec<usize> {
    partitioning
        .iter()
        .filter_map(|symbol| layout.iter().position(|s| s == symbol))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DataType;

    #[test]
    fn test_partition_channels_follow_the_layout() {
        let g = Symbol::new("g", DataType::Varchar);
        let total = Symbol::new("total", DataType::Bigint);
        assert_eq!(partition_channels(&[total.clone(), g.clone()], &[g]), vec![1]);
        assert!(partition_channels(&[total], &[]).is_empty());
    }
}
