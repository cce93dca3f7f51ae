use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::TaskId;
use crate::execution::ExecutionError;
use crate::page::{HashKey, Page, Value};
use crate::query::plan::PlanNodeId;
use crate::rpc::{Message, TaskResultSet, Transport};
use crate::spi::NodeId;

/// Receives the pages a task produces.
///
/// A task ends its output exactly once, with `no_more_pages` on success or `fail`
/// when it could not finish.
pub trait OutputBuffer: Send + Sync {
    fn add_page(&self, page: Page) -> Result<(), ExecutionError>;

    fn no_more_pages(&self) -> Result<(), ExecutionError>;

    fn fail(&self, message: &str);
}

/// Streams a task's pages to the exchange of the downstream tasks over the transport.
///
/// With more than one receiver and partition keys, rows are hash partitioned so that
/// equal keys always reach the same receiver.
pub struct PartitionOutputBuffer {
    task_id: TaskId,
    node_id: NodeId,
    target: PlanNodeId,
    receivers: Vec<NodeId>,
    partition_channels: Vec<usize>,
    transport: Arc<dyn Transport>,
}

impl PartitionOutputBuffer {
    pub fn new(
        task_id: TaskId,
        node_id: NodeId,
        target: PlanNodeId,
        receivers: Vec<NodeId>,
        partition_channels: Vec<usize>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            task_id,
            node_id,
            target,
            receivers,
            partition_channels,
            transport,
        }
    }

    fn send(&self, receiver: &str, result: TaskResultSet) -> Result<(), ExecutionError> {
        self.transport.send(receiver, &Message::ResultSet(result))?;
        Ok(())
    }

    fn partition_of(&self, page: &Page, row: usize) -> usize {
        let key: Vec<Value> = self
            .partition_channels
            .iter()
            .map(|channel| page.column(*channel).get(row))
            .collect();
        let mut hasher = DefaultHasher::new();
        HashKey(key).hash(&mut hasher);
        (hasher.finish() % self.receivers.len() as u64) as usize
    }
}

impl OutputBuffer for PartitionOutputBuffer {
    fn add_page(&self, page: Page) -> Result<(), ExecutionError> {
        let first = self
            .receivers
            .first()
            .ok_or_else(|| ExecutionError::Internal(format!("task {} has no receivers", self.task_id)))?;
        if page.is_empty() {
            return Ok(());
        }
        if self.receivers.len() == 1 || self.partition_channels.is_empty() {
            return self.send(
                first,
                TaskResultSet::page(self.task_id, self.node_id.clone(), self.target, page),
            );
        }

        let mut positions = vec![Vec::new(); self.receivers.len()];
        for row in 0..page.num_rows() {
            positions[self.partition_of(&page, row)].push(row);
        }
        for (receiver, positions) in self.receivers.iter().zip(positions) {
            if positions.is_empty() {
                continue;
            }
            debug!("Task {} sends {} rows to {}", self.task_id, positions.len(), receiver);
            self.send(
                receiver,
                TaskResultSet::page(self.task_id, self.node_id.clone(), self.target, page.take(&positions)),
            )?;
        }
        Ok(())
    }

    fn no_more_pages(&self) -> Result<(), ExecutionError> {
        for receiver in &self.receivers {
            self.send(receiver, TaskResultSet::no_more(self.task_id, self.node_id.clone(), self.target))?;
        }
        Ok(())
    }

    fn fail(&self, message: &str) {
        for receiver in &self.receivers {
            let result = TaskResultSet::failed(self.task_id, self.node_id.clone(), self.target, message);
            if let Err(e) = self.send(receiver, result) {
                warn!("Failed to report failure of task {} to {}: {}", self.task_id, receiver, e);
            }
        }
    }
}

#[derive(Debug)]
enum ResultEvent {
    Page(Page),
    Finished,
    Failed(String),
}

/// Output buffer of a query's root task, handing pages to the coordinator one at a
/// time. `add_page` blocks until the previous page was taken, so it must be called
/// from a blocking thread.
pub struct QueryResultBuilder {
    sender: mpsc::Sender<ResultEvent>,
}

impl QueryResultBuilder {
    pub fn new(column_names: Vec<String>) -> (Arc<Self>, QueryResultStream) {
        let (sender, receiver) = mpsc::channel(1);
        (
            Arc::new(Self { sender }),
            QueryResultStream {
                receiver,
                column_names,
            },
        )
    }

    fn push(&self, event: ResultEvent) -> Result<(), ExecutionError> {
        self.sender.blocking_send(event).map_err(|_| ExecutionError::OutputClosed)
    }
}

impl OutputBuffer for QueryResultBuilder {
    fn add_page(&self, page: Page) -> Result<(), ExecutionError> {
        self.push(ResultEvent::Page(page))
    }

    fn no_more_pages(&self) -> Result<(), ExecutionError> {
        self.push(ResultEvent::Finished)
    }

    fn fail(&self, message: &str) {
        if self.push(ResultEvent::Failed(message.to_string())).is_err() {
            debug!("Query result was abandoned before the failure arrived: {}", message);
        }
    }
}

/// Receiving half of a `QueryResultBuilder`
#[derive(Debug)]
pub struct QueryResultStream {
    receiver: mpsc::Receiver<ResultEvent>,
    column_names: Vec<String>,
}

impl QueryResultStream {
    /// Waits for the root task to end its output and gathers every page, with the
    /// columns named as the query's output
    pub async fn collect(mut self) -> Result<QueryResult, ExecutionError> {
        let mut pages = Vec::new();
        loop {
            match self.receiver.recv().await {
                Some(ResultEvent::Page(page)) => pages.push(page.rename(&self.column_names)?),
                Some(ResultEvent::Finished) => break,
                Some(ResultEvent::Failed(message)) => return Err(ExecutionError::Upstream(message)),
                None => return Err(ExecutionError::Upstream("root task went away".to_string())),
            }
        }
        Ok(QueryResult {
            columns: self.column_names,
            pages,
        })
    }
}

/// Everything a query returned
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub pages: Vec<Page>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.pages.iter().map(Page::num_rows).sum()
    }

    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.pages
            .iter()
            .flat_map(|page| page.rows().map(|row| row.values()))
            .collect()
    }
}
