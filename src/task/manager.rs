use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{RequestId, SqlTask, TaskError, TaskId};
use crate::config::TaskManagerConfig;
use crate::execution::ExecutionContext;
use crate::metrics;

/// Registry of the tasks submitted to a node and the worker pool running them.
///
/// Submitted tasks wait in a bounded queue; each worker takes one task at a time and
/// runs it on a blocking thread. Tasks reading from other fragments wait on their
/// producers, so they are handed off to run beside the pool instead of holding a
/// worker.
pub struct TaskManager {
    config: TaskManagerConfig,
    tasks: Mutex<HashMap<TaskId, Arc<SqlTask>>>,
    sender: mpsc::Sender<Arc<SqlTask>>,
    receiver: Arc<Mutex<mpsc::Receiver<Arc<SqlTask>>>>,
    started: AtomicBool,
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            started: AtomicBool::new(false),
        }
    }

    /// Stores the task and queues it for a worker. A task with the same id replaces
    /// the stored one, but both stay queued.
    pub async fn submit_task(&self, task: SqlTask) -> Result<(), TaskError> {
        let task = Arc::new(task);
        let id = task.id;
        {
            let mut tasks = self.tasks.lock().await;
            if tasks.insert(id, Arc::clone(&task)).is_some() {
                warn!("Task {} was submitted again, replacing the stored task", id);
            }
        }
        self.sender.send(task).await.map_err(|_| TaskError::QueueClosed)?;
        metrics::record_task_submitted();
        metrics::update_queue_depth(self.queue_depth());
        debug!("Queued task {} ({} waiting)", id, self.queue_depth());
        Ok(())
    }

    /// Number of submitted tasks no worker has taken yet
    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub async fn get_task(&self, id: TaskId) -> Option<Arc<SqlTask>> {
        self.tasks.lock().await.get(&id).cloned()
    }

    /// Forgets every task of a request, returning how many there were
    pub async fn remove_request(&self, request_id: RequestId) -> usize {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|id, _| id.request_id != request_id);
        before - tasks.len()
    }

    /// Spawns the workers. A task that fails has its output failed so downstream
    /// tasks learn about it.
    pub fn start(&self, context: Arc<ExecutionContext>) -> Result<Vec<JoinHandle<()>>, TaskError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(TaskError::AlreadyStarted);
        }
        info!(
            "Starting {} task workers on {}",
            self.config.worker_count, context.node_id
        );
        let handles = (0..self.config.worker_count.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&self.receiver);
                let sender = self.sender.clone();
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    loop {
                        let task = receiver.lock().await.recv().await;
                        let Some(task) = task else {
                            debug!("Task worker {} stopping", worker);
                            break;
                        };
                        metrics::update_queue_depth(sender.max_capacity() - sender.capacity());
                        if task.fragment.is_leaf() {
                            run_task(worker, task, Arc::clone(&context)).await;
                        } else {
                            debug!("Worker {} hands off task {}", worker, task.id);
                            tokio::spawn(run_task(worker, task, Arc::clone(&context)));
                        }
                    }
                })
            })
            .collect();
        Ok(handles)
    }
}

async fn run_task(worker: usize, task: Arc<SqlTask>, context: Arc<ExecutionContext>) {
    let id = task.id;
    debug!("Worker {} starts task {}", worker, id);
    let outcome = tokio::task::spawn_blocking(move || {
        let result = task.run(&context);
        if let Err(e) = &result {
            task.output.fail(&e.to_string());
        }
        result
    })
    .await;
    match outcome {
        Ok(Ok(())) => info!("Task {} finished", id),
        Ok(Err(e)) => {
            metrics::record_task_failed();
            error!("Task {} failed: {}", id, e);
        }
        Err(e) => {
            metrics::record_task_failed();
            error!("Task {} panicked: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::DriverManager;
    use crate::page::{DataType, Value};
    use crate::query::fragment::PlanFragment;
    use crate::query::plan::{FragmentId, OutputNode, PlanNode, PlanNodeId, RemoteSourceNode, Symbol, ValuesNode};
    use crate::spi::{MemoryStorage, Partitions};
    use crate::task::{QueryResultBuilder, TaskState};

    fn output_fragment(source: Arc<PlanNode>, remote_sources: Vec<PlanNodeId>) -> PlanFragment {
        let v = Symbol::new("v", DataType::Bigint);
        PlanFragment {
            id: FragmentId::ROOT,
            root: Arc::new(PlanNode::Output(OutputNode {
                id: PlanNodeId(1),
                source,
                column_names: vec!["v".to_string()],
                outputs: vec![v.clone()],
            })),
            partitions: Partitions::new(),
            receivers: Vec::new(),
            remote_sources,
            remote_parent_node_id: None,
            output_layout: vec![v],
            output_partitioning: Vec::new(),
        }
    }

    fn values_fragment(rows: Vec<Vec<Value>>) -> PlanFragment {
        let values = Arc::new(PlanNode::Values(ValuesNode {
            id: PlanNodeId(0),
            outputs: vec![Symbol::new("v", DataType::Bigint)],
            rows,
        }));
        output_fragment(values, Vec::new())
    }

    /// Reads from one upstream task that never sends anything
    fn waiting_fragment() -> PlanFragment {
        let remote = Arc::new(PlanNode::RemoteSource(RemoteSourceNode {
            id: PlanNodeId(0),
            source_fragments: vec![FragmentId(1)],
            outputs: vec![Symbol::new("v", DataType::Bigint)],
            expected_sources: 1,
        }));
        output_fragment(remote, vec![PlanNodeId(0)])
    }

    fn context() -> Arc<ExecutionContext> {
        let storage = Arc::new(MemoryStorage::default());
        Arc::new(ExecutionContext::new(
            "node-1",
            Arc::new(DriverManager::new()),
            storage.clone(),
            storage,
        ))
    }

    #[tokio::test]
    async fn test_resubmitted_task_replaces_stored_but_both_queue() {
        let manager = TaskManager::new(TaskManagerConfig {
            worker_count: 1,
            queue_capacity: 4,
        });
        let id = TaskId::new(RequestId::new(), 0);
        let (first_output, _first) = QueryResultBuilder::new(vec!["v".to_string()]);
        let (second_output, _second) = QueryResultBuilder::new(vec!["v".to_string()]);
        manager
            .submit_task(SqlTask::new(id, values_fragment(vec![vec![Value::Bigint(1)]]), Partitions::new(), first_output))
            .await
            .unwrap();
        manager
            .submit_task(SqlTask::new(id, values_fragment(vec![vec![Value::Bigint(2)]]), Partitions::new(), second_output))
            .await
            .unwrap();

        assert_eq!(manager.queue_depth(), 2);
        let stored = manager.get_task(id).await.unwrap();
        let PlanNode::Output(output) = stored.fragment.root.as_ref() else {
            panic!("expected output root");
        };
        let PlanNode::Values(values) = output.source.as_ref() else {
            panic!("expected values under output");
        };
        assert_eq!(values.rows, vec![vec![Value::Bigint(2)]]);
        assert_eq!(stored.state(), TaskState::Queued);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workers_run_submitted_tasks() {
        let manager = TaskManager::new(TaskManagerConfig {
            worker_count: 2,
            queue_capacity: 4,
        });
        manager.start(context()).unwrap();
        assert!(matches!(manager.start(context()), Err(TaskError::AlreadyStarted)));

        let request_id = RequestId::new();
        let id = TaskId::new(request_id, 0);
        let (output, stream) = QueryResultBuilder::new(vec!["value".to_string()]);
        let rows = vec![vec![Value::Bigint(4)], vec![Value::Bigint(5)]];
        manager
            .submit_task(SqlTask::new(id, values_fragment(rows.clone()), Partitions::new(), output))
            .await
            .unwrap();

        let result = stream.collect().await.unwrap();
        assert_eq!(result.rows(), rows);
        assert_eq!(result.columns, vec!["value"]);

        assert_eq!(manager.remove_request(request_id).await, 1);
        assert!(manager.get_task(id).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiting_tasks_do_not_hold_workers() {
        let manager = TaskManager::new(TaskManagerConfig {
            worker_count: 1,
            queue_capacity: 4,
        });
        let context = context();
        manager.start(Arc::clone(&context)).unwrap();

        let mut waiting = Vec::new();
        for _ in 0..2 {
            let request_id = RequestId::new();
            let (output, stream) = QueryResultBuilder::new(vec!["v".to_string()]);
            let task = SqlTask::new(TaskId::new(request_id, 0), waiting_fragment(), Partitions::new(), output);
            manager.submit_task(task).await.unwrap();
            waiting.push((request_id, stream));
        }

        // the only worker is still free for tasks that can finish
        let (output, stream) = QueryResultBuilder::new(vec!["v".to_string()]);
        let rows = vec![vec![Value::Bigint(7)]];
        manager
            .submit_task(SqlTask::new(TaskId::new(RequestId::new(), 0), values_fragment(rows.clone()), Partitions::new(), output))
            .await
            .unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(10), stream.collect())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.rows(), rows);

        // dropping the exchanges releases the waiting tasks
        for (request_id, stream) in waiting {
            context.driver_manager.cleanup(request_id);
            assert!(stream.collect().await.is_err());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_task_fails_its_output() {
        let manager = TaskManager::new(TaskManagerConfig::default());
        manager.start(context()).unwrap();

        let mut fragment = values_fragment(vec![vec![Value::Bigint(1)]]);
        // the output reads a symbol the plan never produces
        fragment.output_layout = vec![Symbol::new("missing", DataType::Bigint)];
        let (output, stream) = QueryResultBuilder::new(vec!["missing".to_string()]);
        manager
            .submit_task(SqlTask::new(TaskId::new(RequestId::new(), 0), fragment, Partitions::new(), output))
            .await
            .unwrap();
        assert!(stream.collect().await.is_err());
    }
}
