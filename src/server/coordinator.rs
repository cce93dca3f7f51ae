use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::node::Node;
use crate::error::QueryError;
use crate::execution::operator::{ExchangeClient, ExchangeOperator, Operator};
use crate::metrics;
use crate::page::ColumnMetadata;
use crate::query::analyzer::{Analyzer, Session};
use crate::query::ast::Query;
use crate::query::fragment::{PlanFragment, PlanFragmenter, SubPlan};
use crate::query::optimizer::PlanOptimizer;
use crate::query::plan::PlanNode;
use crate::query::planner::LogicalPlanner;
use crate::rpc::{Command, Message, Transport};
use crate::spi::{NodeId, Partitions};
use crate::task::{OutputBuffer, QueryResult, QueryResultBuilder, RequestId, SqlTask, TaskId};

/// A fragment instance bound to the node that will run it
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub node: NodeId,
    pub task_id: TaskId,
    pub partitions: Partitions,
    pub fragment: PlanFragment,
}

/// Plans queries and drives them across the cluster from one node.
///
/// Leaf fragments run on every node owning their shards; every other fragment runs
/// as a single task on the coordinator. A root that is itself a leaf runs on the node
/// owning its shards and streams its pages back through an exchange on the coordinator.
pub struct Coordinator {
    node: Arc<Node>,
    session: Session,
}

impl Coordinator {
    pub fn new(node: Arc<Node>, session: Session) -> Self {
        Self { node, session }
    }

    /// Compiles a query down to its fragments
    pub fn plan(&self, query: &Query) -> Result<SubPlan, QueryError> {
        let analyzer = Analyzer::new(self.node.metadata(), self.node.functions(), self.session.clone());
        let analysis = analyzer.analyze(query)?;
        let plan = LogicalPlanner::new(&analysis).plan()?;
        let plan = PlanOptimizer::new(self.node.config().optimizer.clone()).optimize(plan)?;
        Ok(PlanFragmenter::new().create_sub_plans(&plan.root)?)
    }

    /// Assigns every fragment instance to a node, producers before consumers
    pub fn schedule(&self, request_id: RequestId, sub_plan: &SubPlan) -> Vec<ScheduledTask> {
        let mut tasks = Vec::new();
        let mut next_local_id = 0;
        self.schedule_fragment(request_id, sub_plan, Vec::new(), &mut next_local_id, &mut tasks);
        tasks
    }

    fn schedule_fragment(
        &self,
        request_id: RequestId,
        sub_plan: &SubPlan,
        receivers: Vec<NodeId>,
        next_local_id: &mut u32,
        tasks: &mut Vec<ScheduledTask>,
    ) {
        let fragment = &sub_plan.fragment;
        let placements: Vec<(NodeId, Partitions)> = if fragment.is_leaf() && !fragment.partitions.is_empty() {
            fragment
                .partitions
                .iter()
                .map(|(node, shards)| {
                    let mut owned = Partitions::new();
                    owned.insert(node.clone(), shards.clone());
                    (node.clone(), owned)
                })
                .collect()
        } else {
            vec![(self.node.node_id().clone(), fragment.partitions.clone())]
        };

        let nodes: Vec<NodeId> = placements.iter().map(|(node, _)| node.clone()).collect();
        for child in &sub_plan.children {
            self.schedule_fragment(request_id, child, nodes.clone(), next_local_id, tasks);
        }

        let mut fragment = fragment.clone();
        fragment.receivers = receivers;
        for (node, partitions) in placements {
            let task_id = TaskId::new(request_id, *next_local_id);
            *next_local_id += 1;
            debug!("Scheduled fragment {} as task {} on {}", fragment.id, task_id, node);
            tasks.push(ScheduledTask {
                node,
                task_id,
                partitions,
                fragment: fragment.clone(),
            });
        }
    }

    /// Runs a query to completion and returns every row it produced
    pub async fn execute(&self, query: &Query) -> Result<QueryResult, QueryError> {
        let start = Instant::now();
        let request_id = RequestId::new();
        info!("Executing request {}", request_id);
        let result = self.run(request_id, query).await;
        self.cleanup(request_id);
        let elapsed = start.elapsed();
        metrics::record_query(elapsed.as_secs_f64() * 1000.0);
        match &result {
            Ok(result) => info!(
                "Request {} returned {} rows in {:?}",
                request_id,
                result.row_count(),
                elapsed
            ),
            Err(e) => warn!("Request {} failed after {:?}: {}", request_id, elapsed, e),
        }
        result
    }

    async fn run(&self, request_id: RequestId, query: &Query) -> Result<QueryResult, QueryError> {
        let sub_plan = self.plan(query)?;
        let column_names = match sub_plan.fragment.root.as_ref() {
            PlanNode::Output(output) => output.column_names.clone(),
            root => root.output_symbols().iter().map(|s| s.name().to_string()).collect(),
        };

        let (output, stream) = QueryResultBuilder::new(column_names);
        let mut output = Some(output);
        for mut scheduled in self.schedule(request_id, &sub_plan) {
            if scheduled.fragment.remote_parent_node_id.is_none() {
                let Some(output) = output.take() else {
                    continue;
                };
                if scheduled.node == *self.node.node_id() {
                    let task = SqlTask::new(scheduled.task_id, scheduled.fragment, scheduled.partitions, output);
                    self.node.task_manager().submit_task(task).await?;
                    continue;
                }
                let relay = self.open_relay(request_id, &mut scheduled.fragment)?;
                tokio::task::spawn_blocking(move || forward(relay, output));
                debug!("Root task {} runs remotely on {}", scheduled.task_id, scheduled.node);
            }
            let command = Command::SubmitTask {
                task_id: scheduled.task_id,
                partitions: scheduled.partitions,
                fragment: scheduled.fragment,
            };
            self.node.transport().send(&scheduled.node, &Message::Command(command))?;
        }

        let timeout = self.node.config().coordinator.query_timeout;
        match tokio::time::timeout(timeout, stream.collect()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(QueryError::Timeout(timeout)),
        }
    }

    /// Registers an exchange on the coordinator receiving the pages of a root task
    /// that runs elsewhere, and points the fragment at it
    fn open_relay(&self, request_id: RequestId, fragment: &mut PlanFragment) -> Result<ExchangeOperator, QueryError> {
        let relay_id = fragment.root.id();
        let layout = fragment
            .output_layout
            .iter()
            .map(|symbol| ColumnMetadata::new(symbol.name(), symbol.data_type()))
            .collect();
        let (client, operator) = ExchangeClient::new(relay_id, 1, layout);
        self.node.driver_manager().register_source_operator(request_id, client)?;
        fragment.remote_parent_node_id = Some(relay_id);
        fragment.receivers = vec![self.node.node_id().clone()];
        Ok(operator)
    }

    /// Tells every node to drop what it holds for the request
    fn cleanup(&self, request_id: RequestId) {
        let transport = self.node.transport();
        for node in transport.nodes() {
            let cleanup = Message::Command(Command::Cleanup { request_id });
            if let Err(e) = transport.send(&node, &cleanup) {
                warn!("Failed to send cleanup of {} to {}: {}", request_id, node, e);
            }
        }
    }
}

/// Copies everything a relay exchange receives into the query output. Blocks the
/// calling thread until the remote root task is done.
fn forward(mut relay: ExchangeOperator, output: Arc<QueryResultBuilder>) {
    let forwarded = relay.get_output().and_then(|page| match page {
        Some(page) => output.add_page(page),
        None => Ok(()),
    });
    let finished = forwarded.and_then(|()| output.no_more_pages());
    if let Err(e) = finished {
        warn!("Relay of remote results failed: {}", e);
        output.fail(&e.to_string());
    }
}
