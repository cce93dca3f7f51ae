//! Physical execution of plan fragments: operators, drivers, pipelines and the
//! registry routing remote results to waiting exchanges.

pub mod driver;
pub mod driver_manager;
pub mod expression;
pub mod operator;
pub mod pipeline;
pub mod planner;

pub use driver::Driver;
pub use driver_manager::DriverManager;
pub use pipeline::{Pipeline, PipelineSource, TaskExecutionPlan};
pub use planner::TaskExecutionPlanner;

use std::sync::Arc;

use thiserror::Error;

use crate::page::PageError;
use crate::rpc::RpcError;
use crate::spi::{NodeId, PageSourceProvider, SplitSourceProvider, StorageError};
use expression::ExpressionError;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Operator {0} does not accept input")]
    SourceInput(&'static str),
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
    #[error("Page error: {0}")]
    Page(#[from] PageError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Upstream task failed: {0}")]
    Upstream(String),
    #[error("Output buffer closed")]
    OutputClosed,
    #[error("Failed to send results: {0}")]
    Rpc(#[from] RpcError),
    #[error("Unsupported plan node {0} in task planner")]
    UnsupportedNode(&'static str),
    #[error("Internal execution error: {0}")]
    Internal(String),
}

/// Services a node hands to every task it runs
pub struct ExecutionContext {
    pub node_id: NodeId,
    pub driver_manager: Arc<DriverManager>,
    pub split_source_provider: Arc<dyn SplitSourceProvider>,
    pub page_source_provider: Arc<dyn PageSourceProvider>,
}

impl ExecutionContext {
    pub fn new(
        node_id: impl Into<NodeId>,
        driver_manager: Arc<DriverManager>,
        split_source_provider: Arc<dyn SplitSourceProvider>,
        page_source_provider: Arc<dyn PageSourceProvider>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            driver_manager,
            split_source_provider,
            page_source_provider,
        }
    }
}
