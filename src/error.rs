use std::time::Duration;

use thiserror::Error;

use crate::execution::ExecutionError;
use crate::query::analyzer::AnalysisError;
use crate::query::plan::PlanningError;
use crate::rpc::RpcError;
use crate::spi::MetadataError;
use crate::task::TaskError;

/// Everything that can end a query
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),
    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Task failed: {0}")]
    Task(#[from] TaskError),
    #[error("RPC failed: {0}")]
    Rpc(#[from] RpcError),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("Query did not finish within {0:?}")]
    Timeout(Duration),
}
