//! Operators: the units of page-at-a-time dataflow a driver moves pages between.
//!
//! An operator starts out accepting input, switches to draining once `finish` is
//! called, and reports `is_finished` when it will produce nothing more. Source
//! operators take splits instead of pages.

pub mod aggregation;
pub mod exchange;
pub mod filter;
pub mod join;
pub mod output;
pub mod project;
pub mod scan;
pub mod values;

pub use aggregation::{HashAggregationOperator, HashAggregationOperatorFactory};
pub use exchange::{ExchangeClient, ExchangeOperator, ExchangeOperatorFactory, LocalExchangeSinkOperatorFactory};
pub use filter::FilterOperatorFactory;
pub use join::{HashBuilderOperatorFactory, JoinBridge, LookupJoinOperatorFactory};
pub use output::TaskOutputOperatorFactory;
pub use project::ProjectOperatorFactory;
pub use scan::TableScanOperatorFactory;
pub use values::ValuesOperatorFactory;

use crate::page::Page;
use crate::query::plan::PlanNodeId;
use crate::spi::Split;

use super::ExecutionError;

pub trait Operator: Send {
    fn name(&self) -> &'static str;

    /// True when `add_input` may be called
    fn needs_input(&self) -> bool;

    fn add_input(&mut self, page: Page) -> Result<(), ExecutionError>;

    fn get_output(&mut self) -> Result<Option<Page>, ExecutionError>;

    /// Signals that no more input will arrive
    fn finish(&mut self);

    fn is_finished(&self) -> bool;

    fn as_source(&mut self) -> Option<&mut dyn SourceOperator> {
        None
    }
}

/// An operator at the head of a pipeline, fed with splits
pub trait SourceOperator: Operator {
    /// Id of the plan node the operator was planned from
    fn source_id(&self) -> PlanNodeId;

    fn add_split(&mut self, split: Split) -> Result<(), ExecutionError>;

    fn no_more_splits(&mut self);
}

/// Creates operator instances for each driver of a pipeline
pub trait OperatorFactory: Send + Sync {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError>;
}

/// Holds at most one page between `add_input` and `get_output`
#[derive(Debug, Default)]
pub(crate) struct PageBuffer {
    page: Option<Page>,
    finishing: bool,
}

impl PageBuffer {
    pub fn needs_input(&self) -> bool {
        !self.finishing && self.page.is_none()
    }

    pub fn put(&mut self, page: Page) -> Result<(), ExecutionError> {
        if self.page.is_some() {
            return Err(ExecutionError::Internal("page added before previous output was taken".to_string()));
        }
        self.page = Some(page);
        Ok(())
    }

    pub fn take(&mut self) -> Option<Page> {
        self.page.take()
    }

    pub fn finish(&mut self) {
        self.finishing = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finishing && self.page.is_none()
    }
}
