use std::sync::Arc;

use tracing::debug;

use super::properties::{derive_stream_properties, StreamProperties};
use crate::query::plan::{
    AggregationStep, ExchangeKind, ExchangeNode, ExchangeScope, PlanNode, PlanNodeIdAllocator, PlanningError,
};

struct PlanWithStreams {
    node: Arc<PlanNode>,
    properties: StreamProperties,
}

/// Inserts local gathering exchanges in front of every node that needs to see its
/// input as one stream within a task
pub struct AddLocalExchanges<'a> {
    ids: &'a mut PlanNodeIdAllocator,
    inserted: usize,
}

impl<'a> AddLocalExchanges<'a> {
    pub fn new(ids: &'a mut PlanNodeIdAllocator) -> Self {
        Self { ids, inserted: 0 }
    }

    pub fn optimize(mut self, plan: &Arc<PlanNode>) -> Result<Arc<PlanNode>, PlanningError> {
        let planned = self.visit(plan)?;
        debug!("Added {} local exchanges", self.inserted);
        Ok(planned.node)
    }

    fn visit(&mut self, node: &Arc<PlanNode>) -> Result<PlanWithStreams, PlanningError> {
        let require_single = match node.as_ref() {
            PlanNode::Output(_) | PlanNode::Join(_) => true,
            PlanNode::Aggregation(aggregation) => aggregation.step != AggregationStep::Partial,
            PlanNode::Exchange(exchange) => exchange.scope == ExchangeScope::Remote,
            PlanNode::TableScan(_) | PlanNode::Values(_) | PlanNode::Filter(_) | PlanNode::Projection(_) => false,
            PlanNode::RemoteSource(_) | PlanNode::GroupReference(_) => {
                return Err(PlanningError::UnsupportedNode {
                    pass: "AddLocalExchanges",
                    node: node.name(),
                })
            }
        };

        let mut children = Vec::new();
        let mut inputs = Vec::new();
        for source in node.sources() {
            let mut planned = self.visit(&source)?;
            if require_single && !planned.properties.single_stream {
                planned = self.gather(planned);
            }
            children.push(planned.node);
            inputs.push(planned.properties);
        }
        let node = if children.is_empty() {
            Arc::clone(node)
        } else {
            Arc::new(node.replace_children(children))
        };
        let properties = derive_stream_properties(&node, &inputs)?;
        Ok(PlanWithStreams { node, properties })
    }

    fn gather(&mut self, source: PlanWithStreams) -> PlanWithStreams {
        let exchange = ExchangeNode::new(self.ids.next_id(), ExchangeScope::Local, ExchangeKind::Gather, source.node);
        debug!("Inserting local exchange {} above {}", exchange.id, exchange.sources[0].name());
        self.inserted += 1;
        PlanWithStreams {
            node: Arc::new(PlanNode::Exchange(exchange)),
            properties: StreamProperties::single(),
        }
    }
}
