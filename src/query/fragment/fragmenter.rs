use std::sync::Arc;

use tracing::{debug, info};

use super::{PlanFragment, SubPlan};
use crate::query::plan::{
    ExchangeNode, ExchangeScope, FragmentId, PlanNode, PlanNodeId, PlanningError, RemoteSourceNode, Symbol,
};
use crate::spi::Partitions;

/// Pieces of the fragment currently being cut
#[derive(Default)]
struct FragmentParts {
    partitions: Partitions,
    remote_sources: Vec<PlanNodeId>,
    children: Vec<SubPlan>,
}

impl FragmentParts {
    fn add_partitions(&mut self, partitions: &Partitions) {
        for (node, shards) in partitions {
            let owned = self.partitions.entry(node.clone()).or_default();
            for shard in shards {
                if !owned.contains(shard) {
                    owned.push(*shard);
                }
            }
        }
    }
}

/// Cuts an optimized plan at its remote exchanges
pub struct PlanFragmenter {
    next_fragment_id: u32,
}

impl Default for PlanFragmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanFragmenter {
    pub fn new() -> Self {
        Self {
            next_fragment_id: FragmentId::ROOT.0 + 1,
        }
    }

    pub fn create_sub_plans(mut self, plan: &Arc<PlanNode>) -> Result<SubPlan, PlanningError> {
        let sub_plan = self.create_fragment(FragmentId::ROOT, plan, None, plan.output_symbols(), Vec::new())?;
        info!(
            "Fragmented plan into {} fragments",
            sub_plan.get_all_fragments().len()
        );
        Ok(sub_plan)
    }

    fn next_id(&mut self) -> FragmentId {
        let id = FragmentId(self.next_fragment_id);
        self.next_fragment_id += 1;
        id
    }

    fn create_fragment(
        &mut self,
        id: FragmentId,
        root: &Arc<PlanNode>,
        remote_parent_node_id: Option<PlanNodeId>,
        output_layout: Vec<Symbol>,
        output_partitioning: Vec<Symbol>,
    ) -> Result<SubPlan, PlanningError> {
        let mut parts = FragmentParts::default();
        let root = self.rewrite(root, &mut parts)?;
        let fragment = PlanFragment {
            id,
            root,
            partitions: parts.partitions,
            receivers: Vec::new(),
            remote_sources: parts.remote_sources,
            remote_parent_node_id,
            output_layout,
            output_partitioning,
        };
        debug!(
            "Created fragment {} rooted at {} {} over {} nodes",
            fragment.id,
            fragment.root.name(),
            fragment.root.id(),
            fragment.partitions.len()
        );
        Ok(SubPlan {
            fragment,
            children: parts.children,
        })
    }

    fn rewrite(&mut self, node: &Arc<PlanNode>, parts: &mut FragmentParts) -> Result<Arc<PlanNode>, PlanningError> {
        match node.as_ref() {
            PlanNode::Exchange(exchange) if exchange.scope == ExchangeScope::Remote => {
                self.cut_exchange(exchange, parts)
            }
            PlanNode::TableScan(scan) => {
                parts.add_partitions(&scan.partitions);
                Ok(Arc::clone(node))
            }
            PlanNode::RemoteSource(_) | PlanNode::GroupReference(_) => Err(PlanningError::UnsupportedNode {
                pass: "PlanFragmenter",
                node: node.name(),
            }),
            _ => {
                let sources = node.sources();
                if sources.is_empty() {
                    return Ok(Arc::clone(node));
                }
                let children = sources
                    .iter()
                    .map(|source| self.rewrite(source, parts))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Arc::new(node.replace_children(children)))
            }
        }
    }

    fn cut_exchange(
        &mut self,
        exchange: &ExchangeNode,
        parts: &mut FragmentParts,
    ) -> Result<Arc<PlanNode>, PlanningError> {
        let mut source_fragments = Vec::with_capacity(exchange.sources.len());
        let mut expected_sources = 0;
        for (source, inputs) in exchange.sources.iter().zip(&exchange.inputs) {
            let partitioning = exchange
                .partition_keys()
                .iter()
                .map(|key| {
                    exchange
                        .outputs
                        .iter()
                        .position(|output| output == key)
                        .and_then(|index| inputs.get(index).cloned())
                        .ok_or_else(|| {
                            PlanningError::Internal(format!(
                                "partition key {} is not an output of exchange {}",
                                key, exchange.id
                            ))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let id = self.next_id();
            let child = self.create_fragment(id, source, Some(exchange.id), inputs.clone(), partitioning)?;
            expected_sources += child.fragment.task_count();
            source_fragments.push(id);
            parts.children.push(child);
        }
        parts.remote_sources.push(exchange.id);
        Ok(Arc::new(PlanNode::RemoteSource(RemoteSourceNode {
            id: exchange.id,
            source_fragments,
            outputs: exchange.outputs.clone(),
            expected_sources,
        })))
    }
}
