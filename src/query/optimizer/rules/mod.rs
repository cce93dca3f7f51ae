//! Rewrite rules run by the iterative optimizer.

pub mod merge_filters;
pub mod prune_columns;
pub mod remove_identity_projection;
pub mod split_aggregation;

pub use merge_filters::{MergeAdjacentFilters, RemoveTrivialFilters};
pub use prune_columns::{
    PruneAggregationSourceColumns, PruneFilterSourceColumns, PruneJoinSourceColumns, PruneOutputSourceColumns,
    PruneProjectionSourceColumns,
};
pub use remove_identity_projection::RemoveIdentityProjection;
pub use split_aggregation::SplitAggregationAcrossExchange;

use std::collections::HashSet;
use std::sync::Arc;

use super::iterative::{Rule, RuleContext};
use crate::query::plan::{
    AggregationNode, JoinNode, PlanNode, ProjectNode, Symbol, TableScanNode, ValuesNode,
};

/// Rules run before exchanges are added, in registration order
pub fn cleanup_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(RemoveIdentityProjection),
        Box::new(MergeAdjacentFilters),
        Box::new(RemoveTrivialFilters),
        Box::new(PruneOutputSourceColumns),
        Box::new(PruneProjectionSourceColumns),
        Box::new(PruneAggregationSourceColumns),
        Box::new(PruneFilterSourceColumns),
        Box::new(PruneJoinSourceColumns),
    ]
}

/// Rules run once remote exchanges are in place
pub fn exchange_rules(split_aggregations: bool) -> Vec<Box<dyn Rule>> {
    let mut rules: Vec<Box<dyn Rule>> = Vec::new();
    if split_aggregations {
        rules.push(Box::new(SplitAggregationAcrossExchange));
    }
    rules.push(Box::new(RemoveIdentityProjection));
    rules
}

/// Narrows the outputs of `node` to the symbols in `required`.
///
/// Returns `None` when the node already produces nothing outside `required`, or when
/// it cannot drop outputs by itself. Row count and order are never changed.
pub(crate) fn restrict_outputs(
    node: &Arc<PlanNode>,
    required: &HashSet<Symbol>,
    ctx: &RuleContext<'_>,
) -> Option<Arc<PlanNode>> {
    let resolved = ctx.resolve(node);
    if resolved.output_symbols().iter().all(|s| required.contains(s)) {
        return None;
    }
    let keep = |symbol: &Symbol| required.contains(symbol);

    let restricted = match resolved.as_ref() {
        PlanNode::TableScan(scan) => PlanNode::TableScan(TableScanNode {
            outputs: scan.outputs.iter().filter(|s| keep(s)).cloned().collect(),
            assignments: scan.assignments.iter().filter(|(s, _)| keep(s)).cloned().collect(),
            ..scan.clone()
        }),
        PlanNode::Projection(project) => PlanNode::Projection(ProjectNode {
            assignments: project.assignments.filter(keep),
            ..project.clone()
        }),
        PlanNode::Values(values) => {
            let positions: Vec<usize> = values
                .outputs
                .iter()
                .enumerate()
                .filter(|(_, s)| keep(s))
                .map(|(i, _)| i)
                .collect();
            PlanNode::Values(ValuesNode {
                id: values.id,
                outputs: positions.iter().map(|&i| values.outputs[i].clone()).collect(),
                rows: values
                    .rows
                    .iter()
                    .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
                    .collect(),
            })
        }
        PlanNode::Aggregation(aggregation) => {
            // grouping keys define the rows, only aggregate calls can go
            let mut aggregations: Vec<_> = aggregation
                .aggregations
                .iter()
                .filter(|(s, _)| keep(s))
                .cloned()
                .collect();
            if aggregations.is_empty() && aggregation.grouping_keys.is_empty() {
                // a global aggregation still has to produce its single row
                aggregations = aggregation.aggregations.iter().take(1).cloned().collect();
            }
            if aggregations.len() == aggregation.aggregations.len() {
                return None;
            }
            PlanNode::Aggregation(AggregationNode {
                aggregations,
                ..aggregation.clone()
            })
        }
        PlanNode::Join(join) => PlanNode::Join(JoinNode {
            outputs: join.outputs.iter().filter(|s| keep(s)).cloned().collect(),
            ..join.clone()
        }),
        _ => return None,
    };
    Some(Arc::new(restricted))
}

/// Symbols a single-source node reads from its source
pub(crate) fn required_inputs(node: &PlanNode) -> Option<HashSet<Symbol>> {
    match node {
        PlanNode::Output(output) => Some(output.outputs.iter().cloned().collect()),
        PlanNode::Projection(project) => Some(project.assignments.expressions().flat_map(|e| e.symbols()).collect()),
        PlanNode::Aggregation(aggregation) => Some(aggregation.input_symbols().into_iter().collect()),
        _ => None,
    }
}
