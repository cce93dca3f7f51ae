//! Column pruning: each rule pushes the set of symbols a node reads down into its
//! source, narrowing the source's outputs.

use std::collections::HashSet;
use std::sync::Arc;

use super::{required_inputs, restrict_outputs};
use crate::query::optimizer::iterative::{Rule, RuleContext};
use crate::query::plan::{FilterNode, PlanNode, PlanningError, Symbol};

/// Restricts the single source of `node` to what `node` reads
fn prune_single_source(node: &PlanNode, ctx: &RuleContext<'_>) -> Option<Arc<PlanNode>> {
    let required = required_inputs(node)?;
    let source = node.sources().into_iter().next()?;
    let restricted = restrict_outputs(&source, &required, ctx)?;
    Some(Arc::new(node.replace_children(vec![restricted])))
}

pub struct PruneOutputSourceColumns;

impl Rule for PruneOutputSourceColumns {
    fn name(&self) -> &'static str {
        "PruneOutputSourceColumns"
    }

    fn matches(&self, node: &PlanNode) -> bool {
        matches!(node, PlanNode::Output(_))
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError> {
        Ok(prune_single_source(node, ctx))
    }
}

pub struct PruneProjectionSourceColumns;

impl Rule for PruneProjectionSourceColumns {
    fn name(&self) -> &'static str {
        "PruneProjectionSourceColumns"
    }

    fn matches(&self, node: &PlanNode) -> bool {
        matches!(node, PlanNode::Projection(_))
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError> {
        Ok(prune_single_source(node, ctx))
    }
}

pub struct PruneAggregationSourceColumns;

impl Rule for PruneAggregationSourceColumns {
    fn name(&self) -> &'static str {
        "PruneAggregationSourceColumns"
    }

    fn matches(&self, node: &PlanNode) -> bool {
        matches!(node, PlanNode::Aggregation(_))
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError> {
        Ok(prune_single_source(node, ctx))
    }
}

/// Pushes pruning through a filter: the filter's source keeps what the parent reads
/// plus what the predicate reads.
///
/// A filter cannot narrow its own outputs, so this looks at the filter from its parent.
pub struct PruneFilterSourceColumns;

impl Rule for PruneFilterSourceColumns {
    fn name(&self) -> &'static str {
        "PruneFilterSourceColumns"
    }

    fn matches(&self, node: &PlanNode) -> bool {
        matches!(
            node,
            PlanNode::Output(_) | PlanNode::Projection(_) | PlanNode::Aggregation(_)
        )
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError> {
        let Some(mut required) = required_inputs(node) else {
            return Ok(None);
        };
        let Some(source) = node.sources().into_iter().next() else {
            return Ok(None);
        };
        let PlanNode::Filter(filter) = ctx.resolve(&source).as_ref() else {
            return Ok(None);
        };
        required.extend(filter.predicate.symbols());
        let Some(restricted) = restrict_outputs(&filter.source, &required, ctx) else {
            return Ok(None);
        };
        let filter = Arc::new(PlanNode::Filter(FilterNode {
            id: filter.id,
            source: restricted,
            predicate: filter.predicate.clone(),
        }));
        Ok(Some(Arc::new(node.replace_children(vec![filter]))))
    }
}

/// Restricts each join input to the join outputs it provides plus its join keys
pub struct PruneJoinSourceColumns;

impl Rule for PruneJoinSourceColumns {
    fn name(&self) -> &'static str {
        "PruneJoinSourceColumns"
    }

    fn matches(&self, node: &PlanNode) -> bool {
        matches!(node, PlanNode::Join(_))
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError> {
        let PlanNode::Join(join) = node else {
            return Ok(None);
        };
        let outputs: HashSet<&Symbol> = join.outputs.iter().collect();
        let side_required = |side: &Arc<PlanNode>, keys: Vec<Symbol>| -> HashSet<Symbol> {
            let mut required: HashSet<Symbol> = ctx
                .resolve(side)
                .output_symbols()
                .into_iter()
                .filter(|s| outputs.contains(s))
                .collect();
            required.extend(keys);
            required
        };
        let left_required = side_required(&join.left, join.criteria.iter().map(|c| c.left.clone()).collect());
        let right_required = side_required(&join.right, join.criteria.iter().map(|c| c.right.clone()).collect());

        let left = restrict_outputs(&join.left, &left_required, ctx);
        let right = restrict_outputs(&join.right, &right_required, ctx);
        if left.is_none() && right.is_none() {
            return Ok(None);
        }
        Ok(Some(Arc::new(node.replace_children(vec![
            left.unwrap_or_else(|| Arc::clone(&join.left)),
            right.unwrap_or_else(|| Arc::clone(&join.right)),
        ]))))
    }
}
