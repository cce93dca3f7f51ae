use std::sync::Arc;

use crate::page::Value;
use crate::query::optimizer::iterative::{Rule, RuleContext};
use crate::query::plan::{Expression, FilterNode, PlanNode, PlanningError, ValuesNode};

/// Folds a filter over a filter into one filter with the conjunction of both predicates
pub struct MergeAdjacentFilters;

impl Rule for MergeAdjacentFilters {
    fn name(&self) -> &'static str {
        "MergeAdjacentFilters"
    }

    fn matches(&self, node: &PlanNode) -> bool {
        matches!(node, PlanNode::Filter(_))
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError> {
        let PlanNode::Filter(outer) = node else {
            return Ok(None);
        };
        let PlanNode::Filter(inner) = ctx.resolve(&outer.source).as_ref() else {
            return Ok(None);
        };
        Ok(Some(Arc::new(PlanNode::Filter(FilterNode {
            id: outer.id,
            source: Arc::clone(&inner.source),
            predicate: Expression::and(inner.predicate.clone(), outer.predicate.clone()),
        }))))
    }
}

/// Drops filters whose predicate is a constant: TRUE keeps every row, FALSE and NULL
/// keep none
pub struct RemoveTrivialFilters;

impl Rule for RemoveTrivialFilters {
    fn name(&self) -> &'static str {
        "RemoveTrivialFilters"
    }

    fn matches(&self, node: &PlanNode) -> bool {
        matches!(node, PlanNode::Filter(_))
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError> {
        let PlanNode::Filter(filter) = node else {
            return Ok(None);
        };
        let outputs = ctx.resolve(&filter.source).output_symbols();
        match &filter.predicate {
            Expression::Literal {
                value: Value::Boolean(true),
                ..
            } => Ok(Some(Arc::clone(&filter.source))),
            Expression::Literal {
                value: Value::Boolean(false) | Value::Null,
                ..
            } => Ok(Some(Arc::new(PlanNode::Values(ValuesNode {
                id: ctx.ids.next_id(),
                outputs,
                rows: Vec::new(),
            })))),
            _ => Ok(None),
        }
    }
}
