use std::collections::HashSet;
use std::sync::Arc;

use crate::query::optimizer::iterative::{Rule, RuleContext};
use crate::query::plan::{PlanNode, PlanningError, Symbol};

/// Removes a projection that passes exactly its source's outputs through unchanged.
///
/// A projection that renames, computes, or drops columns is kept.
pub struct RemoveIdentityProjection;

impl Rule for RemoveIdentityProjection {
    fn name(&self) -> &'static str {
        "RemoveIdentityProjection"
    }

    fn matches(&self, node: &PlanNode) -> bool {
        matches!(node, PlanNode::Projection(_))
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError> {
        let PlanNode::Projection(project) = node else {
            return Ok(None);
        };
        if !project.assignments.is_identity() {
            return Ok(None);
        }
        let outputs: HashSet<Symbol> = project.assignments.outputs().into_iter().collect();
        let source_outputs: HashSet<Symbol> = ctx.resolve(&project.source).output_symbols().into_iter().collect();
        if outputs != source_outputs {
            return Ok(None);
        }
        Ok(Some(Arc::clone(&project.source)))
    }
}
