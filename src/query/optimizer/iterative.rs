use std::sync::Arc;

use tracing::{debug, trace};

use super::memo::Memo;
use crate::metrics;
use crate::query::plan::{GroupId, PlanNode, PlanNodeIdAllocator, PlanningError, SymbolAllocator};

/// What a rule can see and allocate while rewriting one node
pub struct RuleContext<'c> {
    memo: &'c Memo,
    pub ids: &'c mut PlanNodeIdAllocator,
    pub symbols: &'c mut SymbolAllocator,
}

impl<'c> RuleContext<'c> {
    /// Looks through a group reference to the node it currently stands for
    pub fn resolve<'n>(&'n self, node: &'n Arc<PlanNode>) -> &'n Arc<PlanNode> {
        self.memo.resolve(node)
    }
}

/// A local rewrite of one plan node.
///
/// Rules must detect their own no-op case and return `None` for it, otherwise the
/// optimizer keeps firing them until it hits its application limit.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap type filter, checked before `apply`
    fn matches(&self, node: &PlanNode) -> bool;

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError>;
}

/// Applies rules to every group of a memo until no rule fires anywhere
pub struct IterativeOptimizer {
    rules: Vec<Box<dyn Rule>>,
    max_rule_applications: usize,
}

impl IterativeOptimizer {
    pub fn new(rules: Vec<Box<dyn Rule>>, max_rule_applications: usize) -> Self {
        Self {
            rules,
            max_rule_applications,
        }
    }

    pub fn optimize(
        &self,
        plan: &Arc<PlanNode>,
        ids: &mut PlanNodeIdAllocator,
        symbols: &mut SymbolAllocator,
    ) -> Result<Arc<PlanNode>, PlanningError> {
        let mut memo = Memo::new(plan, ids);
        let mut applications = 0;
        let root = memo.root_group();
        self.explore_group(&mut memo, root, ids, symbols, &mut applications)?;
        debug!(
            "Iterative pass fired {} rules over {} groups",
            applications,
            memo.group_count()
        );
        memo.extract()
    }

    fn explore_group(
        &self,
        memo: &mut Memo,
        group: GroupId,
        ids: &mut PlanNodeIdAllocator,
        symbols: &mut SymbolAllocator,
        applications: &mut usize,
    ) -> Result<bool, PlanningError> {
        let mut progress = false;
        loop {
            let node_progress = self.explore_node(memo, group, ids, symbols, applications)?;
            let children_progress = self.explore_children(memo, group, ids, symbols, applications)?;
            if !node_progress && !children_progress {
                break;
            }
            progress = true;
        }
        Ok(progress)
    }

    fn explore_node(
        &self,
        memo: &mut Memo,
        group: GroupId,
        ids: &mut PlanNodeIdAllocator,
        symbols: &mut SymbolAllocator,
        applications: &mut usize,
    ) -> Result<bool, PlanningError> {
        let mut progress = false;
        'restart: loop {
            let node = Arc::clone(memo.node(group));
            for rule in &self.rules {
                if !rule.matches(&node) {
                    continue;
                }
                let replacement = {
                    let mut ctx = RuleContext {
                        memo: &*memo,
                        ids: &mut *ids,
                        symbols: &mut *symbols,
                    };
                    rule.apply(&node, &mut ctx)?
                };
                if let Some(replacement) = replacement {
                    *applications += 1;
                    if *applications > self.max_rule_applications {
                        return Err(PlanningError::RuleLimitExceeded(self.max_rule_applications));
                    }
                    trace!("Rule {} rewrote {} {}", rule.name(), node.name(), node.id());
                    metrics::record_rule_fired(rule.name());
                    memo.replace(group, replacement, ids);
                    progress = true;
                    continue 'restart;
                }
            }
            break;
        }
        Ok(progress)
    }

    fn explore_children(
        &self,
        memo: &mut Memo,
        group: GroupId,
        ids: &mut PlanNodeIdAllocator,
        symbols: &mut SymbolAllocator,
        applications: &mut usize,
    ) -> Result<bool, PlanningError> {
        let mut progress = false;
        for child in memo.node(group).sources() {
            let PlanNode::GroupReference(reference) = child.as_ref() else {
                return Err(PlanningError::Internal(format!(
                    "{} {} inside the memo is not a group reference",
                    child.name(),
                    child.id()
                )));
            };
            if self.explore_group(memo, reference.group, ids, symbols, applications)? {
                progress = true;
            }
        }
        Ok(progress)
    }
}
