//! Plan optimization: rule-driven rewriting over a memo, followed by exchange placement.

pub mod iterative;
pub mod memo;
pub mod rules;

pub use iterative::{IterativeOptimizer, Rule, RuleContext};
pub use memo::Memo;

use std::time::Instant;

use tracing::{debug, info};

use crate::config::OptimizerConfig;
use crate::query::distribution::{AddExchanges, AddLocalExchanges};
use crate::query::plan::printer::explain;
use crate::query::plan::PlanningError;
use crate::query::planner::LogicalPlan;

/// Runs the optimizer passes in order:
/// cleanup rules, remote exchanges, exchange rules, local exchanges
pub struct PlanOptimizer {
    config: OptimizerConfig,
}

impl PlanOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn optimize(&self, plan: LogicalPlan) -> Result<LogicalPlan, PlanningError> {
        let start = Instant::now();
        let LogicalPlan {
            root,
            mut symbols,
            mut ids,
        } = plan;

        let cleanup = IterativeOptimizer::new(rules::cleanup_rules(), self.config.max_rule_applications);
        let root = cleanup.optimize(&root, &mut ids, &mut symbols)?;
        debug!("After cleanup rules:\n{}", explain(&root));

        let root = AddExchanges::new(&mut ids, self.config.force_single_node).optimize(&root)?;

        let exchange = IterativeOptimizer::new(
            rules::exchange_rules(!self.config.force_single_node),
            self.config.max_rule_applications,
        );
        let root = exchange.optimize(&root, &mut ids, &mut symbols)?;

        let root = AddLocalExchanges::new(&mut ids).optimize(&root)?;
        info!(
            "Optimized plan with {} nodes in {:?}",
            root.count_nodes(&|_| true),
            start.elapsed()
        );
        debug!("Optimized plan:\n{}", explain(&root));
        Ok(LogicalPlan { root, symbols, ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::analyzer::test_support::analyzer;
    use crate::query::ast::{BinaryOperator, Expr, Query, Relation};
    use crate::query::plan::{AggregationStep, PlanNode, PlanNodeIdAllocator, SymbolAllocator};
    use crate::query::planner::LogicalPlanner;

    fn logical(query: &Query) -> LogicalPlan {
        let analysis = analyzer().analyze(query).unwrap();
        LogicalPlanner::new(&analysis).plan().unwrap()
    }

    #[test]
    fn test_cleanup_converges() {
        let query = Query::new(Relation::table("cpu"))
            .select(Expr::column("host"))
            .select_as(Expr::function("avg", vec![Expr::column("value")]), "mean")
            .filter(Expr::binary(Expr::column("value"), BinaryOperator::Gt, Expr::int(0)))
            .group_by(Expr::column("host"));
        let mut plan = logical(&query);
        let cleanup = IterativeOptimizer::new(rules::cleanup_rules(), 10_000);
        let once = cleanup.optimize(&plan.root, &mut plan.ids, &mut plan.symbols).unwrap();

        let mut ids = PlanNodeIdAllocator::starting_after(once.max_id());
        let mut symbols = SymbolAllocator::new();
        symbols.reserve(once.all_symbols());
        let twice = cleanup.optimize(&once, &mut ids, &mut symbols).unwrap();
        assert_eq!(twice, once);
        // region and time are never read
        let mut scanned = Vec::new();
        once.walk(&mut |node| {
            if let PlanNode::TableScan(scan) = node {
                scanned = scan.outputs.iter().map(|s| s.name().to_string()).collect();
            }
        });
        assert_eq!(scanned, vec!["host", "value"]);
    }

    #[test]
    fn test_single_partition_select_has_no_exchange() {
        let query = Query::new(Relation::table("cpu")).select(Expr::column("host"));
        let optimized = PlanOptimizer::new(OptimizerConfig::default())
            .optimize(logical(&query))
            .unwrap();
        assert_eq!(optimized.root.count_nodes(&|n| matches!(n, PlanNode::Exchange(_))), 0);
        // the output projection was an identity over the pruned scan
        assert_eq!(optimized.root.count_nodes(&|n| matches!(n, PlanNode::Projection(_))), 0);
    }

    #[test]
    fn test_rule_limit_is_enforced() {
        let query = Query::new(Relation::table("cpu")).select(Expr::column("host"));
        let config = OptimizerConfig {
            max_rule_applications: 1,
            ..OptimizerConfig::default()
        };
        assert!(matches!(
            PlanOptimizer::new(config).optimize(logical(&query)),
            Err(PlanningError::RuleLimitExceeded(1))
        ));
    }

    #[test]
    fn test_no_partial_aggregation_without_exchange() {
        let query = Query::new(Relation::table("cpu"))
            .select(Expr::function("sum", vec![Expr::column("value")]))
            .group_by(Expr::column("host"));
        let optimized = PlanOptimizer::new(OptimizerConfig::default())
            .optimize(logical(&query))
            .unwrap();
        let steps = optimized.root.count_nodes(&|n| {
            matches!(n, PlanNode::Aggregation(a) if a.step == AggregationStep::Single)
        });
        assert_eq!(steps, 1);
    }
}
