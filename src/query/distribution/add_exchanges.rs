use std::sync::Arc;

use tracing::debug;

use super::properties::{derive_properties, ActualProperties, Distribution};
use crate::query::plan::{
    ExchangeKind, ExchangeNode, ExchangeScope, PlanNode, PlanNodeIdAllocator, PlanningError, Symbol,
};

struct PlanWithProperties {
    node: Arc<PlanNode>,
    properties: ActualProperties,
}

/// Inserts remote exchanges wherever a node needs its input distributed differently
/// from how it is produced.
pub struct AddExchanges<'a> {
    ids: &'a mut PlanNodeIdAllocator,
    force_single_node: bool,
    inserted: usize,
}

impl<'a> AddExchanges<'a> {
    pub fn new(ids: &'a mut PlanNodeIdAllocator, force_single_node: bool) -> Self {
        Self {
            ids,
            force_single_node,
            inserted: 0,
        }
    }

    pub fn optimize(mut self, plan: &Arc<PlanNode>) -> Result<Arc<PlanNode>, PlanningError> {
        let planned = self.visit(plan)?;
        debug!("Added {} remote exchanges", self.inserted);
        Ok(planned.node)
    }

    fn visit(&mut self, node: &Arc<PlanNode>) -> Result<PlanWithProperties, PlanningError> {
        let sources = match node.as_ref() {
            PlanNode::TableScan(_) | PlanNode::Values(_) => Vec::new(),
            PlanNode::Filter(filter) => vec![self.visit(&filter.source)?],
            PlanNode::Projection(project) => vec![self.visit(&project.source)?],
            PlanNode::Output(output) => {
                let source = self.visit(&output.source)?;
                vec![self.require_undistributed(source)?]
            }
            PlanNode::Aggregation(aggregation) => {
                let source = self.visit(&aggregation.source)?;
                let keys = &aggregation.grouping_keys;
                let source = if keys.is_empty() || self.force_single_node {
                    self.require_undistributed(source)?
                } else if source.properties.distribution == Distribution::Single
                    || source.properties.is_partitioned_on(keys)
                {
                    source
                } else {
                    self.add_exchange(
                        source,
                        ExchangeKind::Repartition {
                            partition_keys: keys.clone(),
                        },
                    )?
                };
                vec![source]
            }
            // both join inputs are always hash partitioned on their join keys
            PlanNode::Join(join) => {
                let left_keys: Vec<Symbol> = join.criteria.iter().map(|c| c.left.clone()).collect();
                let right_keys: Vec<Symbol> = join.criteria.iter().map(|c| c.right.clone()).collect();
                let left = self.visit(&join.left)?;
                let left = self.require_partitioning(left, left_keys)?;
                let right = self.visit(&join.right)?;
                let right = self.require_partitioning(right, right_keys)?;
                vec![left, right]
            }
            PlanNode::Exchange(_) | PlanNode::RemoteSource(_) | PlanNode::GroupReference(_) => {
                return Err(PlanningError::UnsupportedNode {
                    pass: "AddExchanges",
                    node: node.name(),
                })
            }
        };

        let (children, inputs): (Vec<_>, Vec<_>) = sources.into_iter().map(|s| (s.node, s.properties)).unzip();
        let node = if children.is_empty() {
            Arc::clone(node)
        } else {
            Arc::new(node.replace_children(children))
        };
        let properties = derive_properties(&node, &inputs)?;
        Ok(PlanWithProperties { node, properties })
    }

    fn require_undistributed(&mut self, source: PlanWithProperties) -> Result<PlanWithProperties, PlanningError> {
        if source.properties.is_undistributed() {
            return Ok(source);
        }
        self.add_exchange(source, ExchangeKind::Gather)
    }

    fn require_partitioning(
        &mut self,
        source: PlanWithProperties,
        keys: Vec<Symbol>,
    ) -> Result<PlanWithProperties, PlanningError> {
        if source.properties.is_partitioned_on(&keys) {
            return Ok(source);
        }
        let kind = if keys.is_empty() {
            ExchangeKind::Gather
        } else {
            ExchangeKind::Repartition { partition_keys: keys }
        };
        self.add_exchange(source, kind)
    }

    fn add_exchange(
        &mut self,
        source: PlanWithProperties,
        kind: ExchangeKind,
    ) -> Result<PlanWithProperties, PlanningError> {
        let exchange = ExchangeNode::new(self.ids.next_id(), ExchangeScope::Remote, kind, source.node);
        debug!(
            "Inserting remote exchange {} above {} ({:?} input)",
            exchange.id,
            exchange.sources[0].name(),
            source.properties.distribution
        );
        self.inserted += 1;
        let node = Arc::new(PlanNode::Exchange(exchange));
        let properties = derive_properties(&node, &[source.properties])?;
        Ok(PlanWithProperties { node, properties })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DataType;
    use crate::query::plan::test_support::*;
    use crate::query::plan::{
        Aggregation, AggregateFunction, AggregationNode, AggregationStep, EquiJoinClause, JoinNode, OutputNode,
        PlanNodeId,
    };
    use crate::spi::Partitions;

    fn two_nodes() -> Partitions {
        let mut partitions = Partitions::new();
        partitions.insert("node-1".to_string(), vec![0, 1]);
        partitions.insert("node-2".to_string(), vec![2]);
        partitions
    }

    fn grouped_sum(partitions: Partitions) -> Arc<PlanNode> {
        let host = Symbol::new("host", DataType::Varchar);
        let value = Symbol::new("value", DataType::Double);
        let total = Symbol::new("total", DataType::Double);
        let scan = table_scan(0, "cpu", &[("host", DataType::Varchar), ("value", DataType::Double)], partitions);
        let aggregation = Arc::new(PlanNode::Aggregation(AggregationNode {
            id: PlanNodeId(1),
            source: scan,
            grouping_keys: vec![host.clone()],
            aggregations: vec![(
                total.clone(),
                Aggregation {
                    function: AggregateFunction::Sum,
                    argument: Some(value),
                    output_type: DataType::Double,
                },
            )],
            step: AggregationStep::Single,
        }));
        Arc::new(PlanNode::Output(OutputNode {
            id: PlanNodeId(2),
            source: aggregation,
            column_names: vec!["host".to_string(), "total".to_string()],
            outputs: vec![host, total],
        }))
    }

    fn exchanges(plan: &PlanNode) -> Vec<ExchangeKind> {
        let mut kinds = Vec::new();
        plan.walk(&mut |node| {
            if let PlanNode::Exchange(exchange) = node {
                assert_eq!(exchange.scope, ExchangeScope::Remote);
                kinds.push(exchange.kind.clone());
            }
        });
        kinds
    }

    #[test]
    fn test_single_node_plan_needs_no_exchange() {
        let plan = grouped_sum(single_partition());
        let mut ids = PlanNodeIdAllocator::starting_after(plan.max_id());
        let planned = AddExchanges::new(&mut ids, false).optimize(&plan).unwrap();
        assert!(exchanges(&planned).is_empty());
    }

    #[test]
    fn test_grouped_aggregation_repartitions_on_keys() {
        let plan = grouped_sum(two_nodes());
        let mut ids = PlanNodeIdAllocator::starting_after(plan.max_id());
        let planned = AddExchanges::new(&mut ids, false).optimize(&plan).unwrap();
        assert_eq!(
            exchanges(&planned),
            vec![ExchangeKind::Repartition {
                partition_keys: vec![Symbol::new("host", DataType::Varchar)]
            }]
        );
    }

    /// `cpu` joined to `mem` on `host = name`
    fn host_join(left: Partitions, right: Partitions) -> Arc<PlanNode> {
        let host = Symbol::new("host", DataType::Varchar);
        let value = Symbol::new("value", DataType::Double);
        let name = Symbol::new("name", DataType::Varchar);
        let used = Symbol::new("used", DataType::Double);
        let cpu = table_scan(0, "cpu", &[("host", DataType::Varchar), ("value", DataType::Double)], left);
        let mem = table_scan(1, "mem", &[("name", DataType::Varchar), ("used", DataType::Double)], right);
        let join = Arc::new(PlanNode::Join(JoinNode {
            id: PlanNodeId(2),
            left: cpu,
            right: mem,
            criteria: vec![EquiJoinClause {
                left: host.clone(),
                right: name.clone(),
            }],
            outputs: vec![host.clone(), value.clone(), name.clone(), used.clone()],
        }));
        Arc::new(PlanNode::Output(OutputNode {
            id: PlanNodeId(3),
            source: join,
            column_names: vec!["host".into(), "value".into(), "name".into(), "used".into()],
            outputs: vec![host, value, name, used],
        }))
    }

    fn join_inputs(plan: &PlanNode) -> Vec<Arc<PlanNode>> {
        let mut inputs = Vec::new();
        plan.walk(&mut |node| {
            if let PlanNode::Join(join) = node {
                inputs = vec![Arc::clone(&join.left), Arc::clone(&join.right)];
            }
        });
        inputs
    }

    #[test]
    fn test_join_repartitions_both_sides_on_their_keys() {
        for (left, right) in [(two_nodes(), two_nodes()), (single_partition(), two_nodes())] {
            let plan = host_join(left, right);
            let mut ids = PlanNodeIdAllocator::starting_after(plan.max_id());
            let planned = AddExchanges::new(&mut ids, false).optimize(&plan).unwrap();

            let inputs = join_inputs(&planned);
            assert_eq!(inputs.len(), 2);
            for (input, key) in inputs.iter().zip(["host", "name"]) {
                let PlanNode::Exchange(exchange) = input.as_ref() else {
                    panic!("join input {} is not an exchange", input.name());
                };
                assert_eq!(exchange.scope, ExchangeScope::Remote);
                assert_eq!(
                    exchange.kind,
                    ExchangeKind::Repartition {
                        partition_keys: vec![Symbol::new(key, DataType::Varchar)]
                    }
                );
                assert!(matches!(exchange.sources[0].as_ref(), PlanNode::TableScan(_)));
            }
        }
    }

    #[test]
    fn test_forced_single_node_gathers() {
        let plan = grouped_sum(two_nodes());
        let mut ids = PlanNodeIdAllocator::starting_after(plan.max_id());
        let planned = AddExchanges::new(&mut ids, true).optimize(&plan).unwrap();
        assert_eq!(exchanges(&planned), vec![ExchangeKind::Gather]);
    }

    #[test]
    fn test_existing_exchange_is_rejected() {
        let plan = grouped_sum(two_nodes());
        let mut ids = PlanNodeIdAllocator::starting_after(plan.max_id());
        let planned = AddExchanges::new(&mut ids, false).optimize(&plan).unwrap();
        let mut ids = PlanNodeIdAllocator::starting_after(planned.max_id());
        assert!(matches!(
            AddExchanges::new(&mut ids, false).optimize(&planned),
            Err(PlanningError::UnsupportedNode { .. })
        ));
    }
}
