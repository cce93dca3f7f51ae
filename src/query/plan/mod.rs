//! Plan node model shared by the planner, optimizer, fragmenter and task planner.
//!
//! Outside the optimizer a plan is a strict tree of `Arc<PlanNode>`; inside the memo
//! children are `GroupReference` nodes pointing at equivalence groups.

pub mod assignments;
pub mod expression;
pub mod printer;
pub mod symbol;

pub use assignments::Assignments;
pub use expression::{ArithmeticOperator, ComparisonOperator, Expression};
pub use symbol::{PlanNodeIdAllocator, Symbol, SymbolAllocator, SymbolMapper};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::page::{DataType, Value};
use crate::spi::{Partitions, TableHandle};

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("Unsupported plan node {node} in {pass}")]
    UnsupportedNode { pass: &'static str, node: &'static str },
    #[error("Unsupported join criteria: {0}")]
    UnsupportedJoin(String),
    #[error("Optimizer exceeded {0} rule applications")]
    RuleLimitExceeded(usize),
    #[error("Internal planner error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanNodeId(pub u32);

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of an equivalence group inside the memo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId(pub u32);

impl FragmentId {
    pub const ROOT: FragmentId = FragmentId(0);
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// `count(*)`
    CountAll,
    Count,
    Sum,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::CountAll | AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }

    /// Function that combines partial results of this function
    pub fn final_function(&self) -> AggregateFunction {
        match self {
            AggregateFunction::CountAll | AggregateFunction::Count => AggregateFunction::Sum,
            other => *other,
        }
    }

    pub fn output_type(&self, input: Option<DataType>) -> DataType {
        match (self, input) {
            (AggregateFunction::CountAll | AggregateFunction::Count, _) => DataType::Bigint,
            (AggregateFunction::Sum, Some(DataType::Bigint)) => DataType::Bigint,
            (AggregateFunction::Sum, _) => DataType::Double,
            (_, Some(data_type)) => data_type,
            (_, None) => DataType::Bigint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationStep {
    Single,
    Partial,
    Final,
}

impl fmt::Display for AggregationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            AggregationStep::Single => "SINGLE",
            AggregationStep::Partial => "PARTIAL",
            AggregationStep::Final => "FINAL",
        };
        f.write_str(step)
    }
}

/// One aggregate call of an aggregation node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub function: AggregateFunction,
    pub argument: Option<Symbol>,
    pub output_type: DataType,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            Some(argument) => write!(f, "{}({})", self.function.name(), argument),
            None => write!(f, "{}(*)", self.function.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScanNode {
    pub id: PlanNodeId,
    pub table: TableHandle,
    pub outputs: Vec<Symbol>,
    /// Output symbol to table column
    pub assignments: Vec<(Symbol, String)>,
    pub partitions: Partitions,
}

impl TableScanNode {
    pub fn column_for(&self, symbol: &Symbol) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, column)| column.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub predicate: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub assignments: Assignments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub grouping_keys: Vec<Symbol>,
    pub aggregations: Vec<(Symbol, Aggregation)>,
    pub step: AggregationStep,
}

impl AggregationNode {
    /// Symbols read from the source
    pub fn input_symbols(&self) -> Vec<Symbol> {
        let mut inputs = self.grouping_keys.clone();
        for (_, aggregation) in &self.aggregations {
            if let Some(argument) = &aggregation.argument {
                if !inputs.contains(argument) {
                    inputs.push(argument.clone());
                }
            }
        }
        inputs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquiJoinClause {
    pub left: Symbol,
    pub right: Symbol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinNode {
    pub id: PlanNodeId,
    pub left: Arc<PlanNode>,
    pub right: Arc<PlanNode>,
    pub criteria: Vec<EquiJoinClause>,
    pub outputs: Vec<Symbol>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeScope {
    /// Between pipelines of one task
    Local,
    /// Between tasks, possibly on different nodes
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExchangeKind {
    Gather,
    Repartition { partition_keys: Vec<Symbol> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeNode {
    pub id: PlanNodeId,
    pub scope: ExchangeScope,
    pub kind: ExchangeKind,
    pub sources: Vec<Arc<PlanNode>>,
    /// For each source, the source symbols feeding `outputs` position by position
    pub inputs: Vec<Vec<Symbol>>,
    pub outputs: Vec<Symbol>,
}

impl ExchangeNode {
    /// Exchange with a single source whose outputs pass straight through
    pub fn new(id: PlanNodeId, scope: ExchangeScope, kind: ExchangeKind, source: Arc<PlanNode>) -> Self {
        let outputs = source.output_symbols();
        Self {
            id,
            scope,
            kind,
            sources: vec![source],
            inputs: vec![outputs.clone()],
            outputs,
        }
    }

    pub fn partition_keys(&self) -> &[Symbol] {
        match &self.kind {
            ExchangeKind::Gather => &[],
            ExchangeKind::Repartition { partition_keys } => partition_keys,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputNode {
    pub id: PlanNodeId,
    pub source: Arc<PlanNode>,
    pub column_names: Vec<String>,
    pub outputs: Vec<Symbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSourceNode {
    /// Same id as the remote exchange this node replaced
    pub id: PlanNodeId,
    pub source_fragments: Vec<FragmentId>,
    pub outputs: Vec<Symbol>,
    /// Number of upstream tasks that will send results
    pub expected_sources: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuesNode {
    pub id: PlanNodeId,
    pub outputs: Vec<Symbol>,
    pub rows: Vec<Vec<Value>>,
}

/// Placeholder for the current member of a memo group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReference {
    pub id: PlanNodeId,
    pub group: GroupId,
    pub outputs: Vec<Symbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanNode {
    TableScan(TableScanNode),
    Filter(FilterNode),
    Projection(ProjectNode),
    Aggregation(AggregationNode),
    Join(JoinNode),
    Exchange(ExchangeNode),
    Output(OutputNode),
    RemoteSource(RemoteSourceNode),
    Values(ValuesNode),
    GroupReference(GroupReference),
}

impl PlanNode {
    pub fn id(&self) -> PlanNodeId {
        match self {
            PlanNode::TableScan(node) => node.id,
            PlanNode::Filter(node) => node.id,
            PlanNode::Projection(node) => node.id,
            PlanNode::Aggregation(node) => node.id,
            PlanNode::Join(node) => node.id,
            PlanNode::Exchange(node) => node.id,
            PlanNode::Output(node) => node.id,
            PlanNode::RemoteSource(node) => node.id,
            PlanNode::Values(node) => node.id,
            PlanNode::GroupReference(node) => node.id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlanNode::TableScan(_) => "TableScan",
            PlanNode::Filter(_) => "Filter",
            PlanNode::Projection(_) => "Projection",
            PlanNode::Aggregation(_) => "Aggregation",
            PlanNode::Join(_) => "Join",
            PlanNode::Exchange(_) => "Exchange",
            PlanNode::Output(_) => "Output",
            PlanNode::RemoteSource(_) => "RemoteSource",
            PlanNode::Values(_) => "Values",
            PlanNode::GroupReference(_) => "GroupReference",
        }
    }

    /// Direct children, left to right; empty for leaves
    pub fn sources(&self) -> Vec<Arc<PlanNode>> {
        match self {
            PlanNode::TableScan(_)
            | PlanNode::RemoteSource(_)
            | PlanNode::Values(_)
            | PlanNode::GroupReference(_) => Vec::new(),
            PlanNode::Filter(node) => vec![node.source.clone()],
            PlanNode::Projection(node) => vec![node.source.clone()],
            PlanNode::Aggregation(node) => vec![node.source.clone()],
            PlanNode::Output(node) => vec![node.source.clone()],
            PlanNode::Join(node) => vec![node.left.clone(), node.right.clone()],
            PlanNode::Exchange(node) => node.sources.clone(),
        }
    }

    pub fn output_symbols(&self) -> Vec<Symbol> {
        match self {
            PlanNode::TableScan(node) => node.outputs.clone(),
            PlanNode::Filter(node) => node.source.output_symbols(),
            PlanNode::Projection(node) => node.assignments.outputs(),
            PlanNode::Aggregation(node) => {
                let mut outputs = node.grouping_keys.clone();
                outputs.extend(node.aggregations.iter().map(|(s, _)| s.clone()));
                outputs
            }
            PlanNode::Join(node) => node.outputs.clone(),
            PlanNode::Exchange(node) => node.outputs.clone(),
            PlanNode::Output(node) => node.outputs.clone(),
            PlanNode::RemoteSource(node) => node.outputs.clone(),
            PlanNode::Values(node) => node.outputs.clone(),
            PlanNode::GroupReference(node) => node.outputs.clone(),
        }
    }

    /// Returns a copy of this node with its children replaced, everything else kept.
    ///
    /// Children are matched to sources by position; a source with no replacement is kept.
    pub fn replace_children(&self, children: Vec<Arc<PlanNode>>) -> PlanNode {
        debug_assert_eq!(
            children.len(),
            self.sources().len(),
            "wrong number of children for {}",
            self.name()
        );
        let mut children = children.into_iter();
        let mut next = |current: &Arc<PlanNode>| children.next().unwrap_or_else(|| Arc::clone(current));
        match self {
            PlanNode::TableScan(_)
            | PlanNode::RemoteSource(_)
            | PlanNode::Values(_)
            | PlanNode::GroupReference(_) => self.clone(),
            PlanNode::Filter(node) => PlanNode::Filter(FilterNode {
                source: next(&node.source),
                ..node.clone()
            }),
            PlanNode::Projection(node) => PlanNode::Projection(ProjectNode {
                source: next(&node.source),
                ..node.clone()
            }),
            PlanNode::Aggregation(node) => PlanNode::Aggregation(AggregationNode {
                source: next(&node.source),
                ..node.clone()
            }),
            PlanNode::Output(node) => PlanNode::Output(OutputNode {
                source: next(&node.source),
                ..node.clone()
            }),
            PlanNode::Join(node) => {
                let left = next(&node.left);
                let right = next(&node.right);
                PlanNode::Join(JoinNode {
                    left,
                    right,
                    ..node.clone()
                })
            }
            PlanNode::Exchange(node) => {
                let sources = node.sources.iter().map(&mut next).collect();
                PlanNode::Exchange(ExchangeNode {
                    sources,
                    ..node.clone()
                })
            }
        }
    }

    /// Visits the tree in pre-order
    pub fn walk(&self, visit: &mut dyn FnMut(&PlanNode)) {
        visit(self);
        for source in self.sources() {
            source.walk(visit);
        }
    }

    /// Largest node id in the tree
    pub fn max_id(&self) -> PlanNodeId {
        let mut max = self.id();
        self.walk(&mut |node| max = max.max(node.id()));
        max
    }

    /// Every symbol produced anywhere in the tree
    pub fn all_symbols(&self) -> Vec<Symbol> {
        let mut symbols = Vec::new();
        self.walk(&mut |node| symbols.extend(node.output_symbols()));
        symbols
    }

    /// Number of nodes in the tree matching `predicate`
    pub fn count_nodes(&self, predicate: &dyn Fn(&PlanNode) -> bool) -> usize {
        let mut count = 0;
        self.walk(&mut |node| {
            if predicate(node) {
                count += 1;
            }
        });
        count
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_replace_children_keeps_node_fields() {
        let scan = table_scan(0, "cpu", &[("host", DataType::Varchar)], single_partition());
        let filter = PlanNode::Filter(FilterNode {
            id: PlanNodeId(1),
            source: scan.clone(),
            predicate: Expression::is_null(Symbol::new("host", DataType::Varchar).to_reference()),
        });
        let other = table_scan(7, "mem", &[("host", DataType::Varchar)], single_partition());
        let replaced = filter.replace_children(vec![other.clone()]);
        assert_eq!(replaced.id(), PlanNodeId(1));
        assert_eq!(replaced.sources()[0].id(), PlanNodeId(7));
        assert_eq!(replaced.max_id(), PlanNodeId(7));
    }

    #[test]
    fn test_aggregation_outputs_keys_then_aggregates() {
        let host = Symbol::new("host", DataType::Varchar);
        let value = Symbol::new("value", DataType::Double);
        let total = Symbol::new("total", DataType::Double);
        let scan = table_scan(0, "cpu", &[("host", DataType::Varchar), ("value", DataType::Double)], single_partition());
        let aggregation = PlanNode::Aggregation(AggregationNode {
            id: PlanNodeId(1),
            source: scan,
            grouping_keys: vec![host.clone()],
            aggregations: vec![(
                total.clone(),
                Aggregation {
                    function: AggregateFunction::Sum,
                    argument: Some(value.clone()),
                    output_type: DataType::Double,
                },
            )],
            step: AggregationStep::Single,
        });
        assert_eq!(aggregation.output_symbols(), vec![host.clone(), total]);
        if let PlanNode::Aggregation(node) = &aggregation {
            assert_eq!(node.input_symbols(), vec![host, value]);
        }
    }

    #[test]
    fn test_aggregate_function_final_step() {
        assert_eq!(AggregateFunction::Count.final_function(), AggregateFunction::Sum);
        assert_eq!(AggregateFunction::Max.final_function(), AggregateFunction::Max);
        assert_eq!(AggregateFunction::Sum.output_type(Some(DataType::Bigint)), DataType::Bigint);
        assert_eq!(AggregateFunction::Sum.output_type(Some(DataType::Double)), DataType::Double);
    }

    #[test]
    fn test_plan_serializes_to_json() {
        let scan = table_scan(0, "cpu", &[("host", DataType::Varchar)], single_partition());
        let encoded = serde_json::to_string(scan.as_ref()).unwrap();
        let decoded: PlanNode = serde_json::from_str(&encoded).unwrap();
        assert_eq!(&decoded, scan.as_ref());
    }
}
