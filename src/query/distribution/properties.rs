//! Physical properties of a plan's output, derived bottom-up node by node.
//!
//! Two independent facts are tracked: how rows are spread over tasks
//! ([`ActualProperties`]) and whether a task sees them as one stream
//! ([`StreamProperties`]).

use crate::query::plan::{AggregationStep, ExchangeKind, ExchangeScope, PlanNode, PlanningError, Symbol};

/// How the rows of a plan are spread over tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// Every row is produced by one task
    Single,
    /// Rows come from several tasks with no known relationship between them
    Multiple,
    /// Rows were hash partitioned on the partitioning symbols
    Fixed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActualProperties {
    pub distribution: Distribution,
    /// Hash partitioning symbols, empty when unknown
    pub partitioning: Vec<Symbol>,
}

impl ActualProperties {
    pub fn single() -> Self {
        Self {
            distribution: Distribution::Single,
            partitioning: Vec::new(),
        }
    }

    pub fn multiple() -> Self {
        Self {
            distribution: Distribution::Multiple,
            partitioning: Vec::new(),
        }
    }

    pub fn fixed(partitioning: Vec<Symbol>) -> Self {
        Self {
            distribution: Distribution::Fixed,
            partitioning,
        }
    }

    /// True when no node-to-node movement is needed to see every row in one place
    pub fn is_undistributed(&self) -> bool {
        self.distribution != Distribution::Multiple
    }

    /// True when all rows agreeing on `keys` were sent to the same task
    pub fn is_partitioned_on(&self, keys: &[Symbol]) -> bool {
        self.distribution == Distribution::Fixed
            && !self.partitioning.is_empty()
            && self.partitioning.iter().all(|p| keys.contains(p))
    }

    /// Renames the partitioning symbols; partitioning is lost if any symbol does not survive
    fn translate(&self, f: impl Fn(&Symbol) -> Option<Symbol>) -> Self {
        let translated: Option<Vec<Symbol>> = self.partitioning.iter().map(f).collect();
        Self {
            distribution: self.distribution,
            partitioning: translated.unwrap_or_default(),
        }
    }
}

/// Derives the distribution of `node` from the distributions of its sources, in order
pub fn derive_properties(node: &PlanNode, inputs: &[ActualProperties]) -> Result<ActualProperties, PlanningError> {
    let first = || {
        inputs
            .first()
            .cloned()
            .ok_or_else(|| PlanningError::Internal(format!("{} {} has no input properties", node.name(), node.id())))
    };
    let properties = match node {
        PlanNode::TableScan(scan) => {
            if scan.partitions.len() > 1 {
                ActualProperties::multiple()
            } else {
                ActualProperties::single()
            }
        }
        PlanNode::Values(_) | PlanNode::RemoteSource(_) => ActualProperties::single(),
        PlanNode::Filter(_) | PlanNode::Output(_) => first()?,
        PlanNode::Projection(project) => first()?.translate(|symbol| {
            project
                .assignments
                .iter()
                .filter(|(_, e)| e.as_symbol() == Some(symbol))
                .map(|(s, _)| s.clone())
                .min_by_key(|s| s != symbol)
        }),
        PlanNode::Aggregation(aggregation) => first()?.translate(|symbol| {
            aggregation.grouping_keys.contains(symbol).then(|| symbol.clone())
        }),
        PlanNode::Join(join) => {
            let keys = join.criteria.iter().map(|c| c.left.clone()).collect();
            ActualProperties::fixed(keys).translate(|symbol| join.outputs.contains(symbol).then(|| symbol.clone()))
        }
        PlanNode::Exchange(exchange) => match (exchange.scope, &exchange.kind) {
            (ExchangeScope::Remote, ExchangeKind::Gather) => ActualProperties::single(),
            (ExchangeScope::Remote, ExchangeKind::Repartition { partition_keys }) => {
                ActualProperties::fixed(partition_keys.clone())
            }
            (ExchangeScope::Local, _) => first()?,
        },
        PlanNode::GroupReference(_) => {
            return Err(PlanningError::UnsupportedNode {
                pass: "property derivation",
                node: node.name(),
            })
        }
    };
    Ok(properties)
}

/// Whether a task consumes a plan's rows as one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProperties {
    pub single_stream: bool,
}

impl StreamProperties {
    pub fn single() -> Self {
        Self { single_stream: true }
    }

    pub fn multiple() -> Self {
        Self { single_stream: false }
    }
}

/// Derives the stream properties of `node` from those of its sources.
///
/// Nodes that need a single stream are expected to have had it enforced already.
pub fn derive_stream_properties(
    node: &PlanNode,
    inputs: &[StreamProperties],
) -> Result<StreamProperties, PlanningError> {
    let properties = match node {
        // one stream per shard a task reads
        PlanNode::TableScan(scan) => {
            if scan.partitions.values().any(|shards| shards.len() > 1) {
                StreamProperties::multiple()
            } else {
                StreamProperties::single()
            }
        }
        PlanNode::Values(_) | PlanNode::RemoteSource(_) | PlanNode::Join(_) | PlanNode::Output(_) => {
            StreamProperties::single()
        }
        PlanNode::Exchange(_) => StreamProperties::single(),
        PlanNode::Aggregation(aggregation) if aggregation.step != AggregationStep::Partial => {
            StreamProperties::single()
        }
        PlanNode::Filter(_) | PlanNode::Projection(_) | PlanNode::Aggregation(_) => inputs
            .first()
            .copied()
            .ok_or_else(|| PlanningError::Internal(format!("{} {} has no input properties", node.name(), node.id())))?,
        PlanNode::GroupReference(_) => {
            return Err(PlanningError::UnsupportedNode {
                pass: "stream property derivation",
                node: node.name(),
            })
        }
    };
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DataType;
    use crate::query::plan::test_support::*;
    use crate::query::plan::{Assignments, PlanNodeId, ProjectNode};
    use crate::spi::Partitions;
    use std::sync::Arc;

    #[test]
    fn test_scan_distribution_follows_partitions() {
        let scan = table_scan(0, "cpu", &[("host", DataType::Varchar)], single_partition());
        assert_eq!(derive_properties(&scan, &[]).unwrap(), ActualProperties::single());
        assert!(derive_stream_properties(&scan, &[]).unwrap().single_stream);

        let mut partitions = Partitions::new();
        partitions.insert("node-1".to_string(), vec![0, 1]);
        partitions.insert("node-2".to_string(), vec![2]);
        let scan = table_scan(0, "cpu", &[("host", DataType::Varchar)], partitions);
        assert_eq!(derive_properties(&scan, &[]).unwrap(), ActualProperties::multiple());
        assert!(!derive_stream_properties(&scan, &[]).unwrap().single_stream);
    }

    #[test]
    fn test_partitioning_survives_renaming_only_when_preserved() {
        let host = Symbol::new("host", DataType::Varchar);
        let server = Symbol::new("server", DataType::Varchar);
        let scan = table_scan(0, "cpu", &[("host", DataType::Varchar)], single_partition());
        let mut assignments = Assignments::new();
        assignments.put(server.clone(), host.to_reference());
        let project = PlanNode::Projection(ProjectNode {
            id: PlanNodeId(1),
            source: Arc::clone(&scan),
            assignments,
        });
        let input = ActualProperties::fixed(vec![host.clone()]);
        let derived = derive_properties(&project, &[input.clone()]).unwrap();
        assert_eq!(derived.partitioning, vec![server.clone()]);
        assert!(derived.is_partitioned_on(&[server]));

        let dropping = PlanNode::Projection(ProjectNode {
            id: PlanNodeId(1),
            source: scan,
            assignments: Assignments::new(),
        });
        let derived = derive_properties(&dropping, &[input]).unwrap();
        assert_eq!(derived.distribution, Distribution::Fixed);
        assert!(derived.partitioning.is_empty());
        assert!(!derived.is_partitioned_on(&[host]));
    }
}
