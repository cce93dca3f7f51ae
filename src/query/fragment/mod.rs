//! Plan fragments: the independently dispatchable pieces of a distributed plan.

pub mod fragmenter;

pub use fragmenter::PlanFragmenter;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::query::plan::{FragmentId, PlanNode, PlanNodeId, Symbol};
use crate::spi::{NodeId, Partitions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFragment {
    pub id: FragmentId,
    pub root: Arc<PlanNode>,
    /// Shards scanned by this fragment, by owning node
    pub partitions: Partitions,
    /// Nodes the fragment's results are sent to; filled in when the query is scheduled
    pub receivers: Vec<NodeId>,
    /// Ids of the remote source nodes fed by child fragments
    pub remote_sources: Vec<PlanNodeId>,
    /// Id of the exchange in the parent fragment this fragment feeds; `None` for the root
    pub remote_parent_node_id: Option<PlanNodeId>,
    /// Symbols sent downstream, position by position
    pub output_layout: Vec<Symbol>,
    /// Symbols the output is hash partitioned on across receivers, empty to gather
    pub output_partitioning: Vec<Symbol>,
}

impl PlanFragment {
    /// Number of tasks the fragment runs as: a leaf runs once per node holding its
    /// shards, anything reading from other fragments runs as a single task
    pub fn task_count(&self) -> usize {
        if self.is_leaf() {
            self.partitions.len().max(1)
        } else {
            1
        }
    }

    /// True when no part of the fragment reads from another fragment
    pub fn is_leaf(&self) -> bool {
        self.remote_sources.is_empty()
    }
}

/// A fragment and the fragments feeding it
#[derive(Debug, Clone, PartialEq)]
pub struct SubPlan {
    pub fragment: PlanFragment,
    pub children: Vec<SubPlan>,
}

impl SubPlan {
    /// Every fragment of the tree in pre-order, root first
    pub fn get_all_fragments(&self) -> Vec<&PlanFragment> {
        let mut fragments = vec![&self.fragment];
        for child in &self.children {
            fragments.extend(child.get_all_fragments());
        }
        fragments
    }
}
