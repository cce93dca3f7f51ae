use std::sync::Arc;

use crate::query::plan::{GroupId, GroupReference, PlanNode, PlanNodeIdAllocator, PlanningError};

/// One equivalence group: the node currently representing it
#[derive(Debug, Clone)]
struct Group {
    membership: Arc<PlanNode>,
}

/// Arena of equivalence groups.
///
/// Every stored node has `GroupReference` children only, so replacing a group's
/// membership rewrites its whole subtree without touching any ancestor.
#[derive(Debug)]
pub struct Memo {
    groups: Vec<Group>,
    root: GroupId,
}

impl Memo {
    /// Copies `plan` into fresh groups, one per node
    pub fn new(plan: &Arc<PlanNode>, ids: &mut PlanNodeIdAllocator) -> Self {
        let mut memo = Memo {
            groups: Vec::new(),
            root: GroupId(0),
        };
        memo.root = memo.insert_recursive(plan, ids);
        memo
    }

    pub fn root_group(&self) -> GroupId {
        self.root
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn node(&self, group: GroupId) -> &Arc<PlanNode> {
        &self.groups[group.0].membership
    }

    /// Replaces the membership of `group`; new children that are not yet group
    /// references are inserted as groups of their own
    pub fn replace(&mut self, group: GroupId, node: Arc<PlanNode>, ids: &mut PlanNodeIdAllocator) {
        let node = match node.as_ref() {
            PlanNode::GroupReference(reference) => Arc::clone(self.node(reference.group)),
            _ => node,
        };
        let inserted = self.insert_children(&node, ids);
        self.groups[group.0].membership = inserted;
    }

    /// Rebuilds an ordinary tree from the current memberships
    pub fn extract(&self) -> Result<Arc<PlanNode>, PlanningError> {
        self.extract_group(self.root)
    }

    fn extract_group(&self, group: GroupId) -> Result<Arc<PlanNode>, PlanningError> {
        let node = self.node(group);
        let sources = node.sources();
        if sources.is_empty() {
            return Ok(Arc::clone(node));
        }
        let children = sources
            .iter()
            .map(|child| match child.as_ref() {
                PlanNode::GroupReference(reference) => self.extract_group(reference.group),
                other => Err(PlanningError::Internal(format!(
                    "{} {} inside the memo is not a group reference",
                    other.name(),
                    other.id()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(node.replace_children(children)))
    }

    /// Resolves a group reference to the node it currently stands for
    pub fn resolve<'m>(&'m self, node: &'m Arc<PlanNode>) -> &'m Arc<PlanNode> {
        match node.as_ref() {
            PlanNode::GroupReference(reference) => self.node(reference.group),
            _ => node,
        }
    }

    fn insert_recursive(&mut self, node: &Arc<PlanNode>, ids: &mut PlanNodeIdAllocator) -> GroupId {
        if let PlanNode::GroupReference(reference) = node.as_ref() {
            return reference.group;
        }
        let stored = self.insert_children(node, ids);
        self.groups.push(Group { membership: stored });
        GroupId(self.groups.len() - 1)
    }

    fn insert_children(&mut self, node: &Arc<PlanNode>, ids: &mut PlanNodeIdAllocator) -> Arc<PlanNode> {
        let sources = node.sources();
        if sources.is_empty() || sources.iter().all(|s| matches!(s.as_ref(), PlanNode::GroupReference(_))) {
            return Arc::clone(node);
        }
        let children = sources
            .iter()
            .map(|source| {
                let group = self.insert_recursive(source, ids);
                Arc::new(PlanNode::GroupReference(GroupReference {
                    id: ids.next_id(),
                    group,
                    outputs: source.output_symbols(),
                }))
            })
            .collect();
        Arc::new(node.replace_children(children))
    }
}
