use serde::{Deserialize, Serialize};

/// Result of master resolution over a finalized graph.
///
/// All vectors are indexed by node position in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterPlan {
    /// Master of each node; `None` for self-driven nodes.
    pub masters: Vec<Option<usize>>,

    /// Input port index whose source is the master.
    pub primary_inputs: Vec<Option<usize>>,

    /// Dependents of each node, in registration order.
    pub dependents: Vec<Vec<usize>>,

    /// Self-driven nodes in configuration order.
    pub roots: Vec<usize>,

    /// Order in which nodes became resolved.
    pub resolution_order: Vec<usize>,

    /// Resolution statistics
    pub stats: PlanStats,
}

/// Statistics about the resolved plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    /// Total number of nodes in the graph
    pub total_nodes: usize,

    /// Nodes that drive themselves
    pub self_driven_nodes: usize,

    /// Nodes driven by a master
    pub dependent_nodes: usize,

    /// Fixed-point passes until no new node resolved
    pub passes: usize,

    /// Longest master chain (roots have depth 0)
    pub max_depth: usize,

    /// Resolution time in microseconds
    pub resolve_time_us: u64,
}

impl MasterPlan {
    pub fn is_empty(&self) -> bool {
        self.masters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.masters.len()
    }

    /// Depth of `node` in its master tree.
    pub fn depth(&self, node: usize) -> usize {
        let mut depth = 0;
        let mut current = node;
        while let Some(master) = self.masters.get(current).copied().flatten() {
            depth += 1;
            current = master;
        }
        depth
    }

    /// `root` followed by its dependents, depth-first in registration order.
    pub fn subtree(&self, root: usize) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            if let Some(deps) = self.dependents.get(idx) {
                stack.extend(deps.iter().rev());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> MasterPlan {
        // 0 -> 1 -> 3, 0 -> 2
        MasterPlan {
            masters: vec![None, Some(0), Some(0), Some(1)],
            primary_inputs: vec![None, Some(0), Some(0), Some(0)],
            dependents: vec![vec![1, 2], vec![3], vec![], vec![]],
            roots: vec![0],
            resolution_order: vec![0, 1, 2, 3],
            stats: PlanStats::default(),
        }
    }

    #[test]
    fn test_subtree_is_depth_first_in_registration_order() {
        assert_eq!(diamond().subtree(0), vec![0, 1, 3, 2]);
    }

    #[test]
    fn test_depth() {
        let plan = diamond();
        assert_eq!(plan.depth(0), 0);
        assert_eq!(plan.depth(3), 2);
    }
}
