//! Identity types for the pipeline graph.
//!
//! `NodeId` is the stable identifier a node is configured with. Storage
//! inside the graph is index based; `Graph` keeps the id → index map.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical timestamp carried by ports, in milliseconds.
pub type Timestamp = u64;

/// Stable node identifier, unique within a graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        let id = NodeId(42);
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(format!("{:?}", id), "NodeId(42)");
    }

    #[test]
    fn test_node_id_serializes_as_number() {
        let json = serde_json::to_string(&NodeId(3)).unwrap();
        assert_eq!(json, "3");
    }
}
