use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a cluster member.
///
/// Valid identifiers lie in `1..=N` where `N` is the cluster size. The ordering is
/// meaningful: the token's wait queue is rebuilt by scanning members in ascending order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Iterates over every member of a `cluster_size`-node cluster in ascending order.
    pub fn all(cluster_size: u32) -> impl Iterator<Item = NodeId> {
        (1..=cluster_size).map(NodeId)
    }

    pub fn is_member_of(&self, cluster_size: u32) -> bool {
        self.0 >= 1 && self.0 <= cluster_size
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(NodeId)
    }
}
