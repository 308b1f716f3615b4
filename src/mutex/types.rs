use crate::cluster::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Per-node request counter. Starts at 0, grows by one per submission.
pub type RequestNumber = u64;

/// The highest request number this node knows of for every member (RN).
///
/// Entries never decrease: the only mutations are a local increment and a merge-max.
/// Missing entries read as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTable {
    entries: BTreeMap<NodeId, RequestNumber>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId) -> RequestNumber {
        self.entries.get(&node).copied().unwrap_or(0)
    }

    /// Issues the next request number for `node` and returns it.
    pub fn increment(&mut self, node: NodeId) -> RequestNumber {
        let entry = self.entries.entry(node).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Merge-max against an observed number. Returns `true` when the entry advanced.
    pub fn merge(&mut self, node: NodeId, number: RequestNumber) -> bool {
        let entry = self.entries.entry(node).or_insert(0);
        if number > *entry {
            *entry = number;
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, RequestNumber)> + '_ {
        self.entries.iter().map(|(node, number)| (*node, *number))
    }
}

/// The mobile permission object. Whoever owns it may run the critical section.
///
/// `last_granted` (LN) holds, per node, the request number the token has already satisfied.
/// `queue` lists nodes waiting for the token, without duplicates, in hand-off order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub last_granted: BTreeMap<NodeId, RequestNumber>,
    pub queue: VecDeque<NodeId>,
}

impl Token {
    /// The token created once, at the initial holder, when the cluster boots.
    pub fn bootstrap(cluster_size: u32) -> Self {
        Self {
            last_granted: NodeId::all(cluster_size).map(|node| (node, 0)).collect(),
            queue: VecDeque::new(),
        }
    }

    pub fn granted(&self, node: NodeId) -> RequestNumber {
        self.last_granted.get(&node).copied().unwrap_or(0)
    }

    pub fn record_grant(&mut self, node: NodeId, number: RequestNumber) {
        self.last_granted.insert(node, number);
    }

    /// True when `node` has exactly one request the token has not yet satisfied.
    pub fn is_outstanding(&self, node: NodeId, requests: &RequestTable) -> bool {
        requests.get(node) == self.granted(node) + 1
    }

    pub fn is_queued(&self, node: NodeId) -> bool {
        self.queue.contains(&node)
    }

    /// Appends every node with an outstanding request that is not queued yet,
    /// scanning ids `1..=cluster_size` in ascending order. Returns how many were appended.
    pub fn enqueue_outstanding(&mut self, cluster_size: u32, requests: &RequestTable) -> usize {
        let mut appended = 0;

        for node in NodeId::all(cluster_size) {
            if !self.is_outstanding(node, requests) {
                continue;
            }

            if self.is_queued(node) {
                tracing::debug!("Skipping {} in token queue, already waiting", node);
            } else {
                self.queue.push_back(node);
                appended += 1;
            }
        }

        appended
    }

    /// Describes the first structural defect found, if any: a queued or granted id outside
    /// `1..=cluster_size`, or a node queued twice.
    pub fn defect(&self, cluster_size: u32) -> Option<String> {
        if let Some(node) = self
            .last_granted
            .keys()
            .find(|node| !node.is_member_of(cluster_size))
        {
            return Some(format!("grant recorded for unknown {}", node));
        }

        let mut seen = BTreeSet::new();
        for node in &self.queue {
            if !node.is_member_of(cluster_size) {
                return Some(format!("queue contains unknown {}", node));
            }
            if !seen.insert(*node) {
                return Some(format!("{} is queued twice", node));
            }
        }

        None
    }

    /// Removes and returns the next node to receive the token.
    pub fn next_holder(&mut self) -> Option<NodeId> {
        self.queue.pop_front()
    }
}

/// Whether this node currently keeps the token parked.
///
/// While a procedure runs or the token travels, the local state is `NoToken`: the token is
/// owned by the grant path or by the message carrying it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HolderState {
    #[default]
    NoToken,
    IdleWithToken(Token),
}

impl HolderState {
    pub fn is_idle(&self) -> bool {
        matches!(self, HolderState::IdleWithToken(_))
    }

    /// Takes the parked token, leaving `NoToken` behind.
    pub fn take(&mut self) -> Option<Token> {
        match std::mem::take(self) {
            HolderState::IdleWithToken(token) => Some(token),
            HolderState::NoToken => None,
        }
    }
}

/// Point-in-time view of one node's protocol state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub node_id: NodeId,
    pub cluster_size: u32,
    pub request_table: RequestTable,
    /// The parked token, when this node holds it idle.
    pub idle_token: Option<Token>,
    pub pending_procedures: usize,
    /// Procedures run on this node, failed ones included.
    pub executed: u64,
    pub failed: u64,
    pub tokens_forwarded: u64,
}

impl EngineSnapshot {
    pub fn holds_idle_token(&self) -> bool {
        self.idle_token.is_some()
    }
}
