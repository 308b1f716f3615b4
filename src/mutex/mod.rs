//! Distributed Mutual Exclusion Module (Suzuki–Kasami)
//!
//! Grants cluster-wide exclusive execution of submitted procedures by circulating a single
//! permission token between nodes.
//!
//! ## Protocol Overview
//! 1. **Request**: A node that wants the critical section bumps its own request number and
//!    broadcasts it. Every node keeps the highest number it has seen per node (the request table).
//! 2. **Grant**: The token records, per node, the last request it has satisfied. A node has an
//!    outstanding request when `requests[i] == last_granted[i] + 1`.
//! 3. **Hand-off**: After running a procedure the holder appends every node with an outstanding
//!    request to the token queue (ascending id scan) and ships the token to the queue head.
//! 4. **Idle token**: With no waiters the holder parks the token. A local submission or a remote
//!    request then claims it through a compare-and-swap so only one path ever acts on it.
//!
//! ## Submodules
//! - **`types`**: Request table, token and holder state.
//! - **`protocol`**: Wire messages and topics.
//! - **`queue`**: FIFO of procedures waiting for a grant on this node.
//! - **`engine`**: The per-node state machine driving all of the above.
//! - **`error`**: Protocol violations reported by the engine.

pub mod engine;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod types;

#[cfg(test)]
mod simulation;
