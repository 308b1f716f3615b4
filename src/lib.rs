//! Distributed Mutual Exclusion Library
//!
//! Token-based mutual exclusion for a fixed cluster of nodes (Suzuki–Kasami). Exactly one
//! token circulates; a node runs its critical-section procedures only while holding it.
//! The library backs the node binary (`main.rs`) and can be embedded directly.
//!
//! ## Architecture Modules
//! - **`cluster`**: Node identities and the bootstrap configuration (membership, addresses,
//!   initial token holder).
//! - **`mutex`**: The protocol core. Request tables, the token, the pending procedure queue
//!   and the `ProtocolEngine` that reacts to local submissions and peer messages.
//! - **`transport`**: Moves protocol messages between nodes over UDP or an in-process network.
//! - **`node`**: The per-node actor, the client handle and the HTTP surface for submitting
//!   named procedures.

pub mod cluster;
pub mod mutex;
pub mod node;
pub mod transport;
