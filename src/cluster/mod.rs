//! Cluster Identity & Bootstrap Module
//!
//! Describes the fixed set of nodes taking part in mutual exclusion and how a single
//! node learns its place in it.
//!
//! ## Core Concepts
//! - **Node Identity**: Every member is addressed by a small integer in `1..=N`. `N` is fixed at deployment.
//! - **Bootstrap**: Exactly one designated node (the initial holder) creates the token at startup.
//! - **Peers**: Static address book mapping every other member to its network address.

pub mod config;
pub mod types;
