use crate::cluster::types::NodeId;
use thiserror::Error;

/// Inbound messages the engine refuses to act on.
///
/// None of these are fatal: the message is logged and dropped and the protocol state is
/// left untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("token transfer from {sender} carried no token")]
    MissingToken { sender: NodeId },

    #[error("token transfer for {destination} delivered to {local}")]
    Misaddressed { destination: NodeId, local: NodeId },

    #[error("token transfer from {sender} is malformed: {reason}")]
    MalformedToken { sender: NodeId, reason: String },

    #[error("message from {node}, which is not a member of a {cluster_size}-node cluster")]
    UnknownNode { node: NodeId, cluster_size: u32 },
}
