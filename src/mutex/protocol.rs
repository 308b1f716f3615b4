//! Wire Protocol Definitions
//!
//! Messages exchanged between engines. They are transport-agnostic: any transport that can
//! broadcast and dispatch serde values can carry them.
//!
//! Topic constants name the two logical channels the protocol uses.

use super::types::{RequestNumber, Token};
use crate::cluster::types::NodeId;
use serde::{Deserialize, Serialize};

pub const TOPIC_CRITICAL_SECTION: &str = "critical_section";
pub const TOPIC_CRITICAL_SECTION_TOKEN: &str = "critical_section_token";

/// "Node `sender_id` wants the critical section; this is its request number."
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestBroadcast {
    pub sender_id: NodeId,
    pub request_number: RequestNumber,
}

/// Hands the token to `destination_id`.
///
/// `token` is optional on the wire so that a malformed transfer can be represented and
/// rejected instead of failing to decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenTransfer {
    pub sender_id: NodeId,
    pub destination_id: NodeId,
    pub token: Option<Token>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MutexMessage {
    Request(RequestBroadcast),
    Token(TokenTransfer),
}

impl MutexMessage {
    /// Topic the message travels on.
    pub fn topic(&self) -> &'static str {
        match self {
            MutexMessage::Request(_) => TOPIC_CRITICAL_SECTION,
            MutexMessage::Token(_) => TOPIC_CRITICAL_SECTION_TOKEN,
        }
    }

    pub fn sender(&self) -> NodeId {
        match self {
            MutexMessage::Request(request) => request.sender_id,
            MutexMessage::Token(transfer) => transfer.sender_id,
        }
    }
}
