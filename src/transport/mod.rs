//! Transport Module
//!
//! Moves protocol messages between nodes. The engine never talks to the network directly:
//! it pushes `Outbound` items into an [`Outbox`] after its state mutation is complete, and a
//! worker task drains the outbox into a [`Transport`] implementation.
//!
//! ## Implementations
//! - **`udp`**: Datagram transport with `bincode` framing, used by the node binary.
//! - **`memory`**: In-process routing table, used for multi-node tests and demos.
//!
//! Delivery is fire-and-forget. Reliability and per-sender ordering are the transport's
//! concern; failures are logged and never reported back to the engine.

pub mod memory;
pub mod udp;

#[cfg(test)]
mod tests;

use crate::cluster::types::NodeId;
use crate::mutex::protocol::MutexMessage;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What actually travels between nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub message: MutexMessage,
}

impl Envelope {
    pub fn new(message: MutexMessage, topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            message,
        }
    }
}

/// A send requested by the engine, waiting for the transport worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Broadcast {
        topic: &'static str,
        message: MutexMessage,
    },
    Dispatch {
        topic: &'static str,
        destination: NodeId,
        message: MutexMessage,
    },
}

impl Outbound {
    pub fn topic(&self) -> &'static str {
        match self {
            Outbound::Broadcast { topic, .. } | Outbound::Dispatch { topic, .. } => topic,
        }
    }
}

/// Write side of the outbound channel. Cheap to clone, never blocks.
#[derive(Clone)]
pub struct Outbox {
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn broadcast(&self, message: MutexMessage, topic: &'static str) {
        if self
            .sender
            .send(Outbound::Broadcast { topic, message })
            .is_err()
        {
            tracing::warn!("Outbox closed, dropping broadcast on {}", topic);
        }
    }

    pub fn dispatch(&self, message: MutexMessage, topic: &'static str, destination: NodeId) {
        if self
            .sender
            .send(Outbound::Dispatch {
                topic,
                destination,
                message,
            })
            .is_err()
        {
            tracing::warn!(
                "Outbox closed, dropping dispatch to {} on {}",
                destination,
                topic
            );
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `message` to every other member of the cluster.
    async fn broadcast(&self, message: &MutexMessage, topic: &str) -> Result<()>;

    /// Sends `message` to a single member.
    async fn dispatch(&self, message: &MutexMessage, topic: &str, destination: NodeId)
    -> Result<()>;
}

/// Drains the outbox into `transport` until every `Outbox` clone is dropped.
pub fn spawn_outbound_worker(
    transport: Arc<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let result = match &item {
                Outbound::Broadcast { topic, message } => transport.broadcast(message, topic).await,
                Outbound::Dispatch {
                    topic,
                    destination,
                    message,
                } => transport.dispatch(message, topic, *destination).await,
            };

            if let Err(e) = result {
                tracing::warn!("Failed to send {} message: {}", item.topic(), e);
            }
        }

        tracing::info!("Outbound worker stopped");
    })
}
