//! In-process transport.
//!
//! Every attached node registers its inbox in a shared routing table. Sends are plain
//! channel pushes, so delivery is reliable and ordered per sender.

use super::{Envelope, Transport};
use crate::cluster::types::NodeId;
use crate::mutex::protocol::MutexMessage;
use crate::node::runtime::Inbound;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    routes: Arc<DashMap<NodeId, UnboundedSender<Inbound>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, node: NodeId, inbox: UnboundedSender<Inbound>) {
        self.routes.insert(node, inbox);
        tracing::debug!("Attached {} to memory network ({} nodes)", node, self.routes.len());
    }

    /// Removes `node`; later sends to it fail as if the peer were unreachable.
    pub fn detach(&self, node: NodeId) {
        self.routes.remove(&node);
    }

    pub fn transport(&self, local_id: NodeId) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            local_id,
            network: self.clone(),
        })
    }
}

pub struct MemoryTransport {
    local_id: NodeId,
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn broadcast(&self, message: &MutexMessage, topic: &str) -> Result<()> {
        for route in self.network.routes.iter() {
            if *route.key() == self.local_id {
                continue;
            }

            if route
                .value()
                .send(Inbound::Message(Envelope::new(message.clone(), topic)))
                .is_err()
            {
                tracing::warn!("Failed to broadcast to {}: inbox closed", route.key());
            }
        }

        Ok(())
    }

    async fn dispatch(
        &self,
        message: &MutexMessage,
        topic: &str,
        destination: NodeId,
    ) -> Result<()> {
        let route = self
            .network
            .routes
            .get(&destination)
            .ok_or_else(|| anyhow!("No route to {}", destination))?;

        route
            .value()
            .send(Inbound::Message(Envelope::new(message.clone(), topic)))
            .map_err(|_| anyhow!("Inbox of {} is closed", destination))
    }
}
