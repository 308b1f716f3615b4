//! UDP transport.
//!
//! Each node binds one socket. Outbound envelopes are `bincode`-encoded into a single
//! datagram; a receive loop decodes inbound datagrams and hands them to the node actor.
//! UDP itself gives no delivery guarantee, so this transport suits LAN deployments and
//! demos where loss is negligible.

use super::{Envelope, Transport};
use crate::cluster::types::NodeId;
use crate::mutex::protocol::MutexMessage;
use crate::node::runtime::Inbound;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

const MAX_DATAGRAM_SIZE: usize = 65536;

pub struct UdpTransport {
    local_id: NodeId,
    socket: Arc<UdpSocket>,
    peers: DashMap<NodeId, SocketAddr>,
}

impl UdpTransport {
    pub async fn bind(local_id: NodeId, bind_addr: SocketAddr) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        tracing::info!("{} listening for protocol messages on {}", local_id, socket.local_addr()?);

        Ok(Arc::new(Self {
            local_id,
            socket: Arc::new(socket),
            peers: DashMap::new(),
        }))
    }

    pub fn add_peer(&self, id: NodeId, addr: SocketAddr) {
        if id == self.local_id {
            tracing::warn!("Ignoring own address {} in peer list", addr);
            return;
        }
        self.peers.insert(id, addr);
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn spawn_receiver(self: Arc<Self>, inbox: UnboundedSender<Inbound>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.receive_loop(inbox).await;
        })
    }

    async fn receive_loop(&self, inbox: UnboundedSender<Inbound>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<Envelope>(&buf[..len]) {
                    Ok(envelope) => {
                        tracing::trace!("Received {} message from {}", envelope.topic, src);
                        if inbox.send(Inbound::Message(envelope)).is_err() {
                            tracing::info!("Node inbox closed, stopping UDP receiver");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn send_envelope(&self, envelope: &Envelope, addr: SocketAddr) -> Result<()> {
        let encoded = bincode::serialize(envelope)?;
        self.socket.send_to(&encoded, addr).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn broadcast(&self, message: &MutexMessage, topic: &str) -> Result<()> {
        let envelope = Envelope::new(message.clone(), topic);
        let targets: Vec<(NodeId, SocketAddr)> = self
            .peers
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        for (id, addr) in targets {
            if let Err(e) = self.send_envelope(&envelope, addr).await {
                tracing::warn!("Failed to broadcast to {} at {}: {}", id, addr, e);
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
        let addr = self
            .peers
            .get(&destination)
            .map(|entry| *entry.value())
            .ok_or_else(|| anyhow!("No address known for {}", destination))?;

        self.send_envelope(&Envelope::new(message.clone(), topic), addr)
            .await
    }
}
