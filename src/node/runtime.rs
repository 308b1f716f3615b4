use crate::cluster::types::NodeId;
use crate::mutex::engine::ProtocolEngine;
use crate::mutex::protocol::MutexMessage;
use crate::mutex::queue::Procedure;
use crate::mutex::types::{EngineSnapshot, Token};
use crate::transport::{Envelope, Outbound, Transport, spawn_outbound_worker};

use anyhow::{Result, anyhow};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch};

/// Events processed by the node actor.
pub enum Inbound {
    /// A protocol message delivered by a transport.
    Message(Envelope),
    /// A procedure submitted by a local client.
    Submit(Procedure),
}

/// Single-threaded protocol actor for one node.
///
/// Only one submission is handed to the engine at a time. Later ones wait in `held` until
/// the engine's executed count moves past `in_flight`, so every request number this node
/// broadcasts is exactly one above its last grant.
pub struct Node {
    engine: Arc<ProtocolEngine>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    held: VecDeque<Procedure>,
    held_count: Arc<AtomicUsize>,
    /// Executed count observed when the current submission was released.
    in_flight: Option<u64>,
    status: watch::Sender<EngineSnapshot>,
}

/// Cloneable client side of a running node.
#[derive(Clone)]
pub struct NodeHandle {
    engine: Arc<ProtocolEngine>,
    inbox: mpsc::UnboundedSender<Inbound>,
    held_count: Arc<AtomicUsize>,
    status: watch::Receiver<EngineSnapshot>,
}

impl Node {
    pub fn new(engine: Arc<ProtocolEngine>) -> (Self, NodeHandle) {
        let (sender, inbox) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(engine.snapshot());
        let held_count = Arc::new(AtomicUsize::new(0));

        let handle = NodeHandle {
            engine: engine.clone(),
            inbox: sender,
            held_count: held_count.clone(),
            status: status_rx,
        };

        let node = Self {
            engine,
            inbox,
            held: VecDeque::new(),
            held_count,
            in_flight: None,
            status,
        };

        (node, handle)
    }

    /// Spawns the actor and the outbound worker draining the engine's outbox into `transport`.
    ///
    /// The caller still has to route inbound traffic to [`NodeHandle::inbox`].
    pub fn start(
        engine: Arc<ProtocolEngine>,
        transport: Arc<dyn Transport>,
        outbound: mpsc::UnboundedReceiver<Outbound>,
    ) -> NodeHandle {
        let (node, handle) = Self::new(engine);

        spawn_outbound_worker(transport, outbound);
        tokio::spawn(node.run());

        handle
    }

    /// Processes events until every sender of the inbox is dropped.
    ///
    /// Procedures run inline, so a long procedure delays every event queued behind it.
    pub async fn run(mut self) {
        let id = self.engine.local_id();
        tracing::info!("Protocol actor for {} started", id);

        while let Some(event) = self.inbox.recv().await {
            self.handle(event);
            self.release_next();
            self.publish();
        }

        tracing::info!("Protocol actor for {} stopped", id);
    }

    fn handle(&mut self, event: Inbound) {
        match event {
            Inbound::Submit(procedure) => {
                self.held.push_back(procedure);
                if self.in_flight.is_some() {
                    tracing::debug!(
                        "Holding submission until the previous one runs ({} held)",
                        self.held.len()
                    );
                }
            }
            Inbound::Message(envelope) => self.deliver(envelope),
        }
    }

    /// Hands held submissions to the engine one at a time.
    fn release_next(&mut self) {
        loop {
            if let Some(mark) = self.in_flight {
                if self.engine.executed() <= mark {
                    break;
                }
                self.in_flight = None;
            }

            let Some(procedure) = self.held.pop_front() else {
                break;
            };

            self.in_flight = Some(self.engine.executed());
            self.engine.submit(procedure);
        }

        self.held_count.store(self.held.len(), Ordering::Release);
    }

    fn publish(&self) {
        let mut snapshot = self.engine.snapshot();
        snapshot.pending_procedures += self.held.len();
        self.status.send_replace(snapshot);
    }

    fn deliver(&self, envelope: Envelope) {
        if envelope.topic != envelope.message.topic() {
            tracing::warn!(
                "Message from {} arrived on topic {}, expected {}",
                envelope.message.sender(),
                envelope.topic,
                envelope.message.topic()
            );
        }

        let result = match envelope.message {
            MutexMessage::Request(request) => self
                .engine
                .on_request_broadcast(request.sender_id, request.request_number),
            MutexMessage::Token(transfer) => self.engine.on_token_message(transfer),
        };

        if let Err(e) = result {
            tracing::debug!("Dropped message on {}: {}", envelope.topic, e);
        }
    }
}

impl NodeHandle {
    pub fn local_id(&self) -> NodeId {
        self.engine.local_id()
    }

    /// Queues `procedure` for exclusive execution. Returns once the actor has it queued.
    pub fn submit<F>(&self, procedure: F) -> Result<()>
    where
        F: FnOnce(&Token) -> Result<()> + Send + 'static,
    {
        self.submit_procedure(Box::new(procedure))
    }

    pub fn submit_procedure(&self, procedure: Procedure) -> Result<()> {
        self.inbox
            .send(Inbound::Submit(procedure))
            .map_err(|_| anyhow!("{} is no longer running", self.local_id()))
    }

    /// Sender transports use to deliver inbound messages to this node.
    pub fn inbox(&self) -> mpsc::UnboundedSender<Inbound> {
        self.inbox.clone()
    }

    /// Current state, counting submissions still held back by the actor as pending.
    pub fn snapshot(&self) -> EngineSnapshot {
        let mut snapshot = self.engine.snapshot();
        snapshot.pending_procedures += self.held_count.load(Ordering::Acquire);
        snapshot
    }

    /// State published by the actor after every event it handles.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.status.clone()
    }
}
