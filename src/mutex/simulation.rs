//! Step-wise in-memory cluster used by the protocol tests.
//!
//! Engines write to their outboxes as usual. The harness collects those sends into one
//! FIFO per (sender, destination) pair and delivers one message per step, so tests control
//! the interleaving while per-sender ordering is preserved.

use super::engine::ProtocolEngine;
use super::protocol::MutexMessage;
use super::queue::Procedure;
use crate::cluster::types::NodeId;
use crate::transport::{Outbound, Outbox};

use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::UnboundedReceiver;

pub struct SimCluster {
    engines: Vec<Arc<ProtocolEngine>>,
    outboxes: Vec<UnboundedReceiver<Outbound>>,
    channels: BTreeMap<(NodeId, NodeId), VecDeque<MutexMessage>>,
    pub delivered: usize,
}

impl SimCluster {
    pub fn new(cluster_size: u32, initial_holder: NodeId) -> Self {
        let mut engines = Vec::new();
        let mut outboxes = Vec::new();

        for id in NodeId::all(cluster_size) {
            let (outbox, outbound) = Outbox::channel();
            engines.push(ProtocolEngine::new(id, cluster_size, initial_holder, outbox));
            outboxes.push(outbound);
        }

        Self {
            engines,
            outboxes,
            channels: BTreeMap::new(),
            delivered: 0,
        }
    }

    pub fn size(&self) -> u32 {
        self.engines.len() as u32
    }

    pub fn engine(&self, id: NodeId) -> &Arc<ProtocolEngine> {
        &self.engines[(id.0 - 1) as usize]
    }

    /// Moves every pending outbox item onto the simulated wire.
    pub fn collect(&mut self) {
        let size = self.size();

        for (idx, outbound) in self.outboxes.iter_mut().enumerate() {
            let sender = NodeId(idx as u32 + 1);

            while let Ok(item) = outbound.try_recv() {
                match item {
                    Outbound::Broadcast { message, .. } => {
                        for destination in NodeId::all(size).filter(|id| *id != sender) {
                            self.channels
                                .entry((sender, destination))
                                .or_default()
                                .push_back(message.clone());
                        }
                    }
                    Outbound::Dispatch {
                        destination,
                        message,
                        ..
                    } => {
                        self.channels
                            .entry((sender, destination))
                            .or_default()
                            .push_back(message);
                    }
                }
            }
        }
    }

    pub fn in_flight(&mut self) -> usize {
        self.collect();
        self.channels.values().map(VecDeque::len).sum()
    }

    pub fn tokens_in_flight(&mut self) -> usize {
        self.collect();
        self.channels
            .values()
            .flat_map(|queue| queue.iter())
            .filter(|message| matches!(message, MutexMessage::Token(_)))
            .count()
    }

    pub fn idle_holders(&self) -> Vec<NodeId> {
        self.engines
            .iter()
            .filter(|engine| engine.holds_idle_token())
            .map(|engine| engine.local_id())
            .collect()
    }

    /// Tokens parked at a node plus tokens on the wire. Exactly one between steps.
    pub fn live_tokens(&mut self) -> usize {
        self.idle_holders().len() + self.tokens_in_flight()
    }

    /// Delivers the head of a randomly chosen non-empty channel.
    pub fn step(&mut self, rng: &mut StdRng) -> bool {
        self.collect();

        let ready: Vec<(NodeId, NodeId)> = self
            .channels
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(key, _)| *key)
            .collect();

        if ready.is_empty() {
            return false;
        }

        let key = ready[rng.gen_range(0..ready.len())];
        self.deliver_from(key)
    }

    /// Delivers the head of the first non-empty channel in (sender, destination) order.
    pub fn step_in_order(&mut self) -> bool {
        self.collect();

        let key = self
            .channels
            .iter()
            .find(|(_, queue)| !queue.is_empty())
            .map(|(key, _)| *key);

        match key {
            Some(key) => self.deliver_from(key),
            None => false,
        }
    }

    /// Delivers everything, in random order, checking the single-token invariant after
    /// each step. Returns the number of steps taken.
    pub fn run_until_quiet(&mut self, rng: &mut StdRng, max_steps: usize) -> usize {
        let mut steps = 0;

        while self.step(rng) {
            steps += 1;
            assert_eq!(self.live_tokens(), 1, "exactly one live token after step {}", steps);
            assert!(steps <= max_steps, "cluster did not settle within {} steps", max_steps);
        }

        steps
    }

    fn deliver_from(&mut self, key: (NodeId, NodeId)) -> bool {
        let Some(message) = self.channels.get_mut(&key).and_then(VecDeque::pop_front) else {
            return false;
        };

        let engine = self.engine(key.1).clone();
        match message {
            MutexMessage::Request(request) => engine
                .on_request_broadcast(request.sender_id, request.request_number)
                .expect("request broadcast should be accepted"),
            MutexMessage::Token(transfer) => engine
                .on_token_message(transfer)
                .expect("token transfer should be accepted"),
        }

        self.delivered += 1;
        self.collect();
        true
    }
}

/// Records which procedures ran and how many were inside the critical section at once.
#[derive(Default)]
pub struct Probe {
    active: AtomicUsize,
    max_active: AtomicUsize,
    runs: Mutex<Vec<(NodeId, String)>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn procedure(self: &Arc<Self>, node: NodeId, label: &str) -> Procedure {
        let probe = self.clone();
        let label = label.to_string();

        Box::new(move |_token| {
            let now = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
            probe.max_active.fetch_max(now, Ordering::SeqCst);
            probe.runs.lock().push((node, label));
            probe.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    }

    pub fn runs(&self) -> Vec<(NodeId, String)> {
        self.runs.lock().clone()
    }

    pub fn run_count(&self, label: &str) -> usize {
        self.runs.lock().iter().filter(|(_, l)| l == label).count()
    }

    pub fn runs_on(&self, node: NodeId) -> usize {
        self.runs.lock().iter().filter(|(n, _)| *n == node).count()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}
