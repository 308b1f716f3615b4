//! Protocol Engine
//!
//! One instance per node. Owns the node's protocol state (request table and parked token)
//! and reacts to the three kinds of events the algorithm knows about: a local submission,
//! an inbound request broadcast and an inbound token transfer.
//!
//! ## Concurrency
//! - All protocol state sits behind one mutex. Handlers may be called from any thread.
//! - `token_idle` is the arbiter for the parked token: a contender must win the
//!   `true -> false` compare-and-swap before taking the token out of the state. The flag is
//!   only raised while the token is being parked under the lock, so the flag and the
//!   holder state never disagree for a lock holder.
//! - Sends go through the outbox after the lock is released.
//! - Procedures run synchronously on the thread that executes the grant path.

use super::error::ProtocolError;
use super::protocol::*;
use super::queue::{PendingProcedureQueue, Procedure};
use super::types::*;
use crate::cluster::config::ClusterConfig;
use crate::cluster::types::NodeId;
use crate::transport::Outbox;

use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

struct ProtocolState {
    requests: RequestTable,
    holder: HolderState,
}

/// Where the token goes after a recompute.
enum Handoff {
    Parked,
    Local(Token),
    Remote(NodeId, Token),
}

pub struct ProtocolEngine {
    local_id: NodeId,
    cluster_size: u32,
    state: Mutex<ProtocolState>,
    token_idle: AtomicBool,
    procedures: PendingProcedureQueue,
    outbox: Outbox,
    executed: AtomicU64,
    failed: AtomicU64,
    forwarded: AtomicU64,
}

impl ProtocolEngine {
    /// Creates the engine for `local_id`. The initial holder starts with a fresh token, parked.
    pub fn new(
        local_id: NodeId,
        cluster_size: u32,
        initial_holder: NodeId,
        outbox: Outbox,
    ) -> Arc<Self> {
        let holder = if local_id == initial_holder {
            tracing::info!(
                "{} bootstraps the token for a {}-node cluster",
                local_id,
                cluster_size
            );
            HolderState::IdleWithToken(Token::bootstrap(cluster_size))
        } else {
            HolderState::NoToken
        };
        let token_idle = AtomicBool::new(holder.is_idle());

        Arc::new(Self {
            local_id,
            cluster_size,
            state: Mutex::new(ProtocolState {
                requests: RequestTable::new(),
                holder,
            }),
            token_idle,
            procedures: PendingProcedureQueue::new(),
            outbox,
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &ClusterConfig, outbox: Outbox) -> Arc<Self> {
        Self::new(
            config.local_id,
            config.cluster_size,
            config.initial_holder,
            outbox,
        )
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    /// Queues `procedure` for exclusive execution and requests the token.
    ///
    /// If this node has the token parked, the procedure (or the oldest queued one) runs
    /// before this call returns. Otherwise it runs when a token transfer arrives.
    /// Returns the request number issued for this submission.
    ///
    /// Keep at most one submission outstanding: a second request number broadcast before the
    /// first is granted leaves this node's request unmatched at the holder. The node runtime
    /// holds back later submissions until the previous procedure has run.
    pub fn submit(&self, procedure: Procedure) -> RequestNumber {
        self.procedures.push(procedure);

        let number = self.state.lock().requests.increment(self.local_id);

        tracing::info!(
            "Submitted critical section procedure for request {} (pending: {})",
            number,
            self.procedures.len()
        );

        self.outbox.broadcast(
            MutexMessage::Request(RequestBroadcast {
                sender_id: self.local_id,
                request_number: number,
            }),
            TOPIC_CRITICAL_SECTION,
        );

        let claimed = {
            let mut state = self.state.lock();
            self.claim_idle_token(&mut state)
        };

        match claimed {
            Some(token) => {
                tracing::debug!("Token was idle on {}, granting locally", self.local_id);
                self.grant(token);
            }
            None => {
                tracing::debug!("Token not idle on {}, waiting for transfer", self.local_id);
            }
        }

        number
    }

    /// Merges a remote request into the request table.
    ///
    /// When the request gives `sender` an outstanding request and the token is parked here,
    /// the token is claimed and handed on without any local submission.
    pub fn on_request_broadcast(
        &self,
        sender: NodeId,
        number: RequestNumber,
    ) -> Result<(), ProtocolError> {
        if !sender.is_member_of(self.cluster_size) {
            let error = ProtocolError::UnknownNode {
                node: sender,
                cluster_size: self.cluster_size,
            };
            tracing::error!("Dropping request broadcast: {}", error);
            return Err(error);
        }

        let claimed = {
            let mut state = self.state.lock();
            let current = state.requests.get(sender);

            if !state.requests.merge(sender, number) {
                tracing::info!(
                    "Received old REQUEST from {} (current: {}, received: {})",
                    sender,
                    current,
                    number
                );
                return Ok(());
            }

            tracing::debug!(
                "Received new REQUEST from {} (current: {}, received: {})",
                sender,
                current,
                number
            );

            let qualifies = match &state.holder {
                HolderState::IdleWithToken(token) => token.is_outstanding(sender, &state.requests),
                HolderState::NoToken => false,
            };

            if qualifies {
                self.claim_idle_token(&mut state)
            } else {
                None
            }
        };

        if let Some(token) = claimed {
            tracing::debug!("Idle token claimed for request from {}", sender);
            self.recompute_and_forward(token);
        }

        Ok(())
    }

    /// Accepts a token handed to this node and runs the next pending procedure.
    pub fn on_token_message(&self, transfer: TokenTransfer) -> Result<(), ProtocolError> {
        if transfer.destination_id != self.local_id {
            let error = ProtocolError::Misaddressed {
                destination: transfer.destination_id,
                local: self.local_id,
            };
            tracing::error!("Dropping token transfer: {}", error);
            return Err(error);
        }

        let Some(token) = transfer.token else {
            let error = ProtocolError::MissingToken {
                sender: transfer.sender_id,
            };
            tracing::error!("Dropping token transfer: {}", error);
            return Err(error);
        };

        if let Some(reason) = token.defect(self.cluster_size) {
            let error = ProtocolError::MalformedToken {
                sender: transfer.sender_id,
                reason,
            };
            tracing::error!("Dropping token transfer: {}", error);
            return Err(error);
        }

        tracing::info!(
            "Received token from {} (queue: {:?})",
            transfer.sender_id,
            token.queue
        );
        self.grant(token);

        Ok(())
    }

    /// Rebuilds the token queue from the request table and moves the token on.
    ///
    /// With an empty queue the token is parked here. If the queue head is this node, the
    /// token goes straight back into the local grant path.
    pub(crate) fn recompute_and_forward(&self, token: Token) {
        let mut next = Some(token);

        while let Some(token) = next.take() {
            match self.recompute(token) {
                Handoff::Parked => {}
                Handoff::Local(token) => next = self.run_next(token),
                Handoff::Remote(destination, token) => self.forward(destination, token),
            }
        }
    }

    pub fn holds_idle_token(&self) -> bool {
        self.state.lock().holder.is_idle()
    }

    pub fn request_number(&self, node: NodeId) -> RequestNumber {
        self.state.lock().requests.get(node)
    }

    /// Procedures run on this node so far, failed ones included.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Acquire)
    }

    pub fn pending_procedures(&self) -> usize {
        self.procedures.len()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let (request_table, idle_token) = {
            let state = self.state.lock();
            let idle_token = match &state.holder {
                HolderState::IdleWithToken(token) => Some(token.clone()),
                HolderState::NoToken => None,
            };
            (state.requests.clone(), idle_token)
        };

        EngineSnapshot {
            node_id: self.local_id,
            cluster_size: self.cluster_size,
            request_table,
            idle_token,
            pending_procedures: self.procedures.len(),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            tokens_forwarded: self.forwarded.load(Ordering::Relaxed),
        }
    }

    /// Wins the idle token or returns `None`. Must be called with the state lock held.
    fn claim_idle_token(&self, state: &mut ProtocolState) -> Option<Token> {
        if self
            .token_idle
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let token = state.holder.take();
        if token.is_none() {
            tracing::error!("Idle flag set on {} without a parked token", self.local_id);
        }
        token
    }

    /// Parks the token. Must be called with the state lock held.
    fn park(&self, state: &mut ProtocolState, token: Token) {
        state.holder = HolderState::IdleWithToken(token);
        self.token_idle.store(true, Ordering::Release);
    }

    fn grant(&self, token: Token) {
        if let Some(token) = self.run_next(token) {
            self.recompute_and_forward(token);
        }
    }

    /// Runs the oldest pending procedure and credits this node's latest request.
    /// Parks the token and returns `None` when nothing is pending.
    fn run_next(&self, mut token: Token) -> Option<Token> {
        let Some(procedure) = self.procedures.pop() else {
            tracing::warn!("No critical section procedure pending, setting token idle");
            let mut state = self.state.lock();
            self.park(&mut state, token);
            return None;
        };

        self.execute(procedure, &token);

        let satisfied = self.state.lock().requests.get(self.local_id);
        token.record_grant(self.local_id, satisfied);

        Some(token)
    }

    fn execute(&self, procedure: Procedure, token: &Token) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| procedure(token)));
        self.executed.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(Ok(())) => {
                tracing::info!("Critical section procedure executed on {}", self.local_id);
            }
            Ok(Err(e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Critical section procedure failed: {:#}", e);
            }
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Critical section procedure panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn recompute(&self, mut token: Token) -> Handoff {
        let mut state = self.state.lock();

        let appended = token.enqueue_outstanding(self.cluster_size, &state.requests);
        tracing::debug!(
            "Token updated: {} appended, queue {:?}, granted {:?}",
            appended,
            token.queue,
            token.last_granted
        );

        match token.next_holder() {
            None => {
                tracing::debug!("No waiters in token queue, keeping token idle");
                self.park(&mut state, token);
                Handoff::Parked
            }
            Some(next) if next == self.local_id => {
                state.holder = HolderState::NoToken;
                Handoff::Local(token)
            }
            Some(next) => {
                state.holder = HolderState::NoToken;
                Handoff::Remote(next, token)
            }
        }
    }

    fn forward(&self, destination: NodeId, token: Token) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Forwarding token to {}", destination);

        self.outbox.dispatch(
            MutexMessage::Token(TokenTransfer {
                sender_id: self.local_id,
                destination_id: destination,
                token: Some(token),
            }),
            TOPIC_CRITICAL_SECTION_TOKEN,
            destination,
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
