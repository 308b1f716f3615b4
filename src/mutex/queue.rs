//! Pending Procedure Queue
//!
//! Local FIFO of critical-section callbacks that were submitted on this node and wait for
//! the token. Procedures are handed out in arrival order to whichever grant comes next;
//! a procedure is not tied to the request number its submission produced.

use super::types::Token;

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A critical-section callback. Runs at most once, with read access to the granted token.
pub type Procedure = Box<dyn FnOnce(&Token) -> Result<()> + Send + 'static>;

#[derive(Default)]
pub struct PendingProcedureQueue {
    procedures: Mutex<VecDeque<Procedure>>,
}

impl PendingProcedureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, procedure: Procedure) {
        self.procedures.lock().push_back(procedure);
    }

    pub fn pop(&self) -> Option<Procedure> {
        self.procedures.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.procedures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.lock().is_empty()
    }
}
