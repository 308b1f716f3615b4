//! Procedure Registry
//!
//! Maps handler names (e.g. "log_job") to critical-section code so that clients without
//! direct access to the process, such as HTTP callers, can submit work by name. Each
//! submission instantiates a fresh one-shot procedure bound to the request payload.

use crate::mutex::queue::Procedure;
use crate::mutex::types::Token;

use anyhow::{Result, anyhow};
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe body of a named procedure: runs with the granted token and the submitted payload.
pub type ProcedureHandlerFn =
    Arc<dyn Fn(&Token, &serde_json::Value) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct ProcedureRegistry {
    handlers: DashMap<String, ProcedureHandlerFn>,
}

impl ProcedureRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `handler` under `handler_name`, replacing any previous registration.
    pub fn register<F>(&self, handler_name: &str, handler: F)
    where
        F: Fn(&Token, &serde_json::Value) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .insert(handler_name.to_string(), Arc::new(handler));

        tracing::info!("Registered procedure handler: {}", handler_name);
    }

    /// Binds the named handler to `payload`, producing a procedure ready for submission.
    ///
    /// # Returns
    /// * `Err` if no handler exists for the given name.
    pub fn instantiate(&self, handler_name: &str, payload: serde_json::Value) -> Result<Procedure> {
        let handler = self
            .handlers
            .get(handler_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow!("Unknown procedure handler: {}", handler_name))?;

        let name = handler_name.to_string();
        Ok(Box::new(move |token: &Token| {
            tracing::debug!("Running procedure '{}' with payload {}", name, payload);
            handler(token, &payload)
        }))
    }

    pub fn list_handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_handler(&self, handler_name: &str) -> bool {
        self.handlers.contains_key(handler_name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}
