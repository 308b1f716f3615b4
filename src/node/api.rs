//! HTTP API Definitions
//!
//! Endpoints and DTOs for clients that submit named procedures or inspect a node.

use serde::{Deserialize, Serialize};

pub const ENDPOINT_SUBMIT: &str = "/cs/submit";
pub const ENDPOINT_STATUS: &str = "/cs/status";
pub const ENDPOINT_HANDLERS: &str = "/cs/handlers";

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub handler: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    pub error: Option<String>,
}

impl SubmitResponse {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            error: None,
        }
    }

    pub fn rejected(error: impl ToString) -> Self {
        Self {
            accepted: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandlersResponse {
    pub handlers: Vec<String>,
}
