//! Node Runtime Module
//!
//! Wires a protocol engine to the outside world.
//!
//! ## Architecture Overview
//! - **Actor**: `Node` owns the inbound channel and feeds events to its engine one at a time:
//!   client submissions and protocol messages delivered by a transport.
//! - **Handle**: `NodeHandle` is the client-facing side. `submit` returns as soon as the
//!   procedure is queued for the actor; the procedure itself runs once this node holds the token.
//! - **Registry & API**: Named procedures can be submitted over HTTP by handler name.
//!
//! ## Submodules
//! - **`runtime`**: Actor loop and handle.
//! - **`registry`**: Maps handler names to procedure factories.
//! - **`api`**: HTTP endpoint constants and request/response types.
//! - **`handlers`**: `axum` handlers for submission and status.

pub mod api;
pub mod handlers;
pub mod registry;
pub mod runtime;
