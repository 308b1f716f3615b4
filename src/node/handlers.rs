use super::api::*;
use super::registry::ProcedureRegistry;
use super::runtime::NodeHandle;
use crate::mutex::types::EngineSnapshot;

use axum::{
    Extension, Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

pub fn router(node: NodeHandle, registry: Arc<ProcedureRegistry>) -> Router {
    Router::new()
        .route(ENDPOINT_SUBMIT, post(handle_submit))
        .route(ENDPOINT_STATUS, get(handle_status))
        .route(ENDPOINT_HANDLERS, get(handle_list_handlers))
        .layer(Extension(node))
        .layer(Extension(registry))
}

pub async fn handle_submit(
    Extension(node): Extension<NodeHandle>,
    Extension(registry): Extension<Arc<ProcedureRegistry>>,
    Json(req): Json<SubmitRequest>,
) -> (StatusCode, Json<SubmitResponse>) {
    let procedure = match registry.instantiate(&req.handler, req.payload) {
        Ok(procedure) => procedure,
        Err(e) => {
            tracing::warn!("Rejected submission: {}", e);
            return (StatusCode::NOT_FOUND, Json(SubmitResponse::rejected(e)));
        }
    };

    match node.submit_procedure(procedure) {
        Ok(()) => {
            tracing::info!("Queued '{}' for critical section", req.handler);
            (StatusCode::ACCEPTED, Json(SubmitResponse::accepted()))
        }
        Err(e) => {
            tracing::error!("Failed to queue '{}': {}", req.handler, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(SubmitResponse::rejected(e)),
            )
        }
    }
}

pub async fn handle_status(
    Extension(node): Extension<NodeHandle>,
) -> (StatusCode, Json<EngineSnapshot>) {
    (StatusCode::OK, Json(node.snapshot()))
}

pub async fn handle_list_handlers(
    Extension(registry): Extension<Arc<ProcedureRegistry>>,
) -> (StatusCode, Json<HandlersResponse>) {
    (
        StatusCode::OK,
        Json(HandlersResponse {
            handlers: registry.list_handlers(),
        }),
    )
}
