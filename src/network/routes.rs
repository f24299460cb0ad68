use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::consensus::{
    message::{NodeState, PeerMessage},
    processor::{ConsensusProcessor, StartOutcome},
};

/// Control and state-exchange surface of one node.
pub fn create_router(processor: Arc<ConsensusProcessor>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/message", post(message_handler))
        .route("/start", get(start_handler))
        .route("/stop", get(stop_handler))
        .route("/getState", get(get_state_handler))
        .with_state(processor)
}

async fn status_handler(State(processor): State<Arc<ConsensusProcessor>>) -> (StatusCode, &'static str) {
    if processor.config().is_faulty {
        (StatusCode::INTERNAL_SERVER_ERROR, "faulty")
    } else {
        (StatusCode::OK, "live")
    }
}

async fn message_handler(
    State(processor): State<Arc<ConsensusProcessor>>,
    Json(message): Json<PeerMessage>,
) -> StatusCode {
    processor.on_message(message).await;
    StatusCode::OK
}

async fn start_handler(State(processor): State<Arc<ConsensusProcessor>>) -> (StatusCode, String) {
    match processor.start().await {
        Ok(StartOutcome::Started) => (StatusCode::OK, "started".to_string()),
        Ok(StartOutcome::AlreadyStarted) => (StatusCode::OK, "already started".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn stop_handler(State(processor): State<Arc<ConsensusProcessor>>) -> (StatusCode, &'static str) {
    processor.stop().await;
    (StatusCode::OK, "stopped")
}

async fn get_state_handler(State(processor): State<Arc<ConsensusProcessor>>) -> Json<NodeState> {
    Json(processor.state().await)
}
