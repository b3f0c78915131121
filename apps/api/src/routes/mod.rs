pub mod health;
pub mod interview;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/interview/start", post(interview::start))
        .route("/api/interview/reset", post(interview::reset))
        .route("/api/retrieve", post(interview::retrieve))
        .route("/api/evaluation/start", post(interview::evaluation_start))
        .route("/api/evaluation/submit", post(interview::evaluation_submit))
        .route("/api/conversations", get(interview::list_conversations))
        .route("/api/conversations/:sessionId", delete(interview::delete_conversation))
        .route("/api/traces/:sessionId", get(interview::get_trace))
        .with_state(state)
}
