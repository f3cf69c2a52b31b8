//! Attempt status and grading-recovery endpoints.

use axum::{
    Router,
    routing::{get, post},
};
use common::AppState;

pub mod get;
pub mod post;

use get::get_attempt;
use post::{regrade_answer, retry_answer};

pub fn attempts_routes() -> Router<AppState> {
    Router::new()
        .route("/{attempt_id}", get(get_attempt))
        .route("/{attempt_id}/answers/{answer_id}/retry", post(retry_answer))
        .route(
            "/{attempt_id}/answers/{answer_id}/regrade",
            post(regrade_answer),
        )
}
