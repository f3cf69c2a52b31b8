//! Grading callback endpoints.
//!
//! These routes are exempt from session authentication; the HMAC signature
//! header is the credential. The body is read as raw bytes before any JSON
//! parsing so the signature covers exactly what was sent.

use axum::{Router, routing::post};
use common::AppState;

pub mod post;

use post::{grading_speaking, grading_writing};

pub fn webhooks_routes() -> Router<AppState> {
    Router::new()
        .route("/grading/speaking", post(grading_speaking))
        .route("/grading/writing", post(grading_writing))
}
