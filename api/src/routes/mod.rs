//! HTTP route entry point for `/api/...`.
//!
//! Route groups:
//! - `/health` → health check endpoint (public)
//! - `/webhooks` → grading callback endpoints (signature-authenticated, no
//!   session auth — the HMAC header is the credential)
//! - `/attempts` → attempt status and retry/regrade endpoints

use std::sync::Arc;

use axum::{Extension, Router};
use common::AppState;
use services::reconciler::ReconcilerContext;

use crate::routes::{attempts::attempts_routes, health::health_routes, webhooks::webhooks_routes};

pub mod attempts;
pub mod health;
pub mod webhooks;

/// Builds the complete application router for all HTTP endpoints.
///
/// The reconciler context rides alongside `AppState` as an `Extension` so the
/// webhook and retry handlers share one set of policy knobs and collaborator
/// handles.
pub fn routes(app_state: AppState, ctx: Arc<ReconcilerContext>) -> Router {
    Router::new()
        .nest("/health", health_routes())
        .nest("/webhooks", webhooks_routes())
        .nest("/attempts", attempts_routes())
        .layer(Extension(ctx))
        .with_state(app_state)
}
