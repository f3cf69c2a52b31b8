use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use common::AppState;
use db::models::grading_job::SubmissionKind;
use services::reconciler::{
    AckClass, Acknowledgement, CallbackReconciler, CallbackRequest, ReconcilerContext,
};

use crate::response::ApiResponse;

pub const TIMESTAMP_HEADER: &str = "x-grading-timestamp";
pub const SIGNATURE_HEADER: &str = "x-grading-signature";

/// POST /api/webhooks/grading/speaking
///
/// Callback endpoint for speaking results. The acknowledgement body is
/// authoritative for the grading service; the HTTP status mirrors its class.
pub async fn grading_speaking(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<Arc<ReconcilerContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    handle_grading_callback(app_state, ctx, SubmissionKind::Speaking, headers, body).await
}

/// POST /api/webhooks/grading/writing
pub async fn grading_writing(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<Arc<ReconcilerContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    handle_grading_callback(app_state, ctx, SubmissionKind::Writing, headers, body).await
}

async fn handle_grading_callback(
    app_state: AppState,
    ctx: Arc<ReconcilerContext>,
    kind: SubmissionKind,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    // A missing header verifies as an invalid signature rather than a 400,
    // so probing requests learn nothing about which part was wrong.
    let timestamp = header_value(&headers, TIMESTAMP_HEADER);
    let signature_header = header_value(&headers, SIGNATURE_HEADER);

    let request = CallbackRequest {
        kind,
        raw_body: body.to_vec(),
        timestamp,
        signature_header,
    };

    match CallbackReconciler::handle_callback(app_state.db(), &ctx, request).await {
        Ok(ack) => {
            let status = status_for(ack.class);
            let message = ack.reason.clone();
            let envelope = if ack.accepted {
                ApiResponse::success(ack, message)
            } else {
                ApiResponse {
                    success: false,
                    data: ack,
                    message,
                }
            };
            (status, Json(envelope)).into_response()
        }
        Err(err) => {
            tracing::error!(%err, "callback reconciliation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Option<Acknowledgement>>::error(
                    "failed to process callback",
                )),
            )
                .into_response()
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn status_for(class: AckClass) -> StatusCode {
    match class {
        AckClass::Accepted | AckClass::AlreadyProcessed => StatusCode::OK,
        AckClass::RejectedSignature => StatusCode::UNAUTHORIZED,
        AckClass::UnknownSubject => StatusCode::NOT_FOUND,
        AckClass::Conflict => StatusCode::CONFLICT,
        AckClass::InvalidPayload => StatusCode::UNPROCESSABLE_ENTITY,
    }
}
