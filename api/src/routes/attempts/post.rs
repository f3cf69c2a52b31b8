use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use common::AppState;
use db::models::attempt_answer::QuestionType;
use db::models::grading_job::SubmissionKind;
use sea_orm::DatabaseConnection;
use services::ServiceError;
use services::attempt::AttemptService;
use services::reconciler::ReconcilerContext;
use services::speaking_submission::SpeakingSubmissionService;
use services::submission::ApplyOutcome;
use services::writing_submission::WritingSubmissionService;

use crate::response::ApiResponse;
use crate::routes::attempts::get::SubmissionDetail;

/// POST /api/attempts/{attempt_id}/answers/{answer_id}/retry
///
/// Re-enters a terminally failed submission into `processing` so it can be
/// dispatched to the grading service again. For speaking answers the audio
/// upload is probed first; a retry without the recording would fail anyway.
pub async fn retry_answer(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<Arc<ReconcilerContext>>,
    Path((attempt_id, answer_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    transition_answer(app_state.db(), Some(&ctx), attempt_id, answer_id, Transition::Retry).await
}

/// POST /api/attempts/{attempt_id}/answers/{answer_id}/regrade
///
/// Re-enters a graded submission into `processing`. The stored result stays
/// visible until the new one arrives.
pub async fn regrade_answer(
    State(app_state): State<AppState>,
    Path((attempt_id, answer_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    transition_answer(app_state.db(), None, attempt_id, answer_id, Transition::Regrade).await
}

#[derive(Clone, Copy)]
enum Transition {
    Retry,
    Regrade,
}

impl Transition {
    fn denied_reason(self) -> &'static str {
        match self {
            Transition::Retry => "Only a failed submission can be retried",
            Transition::Regrade => "Only a graded submission can be regraded",
        }
    }

    fn success_message(self) -> &'static str {
        match self {
            Transition::Retry => "Submission queued for retry",
            Transition::Regrade => "Submission queued for regrading",
        }
    }
}

async fn transition_answer(
    db: &DatabaseConnection,
    ctx: Option<&ReconcilerContext>,
    attempt_id: i64,
    answer_id: i64,
    transition: Transition,
) -> axum::response::Response {
    let answer = match AttemptService::find_attempt_answer(db, attempt_id, answer_id).await {
        Ok(Some(answer)) => answer,
        Ok(None) => return not_found("Answer not found"),
        Err(err) => return internal_error(err),
    };

    let result = match answer.question_type {
        QuestionType::Speaking => {
            transition_speaking(db, ctx, answer.id, transition).await
        }
        QuestionType::Writing => transition_writing(db, answer.id, transition).await,
        QuestionType::MultipleChoice => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiResponse::<Option<SubmissionDetail>>::error(
                    "Answer is not asynchronously graded",
                )),
            )
                .into_response();
        }
    };

    match result {
        Ok(TransitionResult::Applied(detail)) => Json(ApiResponse::success(
            detail,
            transition.success_message(),
        ))
        .into_response(),
        Ok(TransitionResult::NoSubmission) => not_found("No submission for this answer"),
        Ok(TransitionResult::Denied) => (
            StatusCode::CONFLICT,
            Json(ApiResponse::<Option<SubmissionDetail>>::error(
                transition.denied_reason(),
            )),
        )
            .into_response(),
        Ok(TransitionResult::UploadMissing) => (
            StatusCode::CONFLICT,
            Json(ApiResponse::<Option<SubmissionDetail>>::error(
                "Audio upload is no longer available",
            )),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}

enum TransitionResult {
    Applied(SubmissionDetail),
    NoSubmission,
    Denied,
    UploadMissing,
}

async fn transition_speaking(
    db: &DatabaseConnection,
    ctx: Option<&ReconcilerContext>,
    answer_id: i64,
    transition: Transition,
) -> Result<TransitionResult, ServiceError> {
    let Some(submission) = SpeakingSubmissionService::find_by_attempt_answer(db, answer_id).await?
    else {
        return Ok(TransitionResult::NoSubmission);
    };

    if let (Transition::Retry, Some(ctx)) = (transition, ctx) {
        if !ctx.uploads.exists(&submission.audio_url).await {
            return Ok(TransitionResult::UploadMissing);
        }
    }

    let outcome = match transition {
        Transition::Retry => SpeakingSubmissionService::request_retry(db, &submission).await?,
        Transition::Regrade => SpeakingSubmissionService::request_regrade(db, &submission).await?,
    };
    if outcome != ApplyOutcome::Applied {
        return Ok(TransitionResult::Denied);
    }

    let updated = SpeakingSubmissionService::find_by_id(db, submission.id)
        .await?
        .ok_or_else(|| {
            ServiceError::SubjectNotFound(format!("speaking submission {}", submission.id))
        })?;
    Ok(TransitionResult::Applied(SubmissionDetail {
        id: updated.id,
        kind: SubmissionKind::Speaking,
        status: updated.status,
        overall_score: updated.overall_score,
        feedback: updated.feedback,
        failure_reason: updated.failure_reason,
        retry_count: updated.retry_count,
        updated_at: updated.updated_at,
    }))
}

async fn transition_writing(
    db: &DatabaseConnection,
    answer_id: i64,
    transition: Transition,
) -> Result<TransitionResult, ServiceError> {
    let Some(submission) = WritingSubmissionService::find_by_attempt_answer(db, answer_id).await?
    else {
        return Ok(TransitionResult::NoSubmission);
    };

    let outcome = match transition {
        Transition::Retry => WritingSubmissionService::request_retry(db, &submission).await?,
        Transition::Regrade => WritingSubmissionService::request_regrade(db, &submission).await?,
    };
    if outcome != ApplyOutcome::Applied {
        return Ok(TransitionResult::Denied);
    }

    let updated = WritingSubmissionService::find_by_id(db, submission.id)
        .await?
        .ok_or_else(|| {
            ServiceError::SubjectNotFound(format!("writing submission {}", submission.id))
        })?;
    Ok(TransitionResult::Applied(SubmissionDetail {
        id: updated.id,
        kind: SubmissionKind::Writing,
        status: updated.status,
        overall_score: updated.overall_score,
        feedback: updated.feedback,
        failure_reason: updated.failure_reason,
        retry_count: updated.retry_count,
        updated_at: updated.updated_at,
    }))
}

fn not_found(message: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<Option<SubmissionDetail>>::error(message)),
    )
        .into_response()
}

fn internal_error(err: ServiceError) -> axum::response::Response {
    tracing::error!(%err, "answer transition failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<Option<SubmissionDetail>>::error(
            "failed to update submission",
        )),
    )
        .into_response()
}
