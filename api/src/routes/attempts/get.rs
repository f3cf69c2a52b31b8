use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use common::AppState;
use db::models::attempt::AttemptStatus;
use db::models::attempt_answer::QuestionType;
use db::models::grading_job::SubmissionKind;
use db::models::submission_status::SubmissionStatus;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use services::ServiceError;
use services::attempt::AttemptService;
use services::speaking_submission::SpeakingSubmissionService;
use services::writing_submission::WritingSubmissionService;

use crate::response::ApiResponse;

/// Latest grading state of an asynchronously graded answer.
#[derive(Serialize)]
pub struct SubmissionDetail {
    pub id: i64,
    pub kind: SubmissionKind,
    pub status: SubmissionStatus,
    pub overall_score: Option<f64>,
    pub feedback: Option<String>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct AnswerDetail {
    pub id: i64,
    pub question_id: i64,
    pub question_type: QuestionType,
    pub score: Option<f64>,
    pub max_score: f64,
    pub submission: Option<SubmissionDetail>,
}

#[derive(Serialize)]
pub struct AttemptDetail {
    pub id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub status: AttemptStatus,
    pub total_score: Option<f64>,
    pub max_score: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub answers: Vec<AnswerDetail>,
}

/// GET /api/attempts/{attempt_id}
///
/// Aggregated grading status of one attempt, with per-answer submission
/// state so a client can poll while asynchronous grading is in flight.
pub async fn get_attempt(
    State(app_state): State<AppState>,
    Path(attempt_id): Path<i64>,
) -> impl IntoResponse {
    let db = app_state.db();

    let attempt = match AttemptService::find_by_id(db, attempt_id).await {
        Ok(Some(attempt)) => attempt,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<Option<AttemptDetail>>::error(
                    "Attempt not found",
                )),
            )
                .into_response();
        }
        Err(err) => return internal_error(err),
    };

    let answers = match AttemptService::answers(db, attempt_id).await {
        Ok(answers) => answers,
        Err(err) => return internal_error(err),
    };

    let mut answer_views = Vec::with_capacity(answers.len());
    for answer in answers {
        let submission = match latest_submission(db, answer.id, answer.question_type).await {
            Ok(submission) => submission,
            Err(err) => return internal_error(err),
        };
        answer_views.push(AnswerDetail {
            id: answer.id,
            question_id: answer.question_id,
            question_type: answer.question_type,
            score: answer.score,
            max_score: answer.max_score,
            submission,
        });
    }

    let detail = AttemptDetail {
        id: attempt.id,
        quiz_id: attempt.quiz_id,
        user_id: attempt.user_id,
        status: attempt.status,
        total_score: attempt.total_score,
        max_score: attempt.max_score,
        submitted_at: attempt.submitted_at,
        answers: answer_views,
    };

    Json(ApiResponse::success(detail, "Attempt retrieved")).into_response()
}

async fn latest_submission(
    db: &DatabaseConnection,
    answer_id: i64,
    question_type: QuestionType,
) -> Result<Option<SubmissionDetail>, ServiceError> {
    match question_type {
        QuestionType::Speaking => {
            Ok(SpeakingSubmissionService::find_by_attempt_answer(db, answer_id)
                .await?
                .map(|submission| SubmissionDetail {
                    id: submission.id,
                    kind: SubmissionKind::Speaking,
                    status: submission.status,
                    overall_score: submission.overall_score,
                    feedback: submission.feedback,
                    failure_reason: submission.failure_reason,
                    retry_count: submission.retry_count,
                    updated_at: submission.updated_at,
                }))
        }
        QuestionType::Writing => {
            Ok(WritingSubmissionService::find_by_attempt_answer(db, answer_id)
                .await?
                .map(|submission| SubmissionDetail {
                    id: submission.id,
                    kind: SubmissionKind::Writing,
                    status: submission.status,
                    overall_score: submission.overall_score,
                    feedback: submission.feedback,
                    failure_reason: submission.failure_reason,
                    retry_count: submission.retry_count,
                    updated_at: submission.updated_at,
                }))
        }
        QuestionType::MultipleChoice => Ok(None),
    }
}

fn internal_error(err: ServiceError) -> axum::response::Response {
    tracing::error!(%err, "attempt lookup failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<Option<AttemptDetail>>::error(
            "failed to load attempt",
        )),
    )
        .into_response()
}
