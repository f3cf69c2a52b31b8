//! State store for writing submissions.
//!
//! Mirrors the speaking store: same guarded state machine, different score
//! columns. See `speaking_submission` for the transition rules.

use chrono::{DateTime, Utc};
use db::models::attempt_answer;
use db::models::submission_status::SubmissionStatus;
use db::models::writing_submission::{ActiveModel, Column, Entity, Model};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

use crate::error::ServiceError;
use crate::payload::CallbackPayload;
use crate::submission::ApplyOutcome;

/// Named sub-scores for a writing result.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WritingScores {
    pub task_response: Option<f64>,
    pub coherence: Option<f64>,
    pub lexical_resource: Option<f64>,
    pub grammar: Option<f64>,
    pub overall: Option<f64>,
}

impl WritingScores {
    pub fn from_payload(payload: &CallbackPayload) -> Self {
        Self {
            task_response: payload.metric("taskResponse"),
            coherence: payload.metric("coherence"),
            lexical_resource: payload.metric("lexicalResource"),
            grammar: payload.metric("grammar"),
            overall: payload.overall_score,
        }
    }

    pub fn matches_model(&self, model: &Model, feedback: &Option<String>) -> bool {
        score_eq(self.task_response, model.task_response)
            && score_eq(self.coherence, model.coherence)
            && score_eq(self.lexical_resource, model.lexical_resource)
            && score_eq(self.grammar, model.grammar)
            && score_eq(self.overall, model.overall_score)
            && *feedback == model.feedback
    }
}

fn score_eq(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => (x - y).abs() < 1e-9,
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct CreateWritingSubmission {
    pub attempt_answer_id: i64,
    pub essay_text: String,
}

pub struct WritingSubmissionService;

impl WritingSubmissionService {
    pub async fn create(
        db: &DatabaseConnection,
        params: CreateWritingSubmission,
    ) -> Result<Model, ServiceError> {
        let now = Utc::now();
        let row = ActiveModel {
            id: NotSet,
            attempt_answer_id: Set(params.attempt_answer_id),
            essay_text: Set(params.essay_text),
            status: Set(SubmissionStatus::Pending),
            task_response: Set(None),
            coherence: Set(None),
            lexical_resource: Set(None),
            grammar: Set(None),
            overall_score: Set(None),
            feedback: Set(None),
            failure_reason: Set(None),
            retry_count: Set(0),
            version: Set(0),
            dispatched_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(row.insert(db).await?)
    }

    pub async fn find_by_id(
        db: &DatabaseConnection,
        id: i64,
    ) -> Result<Option<Model>, ServiceError> {
        Ok(Entity::find_by_id(id).one(db).await?)
    }

    pub async fn find_by_attempt_answer(
        db: &DatabaseConnection,
        attempt_answer_id: i64,
    ) -> Result<Option<Model>, ServiceError> {
        Ok(Entity::find()
            .filter(Column::AttemptAnswerId.eq(attempt_answer_id))
            .order_by_desc(Column::Id)
            .one(db)
            .await?)
    }

    pub async fn mark_dispatched(
        db: &DatabaseConnection,
        current: &Model,
    ) -> Result<ApplyOutcome, ServiceError> {
        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SubmissionStatus::Processing))
            .col_expr(Column::DispatchedAt, Expr::value(Some(Utc::now())))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(current.id))
            .filter(Column::Status.eq(SubmissionStatus::Pending))
            .filter(Column::Version.eq(current.version))
            .exec(db)
            .await?;

        Self::outcome(db, current.id, update.rows_affected).await
    }

    pub async fn apply_result(
        db: &DatabaseConnection,
        current: &Model,
        scores: WritingScores,
        feedback: Option<String>,
    ) -> Result<ApplyOutcome, ServiceError> {
        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SubmissionStatus::Graded))
            .col_expr(Column::TaskResponse, Expr::value(scores.task_response))
            .col_expr(Column::Coherence, Expr::value(scores.coherence))
            .col_expr(Column::LexicalResource, Expr::value(scores.lexical_resource))
            .col_expr(Column::Grammar, Expr::value(scores.grammar))
            .col_expr(Column::OverallScore, Expr::value(scores.overall))
            .col_expr(Column::Feedback, Expr::value(feedback))
            .col_expr(Column::FailureReason, Expr::value(None::<String>))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(current.id))
            .filter(Column::Status.is_in([SubmissionStatus::Pending, SubmissionStatus::Processing]))
            .filter(Column::Version.eq(current.version))
            .exec(db)
            .await?;

        Self::outcome(db, current.id, update.rows_affected).await
    }

    pub async fn apply_partial(
        db: &DatabaseConnection,
        current: &Model,
        scores: WritingScores,
        reason: &str,
    ) -> Result<ApplyOutcome, ServiceError> {
        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SubmissionStatus::Failed))
            .col_expr(Column::TaskResponse, Expr::value(scores.task_response))
            .col_expr(Column::Coherence, Expr::value(scores.coherence))
            .col_expr(Column::LexicalResource, Expr::value(scores.lexical_resource))
            .col_expr(Column::Grammar, Expr::value(scores.grammar))
            .col_expr(Column::OverallScore, Expr::value(scores.overall))
            .col_expr(Column::FailureReason, Expr::value(Some(reason.to_string())))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(current.id))
            .filter(Column::Status.is_in([SubmissionStatus::Pending, SubmissionStatus::Processing]))
            .filter(Column::Version.eq(current.version))
            .exec(db)
            .await?;

        Self::outcome(db, current.id, update.rows_affected).await
    }

    pub async fn mark_failed(
        db: &DatabaseConnection,
        current: &Model,
        reason: &str,
    ) -> Result<ApplyOutcome, ServiceError> {
        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SubmissionStatus::Failed))
            .col_expr(Column::FailureReason, Expr::value(Some(reason.to_string())))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(current.id))
            .filter(Column::Status.is_in([SubmissionStatus::Pending, SubmissionStatus::Processing]))
            .filter(Column::Version.eq(current.version))
            .exec(db)
            .await?;

        Self::outcome(db, current.id, update.rows_affected).await
    }

    pub async fn request_retry(
        db: &DatabaseConnection,
        current: &Model,
    ) -> Result<ApplyOutcome, ServiceError> {
        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SubmissionStatus::Processing))
            .col_expr(Column::RetryCount, Expr::col(Column::RetryCount).add(1))
            .col_expr(Column::DispatchedAt, Expr::value(Some(Utc::now())))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(current.id))
            .filter(Column::Status.eq(SubmissionStatus::Failed))
            .filter(Column::Version.eq(current.version))
            .exec(db)
            .await?;

        if update.rows_affected == 1 {
            Ok(ApplyOutcome::Applied)
        } else {
            Ok(ApplyOutcome::VersionConflict)
        }
    }

    pub async fn request_regrade(
        db: &DatabaseConnection,
        current: &Model,
    ) -> Result<ApplyOutcome, ServiceError> {
        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SubmissionStatus::Processing))
            .col_expr(Column::DispatchedAt, Expr::value(Some(Utc::now())))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(current.id))
            .filter(Column::Status.eq(SubmissionStatus::Graded))
            .filter(Column::Version.eq(current.version))
            .exec(db)
            .await?;

        if update.rows_affected == 1 {
            Ok(ApplyOutcome::Applied)
        } else {
            Ok(ApplyOutcome::VersionConflict)
        }
    }

    pub async fn fail_stale(
        db: &DatabaseConnection,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<i64>, ServiceError> {
        let stale = Entity::find()
            .filter(Column::Status.eq(SubmissionStatus::Processing))
            .filter(Column::DispatchedAt.lt(cutoff))
            .all(db)
            .await?;

        let mut attempt_ids = Vec::new();
        for submission in stale {
            let outcome = Self::mark_failed(db, &submission, "grading timed out").await?;
            if outcome != ApplyOutcome::Applied {
                continue;
            }
            if let Some(answer) =
                attempt_answer::Entity::find_by_id(submission.attempt_answer_id)
                    .one(db)
                    .await?
            {
                if !attempt_ids.contains(&answer.attempt_id) {
                    attempt_ids.push(answer.attempt_id);
                }
            }
        }
        Ok(attempt_ids)
    }

    async fn outcome(
        db: &DatabaseConnection,
        id: i64,
        rows_affected: u64,
    ) -> Result<ApplyOutcome, ServiceError> {
        if rows_affected == 1 {
            return Ok(ApplyOutcome::Applied);
        }
        let row = Self::find_by_id(db, id)
            .await?
            .ok_or_else(|| ServiceError::SubjectNotFound(format!("writing submission {}", id)))?;
        if row.status.is_resolved() {
            Ok(ApplyOutcome::AlreadyResolved)
        } else {
            Ok(ApplyOutcome::VersionConflict)
        }
    }
}
