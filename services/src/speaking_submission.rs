//! State store for speaking submissions.
//!
//! Every transition is a single conditional update guarded on the current
//! status and the optimistic-lock `version` column, so concurrent writers on
//! the same row cannot silently overwrite each other. Zero rows affected
//! means the guard failed; the row is re-read to report why.

use chrono::{DateTime, Utc};
use db::models::attempt_answer;
use db::models::speaking_submission::{ActiveModel, Column, Entity, Model};
use db::models::submission_status::SubmissionStatus;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

use crate::error::ServiceError;
use crate::payload::CallbackPayload;
use crate::submission::ApplyOutcome;

/// Named sub-scores for a speaking result, pulled from the callback's
/// `metrics` map plus the top-level overall score.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpeakingScores {
    pub pronunciation: Option<f64>,
    pub fluency: Option<f64>,
    pub vocabulary: Option<f64>,
    pub grammar: Option<f64>,
    pub overall: Option<f64>,
}

impl SpeakingScores {
    pub fn from_payload(payload: &CallbackPayload) -> Self {
        Self {
            pronunciation: payload.metric("pronunciation"),
            fluency: payload.metric("fluency"),
            vocabulary: payload.metric("vocabulary"),
            grammar: payload.metric("grammar"),
            overall: payload.overall_score,
        }
    }

    /// Whether a stored submission already carries exactly these values.
    /// Used to tell an idempotent replay from a conflicting result.
    pub fn matches_model(&self, model: &Model, feedback: &Option<String>) -> bool {
        score_eq(self.pronunciation, model.pronunciation)
            && score_eq(self.fluency, model.fluency)
            && score_eq(self.vocabulary, model.vocabulary)
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
pub struct CreateSpeakingSubmission {
    pub attempt_answer_id: i64,
    pub audio_url: String,
}

pub struct SpeakingSubmissionService;

impl SpeakingSubmissionService {
    pub async fn create(
        db: &DatabaseConnection,
        params: CreateSpeakingSubmission,
    ) -> Result<Model, ServiceError> {
        let now = Utc::now();
        let row = ActiveModel {
            id: NotSet,
            attempt_answer_id: Set(params.attempt_answer_id),
            audio_url: Set(params.audio_url),
            status: Set(SubmissionStatus::Pending),
            pronunciation: Set(None),
            fluency: Set(None),
            vocabulary: Set(None),
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

    /// Latest submission for an answer, if any.
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

    /// `pending -> processing` when the answer is handed to the grading
    /// service. Stamps `dispatched_at` so the timeout sweep has a baseline.
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

    /// Writes scores and feedback and moves the submission to `graded`.
    ///
    /// Accepted while the submission is `pending` or `processing`; a resolved
    /// submission reports `AlreadyResolved` and is left untouched.
    pub async fn apply_result(
        db: &DatabaseConnection,
        current: &Model,
        scores: SpeakingScores,
        feedback: Option<String>,
    ) -> Result<ApplyOutcome, ServiceError> {
        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SubmissionStatus::Graded))
            .col_expr(Column::Pronunciation, Expr::value(scores.pronunciation))
            .col_expr(Column::Fluency, Expr::value(scores.fluency))
            .col_expr(Column::Vocabulary, Expr::value(scores.vocabulary))
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

    /// Stores whatever sub-scores a PARTIAL callback carried, then marks the
    /// submission failed with the given reason.
    pub async fn apply_partial(
        db: &DatabaseConnection,
        current: &Model,
        scores: SpeakingScores,
        reason: &str,
    ) -> Result<ApplyOutcome, ServiceError> {
        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SubmissionStatus::Failed))
            .col_expr(Column::Pronunciation, Expr::value(scores.pronunciation))
            .col_expr(Column::Fluency, Expr::value(scores.fluency))
            .col_expr(Column::Vocabulary, Expr::value(scores.vocabulary))
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

    /// `processing -> failed`, recording the reason for operator visibility.
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

    /// `failed -> processing` on an explicit retry request.
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

    /// `graded -> processing`, admin-triggered regrade. The stored scores
    /// remain until the new result overwrites them.
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

    /// The timeout sweep: submissions stuck in `processing` since before
    /// `cutoff` become `failed`. Returns the owning attempt ids so the caller
    /// can recompute each affected attempt.
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
            .ok_or_else(|| ServiceError::SubjectNotFound(format!("speaking submission {}", id)))?;
        if row.status.is_resolved() {
            Ok(ApplyOutcome::AlreadyResolved)
        } else {
            Ok(ApplyOutcome::VersionConflict)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::{AttemptService, CreateAttempt, CreateAttemptAnswer};
    use db::models::attempt_answer::QuestionType;
    use db::test_utils::setup_test_db;

    async fn seed_submission(db: &DatabaseConnection) -> Model {
        let attempt = AttemptService::create(
            db,
            CreateAttempt {
                quiz_id: 1,
                user_id: 1,
            },
        )
        .await
        .unwrap();
        let answer = AttemptService::add_answer(
            db,
            CreateAttemptAnswer {
                attempt_id: attempt.id,
                question_id: 1,
                question_type: QuestionType::Speaking,
                max_score: 10.0,
            },
        )
        .await
        .unwrap();
        SpeakingSubmissionService::create(
            db,
            CreateSpeakingSubmission {
                attempt_answer_id: answer.id,
                audio_url: "blob://recordings/1.ogg".into(),
            },
        )
        .await
        .unwrap()
    }

    fn full_scores() -> SpeakingScores {
        SpeakingScores {
            pronunciation: Some(8.0),
            fluency: Some(9.0),
            vocabulary: Some(7.5),
            grammar: Some(8.0),
            overall: Some(8.5),
        }
    }

    #[tokio::test]
    async fn apply_result_grades_a_pending_submission() {
        let db = setup_test_db().await;
        let submission = seed_submission(&db).await;
        assert_eq!(submission.status, SubmissionStatus::Pending);

        let outcome = SpeakingSubmissionService::apply_result(
            &db,
            &submission,
            full_scores(),
            Some("Well spoken".into()),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let updated = SpeakingSubmissionService::find_by_id(&db, submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, SubmissionStatus::Graded);
        assert_eq!(updated.overall_score, Some(8.5));
        assert_eq!(updated.feedback.as_deref(), Some("Well spoken"));
        assert_eq!(updated.version, submission.version + 1);
    }

    #[tokio::test]
    async fn graded_submission_is_never_overwritten() {
        let db = setup_test_db().await;
        let submission = seed_submission(&db).await;

        SpeakingSubmissionService::apply_result(&db, &submission, full_scores(), None)
            .await
            .unwrap();
        let graded = SpeakingSubmissionService::find_by_id(&db, submission.id)
            .await
            .unwrap()
            .unwrap();

        let mut different = full_scores();
        different.overall = Some(3.0);
        let outcome =
            SpeakingSubmissionService::apply_result(&db, &graded, different, None)
                .await
                .unwrap();
        assert_eq!(outcome, ApplyOutcome::AlreadyResolved);

        let unchanged = SpeakingSubmissionService::find_by_id(&db, submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.overall_score, Some(8.5));
    }

    #[tokio::test]
    async fn stale_reader_gets_version_conflict() {
        let db = setup_test_db().await;
        let submission = seed_submission(&db).await;

        // Another writer dispatches the submission; our copy is now stale.
        SpeakingSubmissionService::mark_dispatched(&db, &submission)
            .await
            .unwrap();

        let outcome =
            SpeakingSubmissionService::mark_dispatched(&db, &submission).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::VersionConflict);
    }

    #[tokio::test]
    async fn failed_submission_can_be_retried_then_graded() {
        let db = setup_test_db().await;
        let submission = seed_submission(&db).await;

        SpeakingSubmissionService::mark_dispatched(&db, &submission)
            .await
            .unwrap();
        let processing = SpeakingSubmissionService::find_by_id(&db, submission.id)
            .await
            .unwrap()
            .unwrap();

        SpeakingSubmissionService::mark_failed(&db, &processing, "model unavailable")
            .await
            .unwrap();
        let failed = SpeakingSubmissionService::find_by_id(&db, submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, SubmissionStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("model unavailable"));

        let outcome = SpeakingSubmissionService::request_retry(&db, &failed)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let retrying = SpeakingSubmissionService::find_by_id(&db, submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retrying.status, SubmissionStatus::Processing);
        assert_eq!(retrying.retry_count, 1);

        let outcome =
            SpeakingSubmissionService::apply_result(&db, &retrying, full_scores(), None)
                .await
                .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn regrade_reenters_processing_only_from_graded() {
        let db = setup_test_db().await;
        let submission = seed_submission(&db).await;

        let denied = SpeakingSubmissionService::request_regrade(&db, &submission)
            .await
            .unwrap();
        assert_eq!(denied, ApplyOutcome::VersionConflict);

        SpeakingSubmissionService::apply_result(&db, &submission, full_scores(), None)
            .await
            .unwrap();
        let graded = SpeakingSubmissionService::find_by_id(&db, submission.id)
            .await
            .unwrap()
            .unwrap();

        let outcome = SpeakingSubmissionService::request_regrade(&db, &graded)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let regrading = SpeakingSubmissionService::find_by_id(&db, submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(regrading.status, SubmissionStatus::Processing);
        // Old result stays visible until the regrade resolves.
        assert_eq!(regrading.overall_score, Some(8.5));
    }

    #[tokio::test]
    async fn fail_stale_times_out_old_processing_rows() {
        let db = setup_test_db().await;
        let submission = seed_submission(&db).await;
        SpeakingSubmissionService::mark_dispatched(&db, &submission)
            .await
            .unwrap();

        // Cutoff in the future: everything dispatched before it is stale.
        let cutoff = Utc::now() + chrono::Duration::seconds(5);
        let attempts = SpeakingSubmissionService::fail_stale(&db, cutoff).await.unwrap();
        assert_eq!(attempts.len(), 1);

        let timed_out = SpeakingSubmissionService::find_by_id(&db, submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timed_out.status, SubmissionStatus::Failed);
        assert_eq!(timed_out.failure_reason.as_deref(), Some("grading timed out"));

        // Second sweep finds nothing; failed rows are not re-failed.
        let again = SpeakingSubmissionService::fail_stale(&db, cutoff).await.unwrap();
        assert!(again.is_empty());
    }
}
