//! Attempt store and score aggregator.
//!
//! `recompute` is the only writer of an attempt's `total_score`, `max_score`
//! and grading status. It derives the outcome from prefetched answer and
//! submission rows, so the decision logic is a pure function that tests
//! exercise without a database.

use chrono::Utc;
use db::models::attempt::{self, AttemptStatus};
use db::models::attempt_answer::{self, QuestionType};
use db::models::submission_status::SubmissionStatus;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

use crate::error::ServiceError;
use crate::speaking_submission::SpeakingSubmissionService;
use crate::writing_submission::WritingSubmissionService;

#[derive(Debug, Clone)]
pub struct CreateAttempt {
    pub quiz_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone)]
pub struct CreateAttemptAnswer {
    pub attempt_id: i64,
    pub question_id: i64,
    pub question_type: QuestionType,
    pub max_score: f64,
}

/// Grading state of one answer, prefetched for the aggregator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerView {
    pub question_type: QuestionType,
    pub max_score: f64,
    /// Immediate score for multiple-choice answers.
    pub answer_score: Option<f64>,
    /// Latest submission state for speaking/writing answers.
    pub submission: Option<SubmissionView>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmissionView {
    pub status: SubmissionStatus,
    pub overall: Option<f64>,
}

/// What the attempt should look like given its answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptOutcome {
    pub status: AttemptStatus,
    pub total_score: f64,
    pub max_score: f64,
}

/// Derives attempt status and scores from the answers alone.
///
/// A failed submission only drives the attempt to `GradingFailed` once
/// nothing else is in flight; a retry re-entering `processing` keeps the
/// attempt partially graded instead.
pub fn derive_outcome(answers: &[AnswerView]) -> AttemptOutcome {
    let mut total = 0.0;
    let mut max = 0.0;
    let mut any_failed = false;
    let mut any_in_flight = false;
    let mut any_started = false;
    let mut any_resolved = false;

    for answer in answers {
        max += answer.max_score;

        if !answer.question_type.requires_async_grading() {
            total += answer.answer_score.unwrap_or(0.0);
            continue;
        }

        match answer.submission {
            None | Some(SubmissionView { status: SubmissionStatus::Pending, .. }) => {
                any_in_flight = true;
            }
            Some(SubmissionView { status: SubmissionStatus::Processing, .. }) => {
                any_in_flight = true;
                any_started = true;
            }
            Some(SubmissionView {
                status: SubmissionStatus::Graded,
                overall,
            }) => {
                any_resolved = true;
                total += overall.unwrap_or(0.0).clamp(0.0, answer.max_score);
            }
            Some(SubmissionView { status: SubmissionStatus::Failed, .. }) => {
                any_failed = true;
            }
        }
    }

    let status = if any_in_flight {
        if any_resolved || any_failed || any_started {
            AttemptStatus::PartiallyGraded
        } else {
            AttemptStatus::Submitted
        }
    } else if any_failed {
        AttemptStatus::GradingFailed
    } else {
        AttemptStatus::Graded
    };

    AttemptOutcome {
        status,
        total_score: total,
        max_score: max,
    }
}

pub struct AttemptService;

impl AttemptService {
    pub async fn create(
        db: &DatabaseConnection,
        params: CreateAttempt,
    ) -> Result<attempt::Model, ServiceError> {
        let now = Utc::now();
        let row = attempt::ActiveModel {
            id: NotSet,
            quiz_id: Set(params.quiz_id),
            user_id: Set(params.user_id),
            status: Set(AttemptStatus::InProgress),
            total_score: Set(None),
            max_score: Set(None),
            submitted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(row.insert(db).await?)
    }

    pub async fn find_by_id(
        db: &DatabaseConnection,
        id: i64,
    ) -> Result<Option<attempt::Model>, ServiceError> {
        Ok(attempt::Entity::find_by_id(id).one(db).await?)
    }

    pub async fn add_answer(
        db: &DatabaseConnection,
        params: CreateAttemptAnswer,
    ) -> Result<attempt_answer::Model, ServiceError> {
        let now = Utc::now();
        let row = attempt_answer::ActiveModel {
            id: NotSet,
            attempt_id: Set(params.attempt_id),
            question_id: Set(params.question_id),
            question_type: Set(params.question_type),
            score: Set(None),
            max_score: Set(params.max_score),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(row.insert(db).await?)
    }

    /// Collaborator contract: locate one answer within an attempt.
    pub async fn find_attempt_answer(
        db: &DatabaseConnection,
        attempt_id: i64,
        answer_id: i64,
    ) -> Result<Option<attempt_answer::Model>, ServiceError> {
        Ok(attempt_answer::Entity::find()
            .filter(attempt_answer::Column::Id.eq(answer_id))
            .filter(attempt_answer::Column::AttemptId.eq(attempt_id))
            .one(db)
            .await?)
    }

    pub async fn answers(
        db: &DatabaseConnection,
        attempt_id: i64,
    ) -> Result<Vec<attempt_answer::Model>, ServiceError> {
        Ok(attempt_answer::Entity::find()
            .filter(attempt_answer::Column::AttemptId.eq(attempt_id))
            .order_by_asc(attempt_answer::Column::Id)
            .all(db)
            .await?)
    }

    /// Immediate scoring path for multiple-choice answers.
    pub async fn record_choice_score(
        db: &DatabaseConnection,
        answer_id: i64,
        score: f64,
    ) -> Result<(), ServiceError> {
        let row = attempt_answer::ActiveModel {
            id: Set(answer_id),
            score: Set(Some(score)),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        attempt_answer::Entity::update(row).exec(db).await?;
        Ok(())
    }

    /// `in_progress -> submitted`, stamping `submitted_at`.
    pub async fn mark_submitted(
        db: &DatabaseConnection,
        attempt_id: i64,
    ) -> Result<(), ServiceError> {
        let row = attempt::ActiveModel {
            id: Set(attempt_id),
            status: Set(AttemptStatus::Submitted),
            submitted_at: Set(Some(Utc::now())),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        attempt::Entity::update(row).exec(db).await?;
        Ok(())
    }

    /// Recomputes the attempt's grading status and scores from its answers.
    ///
    /// Idempotent: unchanged inputs produce no write. A `graded` attempt
    /// never regresses, whatever the derived outcome says.
    pub async fn recompute(
        db: &DatabaseConnection,
        attempt_id: i64,
    ) -> Result<attempt::Model, ServiceError> {
        let current = Self::find_by_id(db, attempt_id)
            .await?
            .ok_or_else(|| ServiceError::SubjectNotFound(format!("attempt {}", attempt_id)))?;

        let answers = Self::answers(db, attempt_id).await?;
        let mut views = Vec::with_capacity(answers.len());
        for answer in &answers {
            let submission = match answer.question_type {
                QuestionType::MultipleChoice => None,
                QuestionType::Speaking => {
                    SpeakingSubmissionService::find_by_attempt_answer(db, answer.id)
                        .await?
                        .map(|s| SubmissionView {
                            status: s.status,
                            overall: s.overall_score,
                        })
                }
                QuestionType::Writing => {
                    WritingSubmissionService::find_by_attempt_answer(db, answer.id)
                        .await?
                        .map(|s| SubmissionView {
                            status: s.status,
                            overall: s.overall_score,
                        })
                }
            };

            // Mirror a resolved submission's score onto the answer row.
            if let Some(SubmissionView {
                status: SubmissionStatus::Graded,
                overall: Some(overall),
            }) = submission
            {
                let earned = overall.clamp(0.0, answer.max_score);
                if answer.score != Some(earned) {
                    let row = attempt_answer::ActiveModel {
                        id: Set(answer.id),
                        score: Set(Some(earned)),
                        updated_at: Set(Utc::now()),
                        ..Default::default()
                    };
                    attempt_answer::Entity::update(row).exec(db).await?;
                }
            }

            views.push(AnswerView {
                question_type: answer.question_type,
                max_score: answer.max_score,
                answer_score: answer.score,
                submission,
            });
        }

        let outcome = derive_outcome(&views);

        // Forward-only: a graded attempt stays graded.
        if current.status == AttemptStatus::Graded && outcome.status != AttemptStatus::Graded {
            return Ok(current);
        }

        let unchanged = current.status == outcome.status
            && current.total_score == Some(outcome.total_score)
            && current.max_score == Some(outcome.max_score);
        if unchanged {
            return Ok(current);
        }

        let row = attempt::ActiveModel {
            id: Set(attempt_id),
            status: Set(outcome.status),
            total_score: Set(Some(outcome.total_score)),
            max_score: Set(Some(outcome.max_score)),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        Ok(attempt::Entity::update(row).exec(db).await?)
    }
}
