//! Idempotent ledger of grading callback events.
//!
//! Every delivery is recorded, valid or not. The unique constraint on
//! `event_id` plus a single conditional insert converts the grading service's
//! at-least-once delivery into at-most-once effect: only the delivery that
//! wins the insert proceeds to reconciliation.

use chrono::{DateTime, Utc};
use db::models::grading_job::{
    ActiveModel, Column, Entity, GradingJobStatus, Model, SubmissionKind,
};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
};

use crate::error::ServiceError;

/// Parameters for recording one callback delivery.
#[derive(Debug, Clone)]
pub struct RecordJob {
    pub event_id: String,
    pub provider: String,
    pub model: String,
    pub attempt_id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub submission_kind: SubmissionKind,
    pub signature_valid: bool,
    pub raw_payload: String,
}

/// Outcome of [`GradingJobService::record`]. `is_new` is false when a row for
/// this `event_id` already existed, in which case `job` is that existing row,
/// untouched by the current delivery.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub is_new: bool,
    pub job: Model,
}

pub struct GradingJobService;

impl GradingJobService {
    /// Inserts the ledger row for an event, or returns the existing one.
    ///
    /// The insert carries `ON CONFLICT (event_id) DO NOTHING`, so the
    /// uniqueness check and the write are one atomic statement; concurrent
    /// deliveries of the same event cannot both observe `is_new == true`.
    ///
    /// Invalid-signature deliveries are still recorded for audit but enter
    /// the ledger as `rejected` and never proceed to reconciliation.
    pub async fn record(
        db: &DatabaseConnection,
        params: RecordJob,
    ) -> Result<Recorded, ServiceError> {
        let status = if params.signature_valid {
            GradingJobStatus::Received
        } else {
            GradingJobStatus::Rejected
        };
        let reject_reason = if params.signature_valid {
            None
        } else {
            Some("invalid signature".to_string())
        };

        let row = ActiveModel {
            id: NotSet,
            event_id: Set(params.event_id.clone()),
            provider: Set(params.provider),
            model: Set(params.model),
            attempt_id: Set(params.attempt_id),
            quiz_id: Set(params.quiz_id),
            user_id: Set(params.user_id),
            submission_kind: Set(params.submission_kind),
            submission_id: Set(None),
            status: Set(status),
            signature_valid: Set(params.signature_valid),
            raw_payload: Set(params.raw_payload),
            reject_reason: Set(reject_reason),
            received_at: Set(Utc::now()),
            applied_at: Set(None),
        };

        let insert = Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::EventId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(db)
            .await;

        match insert {
            Ok(res) => {
                let job = Entity::find_by_id(res.last_insert_id)
                    .one(db)
                    .await?
                    .ok_or_else(|| {
                        DbErr::RecordNotFound(format!(
                            "grading job {} vanished after insert",
                            res.last_insert_id
                        ))
                    })?;
                Ok(Recorded { is_new: true, job })
            }
            // Lost the insert race (or a retry of an already-recorded event):
            // hand back the winner's row.
            Err(DbErr::RecordNotInserted) => {
                let job = Self::find_by_event_id(db, &params.event_id)
                    .await?
                    .ok_or_else(|| {
                        DbErr::RecordNotFound(format!(
                            "grading job for event {} missing after conflict",
                            params.event_id
                        ))
                    })?;
                Ok(Recorded { is_new: false, job })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_by_event_id(
        db: &DatabaseConnection,
        event_id: &str,
    ) -> Result<Option<Model>, ServiceError> {
        Ok(Entity::find()
            .filter(Column::EventId.eq(event_id))
            .one(db)
            .await?)
    }

    /// Marks a job applied, stamping `applied_at` and the resolved submission.
    pub async fn mark_applied(
        db: &DatabaseConnection,
        job_id: i64,
        submission_id: i64,
    ) -> Result<(), ServiceError> {
        let job = ActiveModel {
            id: Set(job_id),
            status: Set(GradingJobStatus::Applied),
            submission_id: Set(Some(submission_id)),
            applied_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        Entity::update(job).exec(db).await?;
        Ok(())
    }

    pub async fn mark_rejected(
        db: &DatabaseConnection,
        job_id: i64,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let job = ActiveModel {
            id: Set(job_id),
            status: Set(GradingJobStatus::Rejected),
            reject_reason: Set(Some(reason.to_string())),
            ..Default::default()
        };
        Entity::update(job).exec(db).await?;
        Ok(())
    }

    /// Jobs that passed the ledger gate but whose apply step never finished,
    /// e.g. because the process died mid-reconciliation. The recovery pass
    /// re-drives these from their stored payload.
    pub async fn stuck_received(
        db: &DatabaseConnection,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Model>, ServiceError> {
        Ok(Entity::find()
            .filter(Column::Status.eq(GradingJobStatus::Received))
            .filter(Column::ReceivedAt.lt(older_than))
            .all(db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::test_utils::setup_test_db;

    fn record_params(event_id: &str) -> RecordJob {
        RecordJob {
            event_id: event_id.to_string(),
            provider: "speechgrader".into(),
            model: "sg-2".into(),
            attempt_id: 1,
            quiz_id: 1,
            user_id: 1,
            submission_kind: SubmissionKind::Speaking,
            signature_valid: true,
            raw_payload: r#"{"eventId":"evt"}"#.into(),
        }
    }

    #[tokio::test]
    async fn first_record_is_new_and_received() {
        let db = setup_test_db().await;

        let recorded = GradingJobService::record(&db, record_params("evt-1"))
            .await
            .unwrap();

        assert!(recorded.is_new);
        assert_eq!(recorded.job.status, GradingJobStatus::Received);
        assert!(recorded.job.signature_valid);
        assert!(recorded.job.applied_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_event_returns_existing_row_unchanged() {
        let db = setup_test_db().await;

        let first = GradingJobService::record(&db, record_params("evt-1"))
            .await
            .unwrap();

        // Second delivery carries a different payload; the ledger must keep
        // the original bytes.
        let mut dup = record_params("evt-1");
        dup.raw_payload = r#"{"tampered":true}"#.into();
        let second = GradingJobService::record(&db, dup).await.unwrap();

        assert!(!second.is_new);
        assert_eq!(second.job.id, first.job.id);
        assert_eq!(second.job.raw_payload, first.job.raw_payload);
    }

    #[tokio::test]
    async fn invalid_signature_is_recorded_as_rejected() {
        let db = setup_test_db().await;

        let mut params = record_params("evt-bad");
        params.signature_valid = false;
        let recorded = GradingJobService::record(&db, params).await.unwrap();

        assert!(recorded.is_new);
        assert_eq!(recorded.job.status, GradingJobStatus::Rejected);
        assert!(!recorded.job.signature_valid);
        assert_eq!(recorded.job.reject_reason.as_deref(), Some("invalid signature"));
    }

    #[tokio::test]
    async fn concurrent_deliveries_yield_exactly_one_new() {
        let db = setup_test_db().await;

        let (a, b, c) = tokio::join!(
            GradingJobService::record(&db, record_params("evt-race")),
            GradingJobService::record(&db, record_params("evt-race")),
            GradingJobService::record(&db, record_params("evt-race")),
        );
        let outcomes = [a.unwrap(), b.unwrap(), c.unwrap()];

        let winners = outcomes.iter().filter(|r| r.is_new).count();
        assert_eq!(winners, 1, "exactly one delivery may win the insert");

        let all = Entity::find()
            .filter(Column::EventId.eq("evt-race"))
            .all(&db)
            .await
            .unwrap();
        assert_eq!(all.len(), 1, "ledger must contain a single row per event");
    }

    #[tokio::test]
    async fn stuck_received_excludes_applied_and_recent_rows() {
        let db = setup_test_db().await;

        let stuck = GradingJobService::record(&db, record_params("evt-stuck"))
            .await
            .unwrap();
        let done = GradingJobService::record(&db, record_params("evt-done"))
            .await
            .unwrap();
        GradingJobService::mark_applied(&db, done.job.id, 7).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let found = GradingJobService::stuck_received(&db, cutoff).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stuck.job.id);

        let past_cutoff = Utc::now() - chrono::Duration::minutes(5);
        let none = GradingJobService::stuck_received(&db, past_cutoff)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
