use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// Lifecycle of a callback event itself, distinct from the grading outcome it
/// carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize)]
#[sea_orm(
    rs_type = "String",
    db_type = "Enum",
    enum_name = "grading_job_status_enum"
)]
#[serde(rename_all = "snake_case")]
pub enum GradingJobStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Ledger row inserted; domain state not yet touched.
    #[sea_orm(string_value = "received")]
    Received,
    /// Result applied to the target submission.
    #[sea_orm(string_value = "applied")]
    Applied,
    /// Recorded for audit but never applied (bad signature, unknown subject,
    /// conflicting result).
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl std::fmt::Display for GradingJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status_str = match self {
            GradingJobStatus::Pending => "pending",
            GradingJobStatus::Received => "received",
            GradingJobStatus::Applied => "applied",
            GradingJobStatus::Rejected => "rejected",
        };
        write!(f, "{}", status_str)
    }
}

/// Which submission table a callback targets. Carried on the ledger row so the
/// recovery pass can re-drive a job without the original request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize)]
#[sea_orm(
    rs_type = "String",
    db_type = "Enum",
    enum_name = "submission_kind_enum"
)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    #[sea_orm(string_value = "speaking")]
    Speaking,
    #[sea_orm(string_value = "writing")]
    Writing,
}

impl std::fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind_str = match self {
            SubmissionKind::Speaking => "speaking",
            SubmissionKind::Writing => "writing",
        };
        write!(f, "{}", kind_str)
    }
}

/// Durable record of one grading callback event.
///
/// Exactly one row exists per `event_id` (unique constraint); the conditional
/// insert against that constraint is what converts at-least-once delivery
/// into at-most-once effect. `raw_payload` keeps the exact bytes received for
/// signature re-verification and forensic replay.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "grading_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub event_id: String,
    pub provider: String,
    pub model: String,
    pub attempt_id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub submission_kind: SubmissionKind,
    pub submission_id: Option<i64>,
    pub status: GradingJobStatus,
    pub signature_valid: bool,
    pub raw_payload: String,
    pub reject_reason: Option<String>,
    pub received_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
