use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// Status of a quiz attempt as derived by the aggregator.
///
/// Transitions only move forward; the single permitted reversal is
/// `GradingFailed -> Graded` when a manual regrade succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "attempt_status_enum")]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    /// Handed in; no async grading has started yet.
    #[sea_orm(string_value = "submitted")]
    Submitted,
    /// At least one submission resolved, others still outstanding.
    #[sea_orm(string_value = "partially_graded")]
    PartiallyGraded,
    /// Every required submission resolved successfully.
    #[sea_orm(string_value = "graded")]
    Graded,
    /// A required submission failed terminally. Recoverable via retry.
    #[sea_orm(string_value = "grading_failed")]
    GradingFailed,
}

impl Default for AttemptStatus {
    fn default() -> Self {
        Self::InProgress
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status_str = match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::PartiallyGraded => "partially_graded",
            AttemptStatus::Graded => "graded",
            AttemptStatus::GradingFailed => "grading_failed",
        };
        write!(f, "{}", status_str)
    }
}

/// One learner's pass through a quiz.
///
/// `total_score` and `max_score` are recomputed by the aggregator and never
/// written directly by callback handling.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attempts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub status: AttemptStatus,
    pub total_score: Option<f64>,
    pub max_score: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::attempt_answer::Entity")]
    Answers,
}

impl Related<super::attempt_answer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Answers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
