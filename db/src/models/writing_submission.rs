use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

use super::submission_status::SubmissionStatus;

/// One written answer dispatched for AI grading.
///
/// Same state machine as a speaking submission; only the sub-score columns
/// differ.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "writing_submissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub attempt_answer_id: i64,
    pub essay_text: String,
    pub status: SubmissionStatus,
    pub task_response: Option<f64>,
    pub coherence: Option<f64>,
    pub lexical_resource: Option<f64>,
    pub grammar: Option<f64>,
    pub overall_score: Option<f64>,
    pub feedback: Option<String>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub version: i32,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attempt_answer::Entity",
        from = "Column::AttemptAnswerId",
        to = "super::attempt_answer::Column::Id"
    )]
    AttemptAnswer,
}

impl Related<super::attempt_answer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AttemptAnswer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
