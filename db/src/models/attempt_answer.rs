use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "question_type_enum")]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// Scored immediately at submit time; no callback involved.
    #[sea_orm(string_value = "multiple_choice")]
    MultipleChoice,
    #[sea_orm(string_value = "speaking")]
    Speaking,
    #[sea_orm(string_value = "writing")]
    Writing,
}

impl QuestionType {
    /// Whether this answer's score arrives through the grading callback
    /// pipeline rather than at submit time.
    pub fn requires_async_grading(&self) -> bool {
        matches!(self, QuestionType::Speaking | QuestionType::Writing)
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let type_str = match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::Speaking => "speaking",
            QuestionType::Writing => "writing",
        };
        write!(f, "{}", type_str)
    }
}

/// One answer within an attempt. Speaking and writing answers own at most one
/// live submission row; `score` is filled in when that submission resolves.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attempt_answers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    pub question_type: QuestionType,
    pub score: Option<f64>,
    pub max_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attempt::Entity",
        from = "Column::AttemptId",
        to = "super::attempt::Column::Id"
    )]
    Attempt,
    #[sea_orm(has_many = "super::speaking_submission::Entity")]
    SpeakingSubmissions,
    #[sea_orm(has_many = "super::writing_submission::Entity")]
    WritingSubmissions,
}

impl Related<super::attempt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attempt.def()
    }
}

impl Related<super::speaking_submission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SpeakingSubmissions.def()
    }
}

impl Related<super::writing_submission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WritingSubmissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
