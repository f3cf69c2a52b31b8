use sea_orm::entity::prelude::*;

/// Lifecycle of a speaking or writing submission sent out for AI grading.
///
/// The state machine is identical for both submission kinds:
/// `Pending -> Processing` on dispatch, `Processing -> Graded` on a successful
/// callback, `Processing -> Failed` on an error callback or timeout,
/// `Failed -> Processing` on an explicit retry, and `Graded -> Processing`
/// only through an admin regrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize)]
#[sea_orm(
    rs_type = "String",
    db_type = "Enum",
    enum_name = "submission_status_enum"
)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Created but not yet dispatched to the grading service.
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Dispatched; awaiting the asynchronous grading callback.
    #[sea_orm(string_value = "processing")]
    Processing,
    /// Scores and feedback applied. Terminal except for an admin regrade.
    #[sea_orm(string_value = "graded")]
    Graded,
    /// Grading failed or timed out. Eligible for retry.
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl Default for SubmissionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl SubmissionStatus {
    /// True once the submission no longer awaits a callback.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Graded | Self::Failed)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status_str = match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Processing => "processing",
            SubmissionStatus::Graded => "graded",
            SubmissionStatus::Failed => "failed",
        };
        write!(f, "{}", status_str)
    }
}
