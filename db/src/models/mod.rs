pub mod attempt;
pub mod attempt_answer;
pub mod grading_job;
pub mod speaking_submission;
pub mod submission_status;
pub mod writing_submission;
