pub mod attempt;
pub mod collaborators;
pub mod error;
pub mod grading_job;
pub mod payload;
pub mod reconciler;
pub mod speaking_submission;
pub mod submission;
pub mod webhook_signature;
pub mod writing_submission;

pub use error::ServiceError;
