pub mod m202607140001_create_attempts;
pub mod m202607140002_create_attempt_answers;
pub mod m202607140003_create_speaking_submissions;
pub mod m202607140004_create_writing_submissions;
pub mod m202607140005_create_grading_jobs;
