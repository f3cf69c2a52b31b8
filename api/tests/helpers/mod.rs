use std::sync::Arc;

use api::routes::routes;
use axum::{Router, body::Body, http::Request};
use chrono::Utc;
use common::AppState;
use db::test_utils::setup_test_db;
use sea_orm::DatabaseConnection;
use services::attempt::{AttemptService, CreateAttempt, CreateAttemptAnswer};
use services::collaborators::{Notifier, UploadStore};
use services::reconciler::ReconcilerContext;
use services::speaking_submission::{CreateSpeakingSubmission, SpeakingSubmissionService};
use services::webhook_signature::sign_payload;
use services::writing_submission::{CreateWritingSubmission, WritingSubmissionService};

pub const TEST_SECRET: &str = "integration-test-secret";

struct NullNotifier;

#[async_trait::async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _user_id: i64, _title: &str, _content: &str) {}
}

struct FixedUploadStore {
    exists: bool,
}

#[async_trait::async_trait]
impl UploadStore for FixedUploadStore {
    async fn exists(&self, _url: &str) -> bool {
        self.exists
    }
}

/// Fresh in-memory database plus the full router nested under `/api`,
/// configured with a known webhook secret.
pub async fn make_test_app() -> (Router, DatabaseConnection) {
    make_test_app_with(true, false).await
}

pub async fn make_test_app_with(
    uploads_exist: bool,
    accept_partial_results: bool,
) -> (Router, DatabaseConnection) {
    let db = setup_test_db().await;
    let app_state = AppState::new(db.clone());
    let ctx = Arc::new(ReconcilerContext {
        webhook_secret: TEST_SECRET.into(),
        max_skew_seconds: 300,
        accept_partial_results,
        notifier: Arc::new(NullNotifier),
        uploads: Arc::new(FixedUploadStore {
            exists: uploads_exist,
        }),
    });
    let app = Router::new().nest("/api", routes(app_state, ctx));
    (app, db)
}

/// Builds a correctly signed callback request for the given path.
pub fn signed_callback(path: &str, body: &serde_json::Value) -> Request<Body> {
    let raw = serde_json::to_vec(body).unwrap();
    let timestamp = Utc::now().timestamp().to_string();
    let signature = sign_payload(TEST_SECRET, &raw, &timestamp);
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-grading-timestamp", timestamp)
        .header("x-grading-signature", signature)
        .body(Body::from(raw))
        .unwrap()
}

pub struct SeededAttempt {
    pub attempt_id: i64,
    pub answer_id: i64,
    pub submission_id: i64,
}

/// One submitted attempt with a single speaking answer and a pending
/// submission.
pub async fn seed_speaking_attempt(db: &DatabaseConnection) -> SeededAttempt {
    let attempt = AttemptService::create(db, CreateAttempt { quiz_id: 11, user_id: 99 })
        .await
        .unwrap();
    AttemptService::mark_submitted(db, attempt.id).await.unwrap();
    let answer = AttemptService::add_answer(
        db,
        CreateAttemptAnswer {
            attempt_id: attempt.id,
            question_id: 1,
            question_type: db::models::attempt_answer::QuestionType::Speaking,
            max_score: 10.0,
        },
    )
    .await
    .unwrap();
    let submission = SpeakingSubmissionService::create(
        db,
        CreateSpeakingSubmission {
            attempt_answer_id: answer.id,
            audio_url: "blob://recordings/1.ogg".into(),
        },
    )
    .await
    .unwrap();
    SeededAttempt {
        attempt_id: attempt.id,
        answer_id: answer.id,
        submission_id: submission.id,
    }
}

pub async fn seed_writing_attempt(db: &DatabaseConnection) -> SeededAttempt {
    let attempt = AttemptService::create(db, CreateAttempt { quiz_id: 12, user_id: 42 })
        .await
        .unwrap();
    AttemptService::mark_submitted(db, attempt.id).await.unwrap();
    let answer = AttemptService::add_answer(
        db,
        CreateAttemptAnswer {
            attempt_id: attempt.id,
            question_id: 1,
            question_type: db::models::attempt_answer::QuestionType::Writing,
            max_score: 10.0,
        },
    )
    .await
    .unwrap();
    let submission = WritingSubmissionService::create(
        db,
        CreateWritingSubmission {
            attempt_answer_id: answer.id,
            essay_text: "An essay about reliability.".into(),
        },
    )
    .await
    .unwrap();
    SeededAttempt {
        attempt_id: attempt.id,
        answer_id: answer.id,
        submission_id: submission.id,
    }
}

/// A COMPLETED speaking callback body targeting the seeded submission.
pub fn completed_speaking_body(event_id: &str, seeded: &SeededAttempt) -> serde_json::Value {
    serde_json::json!({
        "eventId": event_id,
        "provider": "speechgrader",
        "jobId": seeded.submission_id,
        "attemptId": seeded.attempt_id,
        "quizId": 11,
        "userId": 99,
        "status": "COMPLETED",
        "overallScore": 8.5,
        "metrics": {"pronunciation": 8.0, "fluency": 9.0, "vocabulary": 7.5, "grammar": 8.0},
        "items": [{"questionId": 1, "score": 8.5, "feedback": "Clear delivery"}],
        "model": "sg-2"
    })
}
