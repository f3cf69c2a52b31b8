mod helpers;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use db::models::submission_status::SubmissionStatus;
use helpers::{
    completed_speaking_body, make_test_app, make_test_app_with, seed_speaking_attempt,
    seed_writing_attempt, signed_callback,
};
use serde_json::{Value, json};
use services::attempt::AttemptService;
use services::speaking_submission::SpeakingSubmissionService;
use services::writing_submission::WritingSubmissionService;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn completed_callback_is_accepted_and_grades_the_attempt() {
    let (app, db) = make_test_app().await;
    let seeded = seed_speaking_attempt(&db).await;

    let request = signed_callback(
        "/api/webhooks/grading/speaking",
        &completed_speaking_body("evt-1", &seeded),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["accepted"], true);
    assert_eq!(json["data"]["class"], "accepted");

    let submission = SpeakingSubmissionService::find_by_id(&db, seeded.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(submission.status, SubmissionStatus::Graded);
    assert_eq!(submission.overall_score, Some(8.5));

    let attempt = AttemptService::find_by_id(&db, seeded.attempt_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.total_score, Some(8.5));
}

#[tokio::test]
async fn duplicate_delivery_returns_ok_without_a_second_mutation() {
    let (app, db) = make_test_app().await;
    let seeded = seed_speaking_attempt(&db).await;
    let body = completed_speaking_body("evt-dup", &seeded);

    let first = app
        .clone()
        .oneshot(signed_callback("/api/webhooks/grading/speaking", &body))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(signed_callback("/api/webhooks/grading/speaking", &body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let json = body_json(second).await;
    assert_eq!(json["data"]["class"], "already-processed");
}

#[tokio::test]
async fn invalid_signature_returns_401_and_leaves_submission_pending() {
    let (app, db) = make_test_app().await;
    let seeded = seed_speaking_attempt(&db).await;

    let raw = serde_json::to_vec(&completed_speaking_body("evt-forged", &seeded)).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/grading/speaking")
        .header("content-type", "application/json")
        .header("x-grading-timestamp", chrono::Utc::now().timestamp().to_string())
        .header("x-grading-signature", "sha256=deadbeef")
        .body(Body::from(raw))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["data"]["class"], "rejected-signature");

    let submission = SpeakingSubmissionService::find_by_id(&db, seeded.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(submission.status, SubmissionStatus::Pending);
}

#[tokio::test]
async fn missing_signature_headers_return_401() {
    let (app, db) = make_test_app().await;
    let seeded = seed_speaking_attempt(&db).await;

    let raw = serde_json::to_vec(&completed_speaking_body("evt-bare", &seeded)).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/grading/speaking")
        .header("content-type", "application/json")
        .body(Body::from(raw))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unparseable_body_returns_422() {
    let (app, _db) = make_test_app().await;

    let raw = b"not json".to_vec();
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature =
        services::webhook_signature::sign_payload(helpers::TEST_SECRET, &raw, &timestamp);
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/grading/speaking")
        .header("x-grading-timestamp", timestamp)
        .header("x-grading-signature", signature)
        .body(Body::from(raw))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["data"]["class"], "invalid-payload");
}

#[tokio::test]
async fn unknown_submission_returns_404() {
    let (app, db) = make_test_app().await;
    let seeded = seed_speaking_attempt(&db).await;

    let mut body = completed_speaking_body("evt-orphan", &seeded);
    body["jobId"] = json!(987654);
    let response = app
        .oneshot(signed_callback("/api/webhooks/grading/speaking", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["data"]["class"], "unknown-subject");
}

#[tokio::test]
async fn conflicting_result_under_new_event_returns_409() {
    let (app, db) = make_test_app().await;
    let seeded = seed_speaking_attempt(&db).await;

    let first = completed_speaking_body("evt-one", &seeded);
    app.clone()
        .oneshot(signed_callback("/api/webhooks/grading/speaking", &first))
        .await
        .unwrap();

    let mut conflicting = completed_speaking_body("evt-two", &seeded);
    conflicting["overallScore"] = json!(3.0);
    let response = app
        .oneshot(signed_callback("/api/webhooks/grading/speaking", &conflicting))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let submission = SpeakingSubmissionService::find_by_id(&db, seeded.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(submission.overall_score, Some(8.5));
}

#[tokio::test]
async fn failed_writing_callback_marks_submission_failed() {
    let (app, db) = make_test_app().await;
    let seeded = seed_writing_attempt(&db).await;

    let body = json!({
        "eventId": "evt-wfail",
        "provider": "essaygrader",
        "jobId": seeded.submission_id,
        "attemptId": seeded.attempt_id,
        "quizId": 12,
        "userId": 42,
        "status": "FAILED",
        "model": "eg-1",
        "message": "essay too short"
    });
    let response = app
        .oneshot(signed_callback("/api/webhooks/grading/writing", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let submission = WritingSubmissionService::find_by_id(&db, seeded.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(submission.status, SubmissionStatus::Failed);
    assert_eq!(submission.failure_reason.as_deref(), Some("essay too short"));
}

#[tokio::test]
async fn partial_with_policy_enabled_grades_the_submission() {
    let (app, db) = make_test_app_with(true, true).await;
    let seeded = seed_writing_attempt(&db).await;

    let body = json!({
        "eventId": "evt-wpartial",
        "provider": "essaygrader",
        "jobId": seeded.submission_id,
        "attemptId": seeded.attempt_id,
        "quizId": 12,
        "userId": 42,
        "status": "PARTIAL",
        "overallScore": 6.0,
        "model": "eg-1"
    });
    let response = app
        .oneshot(signed_callback("/api/webhooks/grading/writing", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let submission = WritingSubmissionService::find_by_id(&db, seeded.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(submission.status, SubmissionStatus::Graded);
    assert_eq!(submission.overall_score, Some(6.0));
}
