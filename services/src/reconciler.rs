//! Callback reconciliation: turns a verified, deduplicated grading callback
//! into domain state changes.
//!
//! Order matters. The signature verdict is recorded on the ledger row either
//! way; the conditional ledger insert is the only gate two concurrent
//! deliveries of the same event can race on; per-submission writes are
//! serialized by the stores' version guard. A crash after the ledger insert
//! but before `mark_applied` leaves the job in `received`, which the recovery
//! pass picks up and re-drives from the stored payload.

use std::sync::Arc;

use chrono::Utc;
use db::models::grading_job::{self, GradingJobStatus, SubmissionKind};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::attempt::AttemptService;
use crate::collaborators::{Notifier, UploadStore};
use crate::error::ServiceError;
use crate::grading_job::{GradingJobService, RecordJob};
use crate::payload::{CallbackPayload, CallbackStatus};
use crate::speaking_submission::{SpeakingScores, SpeakingSubmissionService};
use crate::submission::ApplyOutcome;
use crate::webhook_signature::{verify_signature, within_allowed_skew};
use crate::writing_submission::{WritingScores, WritingSubmissionService};

/// Everything the reconciler needs beyond the database: the shared webhook
/// secret, policy knobs, and collaborator handles.
pub struct ReconcilerContext {
    pub webhook_secret: String,
    pub max_skew_seconds: i64,
    pub accept_partial_results: bool,
    pub notifier: Arc<dyn Notifier>,
    pub uploads: Arc<dyn UploadStore>,
}

/// Outcome class of one delivery, mirrored into the HTTP status by the route
/// layer. The acknowledgement body stays authoritative for programmatic
/// callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckClass {
    Accepted,
    AlreadyProcessed,
    RejectedSignature,
    UnknownSubject,
    Conflict,
    InvalidPayload,
}

/// Acknowledgement returned to the grading service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Acknowledgement {
    pub accepted: bool,
    pub reason: String,
    pub class: AckClass,
}

impl Acknowledgement {
    fn accepted(class: AckClass, reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
            class,
        }
    }

    fn rejected(class: AckClass, reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
            class,
        }
    }
}

/// One inbound delivery, exactly as received: the raw bytes are what the
/// signature covers.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub kind: SubmissionKind,
    pub raw_body: Vec<u8>,
    pub timestamp: String,
    pub signature_header: String,
}

pub struct CallbackReconciler;

impl CallbackReconciler {
    /// Verifies, records, deduplicates and applies one callback delivery.
    pub async fn handle_callback(
        db: &DatabaseConnection,
        ctx: &ReconcilerContext,
        request: CallbackRequest,
    ) -> Result<Acknowledgement, ServiceError> {
        let payload = match CallbackPayload::parse(&request.raw_body) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(%err, "discarding unparseable callback body");
                return Ok(Acknowledgement::rejected(
                    AckClass::InvalidPayload,
                    "unparseable payload",
                ));
            }
        };

        let signature_valid = verify_signature(
            &ctx.webhook_secret,
            &request.raw_body,
            &request.timestamp,
            &request.signature_header,
        ) && within_allowed_skew(
            &request.timestamp,
            Utc::now().timestamp(),
            ctx.max_skew_seconds,
        );

        // Recorded regardless of verdict, for audit.
        let recorded = GradingJobService::record(
            db,
            RecordJob {
                event_id: payload.event_id.clone(),
                provider: payload.provider.clone(),
                model: payload.model.clone(),
                attempt_id: payload.attempt_id,
                quiz_id: payload.quiz_id,
                user_id: payload.user_id,
                submission_kind: request.kind,
                signature_valid,
                raw_payload: String::from_utf8_lossy(&request.raw_body).into_owned(),
            },
        )
        .await?;

        if !signature_valid {
            tracing::warn!(event_id = %payload.event_id, "rejected callback with invalid signature");
            return Ok(Acknowledgement::rejected(
                AckClass::RejectedSignature,
                "invalid signature",
            ));
        }

        if !recorded.is_new {
            tracing::debug!(event_id = %payload.event_id, "duplicate delivery short-circuited");
            return Ok(Acknowledgement::accepted(
                AckClass::AlreadyProcessed,
                "already processed",
            ));
        }

        Self::apply(db, ctx, &recorded.job, &payload).await
    }

    /// Re-drives jobs that won the ledger gate but were never applied, e.g.
    /// because the process restarted mid-reconciliation. Returns how many
    /// jobs were examined.
    pub async fn recover_stuck_jobs(
        db: &DatabaseConnection,
        ctx: &ReconcilerContext,
        older_than: chrono::Duration,
    ) -> Result<usize, ServiceError> {
        let jobs = GradingJobService::stuck_received(db, Utc::now() - older_than).await?;
        let count = jobs.len();
        for job in jobs {
            match CallbackPayload::parse(job.raw_payload.as_bytes()) {
                Ok(payload) => {
                    match Self::apply(db, ctx, &job, &payload).await {
                        Ok(ack) => {
                            tracing::info!(
                                event_id = %job.event_id,
                                class = ?ack.class,
                                "recovered stuck grading job"
                            );
                        }
                        Err(err) => {
                            tracing::error!(event_id = %job.event_id, %err, "recovery failed");
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(event_id = %job.event_id, %err, "stored payload unparseable");
                    GradingJobService::mark_rejected(db, job.id, "unparseable stored payload")
                        .await?;
                }
            }
        }
        Ok(count)
    }

    /// Steps 3-6: resolve the subject, branch on the reported status, mark
    /// the job applied and recompute the owning attempt. The delivery has
    /// already passed the signature check and won the ledger gate.
    async fn apply(
        db: &DatabaseConnection,
        ctx: &ReconcilerContext,
        job: &grading_job::Model,
        payload: &CallbackPayload,
    ) -> Result<Acknowledgement, ServiceError> {
        debug_assert_eq!(job.status, GradingJobStatus::Received);
        match job.submission_kind {
            SubmissionKind::Speaking => Self::apply_speaking(db, ctx, job, payload).await,
            SubmissionKind::Writing => Self::apply_writing(db, ctx, job, payload).await,
        }
    }

    async fn apply_speaking(
        db: &DatabaseConnection,
        ctx: &ReconcilerContext,
        job: &grading_job::Model,
        payload: &CallbackPayload,
    ) -> Result<Acknowledgement, ServiceError> {
        let Some(mut submission) = SpeakingSubmissionService::find_by_id(db, payload.job_id).await?
        else {
            return Self::reject_unknown_subject(db, job, payload).await;
        };

        let scores = SpeakingScores::from_payload(payload);
        let feedback = payload.feedback_text();

        match payload.status {
            CallbackStatus::Completed => {
                // Per-submission serialization: retry the CAS once with a
                // fresh row before concluding someone else resolved it.
                for _ in 0..2 {
                    match SpeakingSubmissionService::apply_result(
                        db,
                        &submission,
                        scores,
                        feedback.clone(),
                    )
                    .await?
                    {
                        ApplyOutcome::Applied => {
                            return Self::finish_graded(db, ctx, job, submission.id).await;
                        }
                        ApplyOutcome::AlreadyResolved | ApplyOutcome::VersionConflict => {
                            let latest =
                                SpeakingSubmissionService::find_by_id(db, submission.id)
                                    .await?
                                    .ok_or_else(|| {
                                        ServiceError::SubjectNotFound(format!(
                                            "speaking submission {}",
                                            submission.id
                                        ))
                                    })?;
                            if latest.status.is_resolved() {
                                if scores.matches_model(&latest, &feedback) {
                                    return Self::finish_replay(db, job, latest.id).await;
                                }
                                return Self::reject_conflict(db, job).await;
                            }
                            submission = latest;
                        }
                    }
                }
                Self::reject_conflict(db, job).await
            }
            CallbackStatus::Failed => {
                let reason = payload.message.as_deref().unwrap_or("grading failed");
                match SpeakingSubmissionService::mark_failed(db, &submission, reason).await? {
                    ApplyOutcome::Applied => Self::finish_failed(db, ctx, job, submission.id, reason).await,
                    ApplyOutcome::AlreadyResolved | ApplyOutcome::VersionConflict => {
                        let latest = SpeakingSubmissionService::find_by_id(db, submission.id)
                            .await?
                            .ok_or_else(|| {
                                ServiceError::SubjectNotFound(format!(
                                    "speaking submission {}",
                                    submission.id
                                ))
                            })?;
                        if latest.failure_reason.as_deref() == Some(reason) {
                            return Self::finish_replay(db, job, latest.id).await;
                        }
                        Self::reject_conflict(db, job).await
                    }
                }
            }
            CallbackStatus::Partial => {
                if ctx.accept_partial_results && scores.overall.is_some() {
                    match SpeakingSubmissionService::apply_result(
                        db,
                        &submission,
                        scores,
                        feedback.clone(),
                    )
                    .await?
                    {
                        ApplyOutcome::Applied => Self::finish_graded(db, ctx, job, submission.id).await,
                        _ => Self::reject_conflict(db, job).await,
                    }
                } else {
                    match SpeakingSubmissionService::apply_partial(
                        db,
                        &submission,
                        scores,
                        "partial result",
                    )
                    .await?
                    {
                        ApplyOutcome::Applied => {
                            Self::finish_failed(db, ctx, job, submission.id, "partial result").await
                        }
                        _ => Self::reject_conflict(db, job).await,
                    }
                }
            }
        }
    }

    async fn apply_writing(
        db: &DatabaseConnection,
        ctx: &ReconcilerContext,
        job: &grading_job::Model,
        payload: &CallbackPayload,
    ) -> Result<Acknowledgement, ServiceError> {
        let Some(mut submission) = WritingSubmissionService::find_by_id(db, payload.job_id).await?
        else {
            return Self::reject_unknown_subject(db, job, payload).await;
        };

        let scores = WritingScores::from_payload(payload);
        let feedback = payload.feedback_text();

        match payload.status {
            CallbackStatus::Completed => {
                for _ in 0..2 {
                    match WritingSubmissionService::apply_result(
                        db,
                        &submission,
                        scores,
                        feedback.clone(),
                    )
                    .await?
                    {
                        ApplyOutcome::Applied => {
                            return Self::finish_graded(db, ctx, job, submission.id).await;
                        }
                        ApplyOutcome::AlreadyResolved | ApplyOutcome::VersionConflict => {
                            let latest =
                                WritingSubmissionService::find_by_id(db, submission.id)
                                    .await?
                                    .ok_or_else(|| {
                                        ServiceError::SubjectNotFound(format!(
                                            "writing submission {}",
                                            submission.id
                                        ))
                                    })?;
                            if latest.status.is_resolved() {
                                if scores.matches_model(&latest, &feedback) {
                                    return Self::finish_replay(db, job, latest.id).await;
                                }
                                return Self::reject_conflict(db, job).await;
                            }
                            submission = latest;
                        }
                    }
                }
                Self::reject_conflict(db, job).await
            }
            CallbackStatus::Failed => {
                let reason = payload.message.as_deref().unwrap_or("grading failed");
                match WritingSubmissionService::mark_failed(db, &submission, reason).await? {
                    ApplyOutcome::Applied => Self::finish_failed(db, ctx, job, submission.id, reason).await,
                    ApplyOutcome::AlreadyResolved | ApplyOutcome::VersionConflict => {
                        let latest = WritingSubmissionService::find_by_id(db, submission.id)
                            .await?
                            .ok_or_else(|| {
                                ServiceError::SubjectNotFound(format!(
                                    "writing submission {}",
                                    submission.id
                                ))
                            })?;
                        if latest.failure_reason.as_deref() == Some(reason) {
                            return Self::finish_replay(db, job, latest.id).await;
                        }
                        Self::reject_conflict(db, job).await
                    }
                }
            }
            CallbackStatus::Partial => {
                if ctx.accept_partial_results && scores.overall.is_some() {
                    match WritingSubmissionService::apply_result(
                        db,
                        &submission,
                        scores,
                        feedback.clone(),
                    )
                    .await?
                    {
                        ApplyOutcome::Applied => Self::finish_graded(db, ctx, job, submission.id).await,
                        _ => Self::reject_conflict(db, job).await,
                    }
                } else {
                    match WritingSubmissionService::apply_partial(
                        db,
                        &submission,
                        scores,
                        "partial result",
                    )
                    .await?
                    {
                        ApplyOutcome::Applied => {
                            Self::finish_failed(db, ctx, job, submission.id, "partial result").await
                        }
                        _ => Self::reject_conflict(db, job).await,
                    }
                }
            }
        }
    }

    async fn reject_unknown_subject(
        db: &DatabaseConnection,
        job: &grading_job::Model,
        payload: &CallbackPayload,
    ) -> Result<Acknowledgement, ServiceError> {
        // Points at a data-consistency bug between the two services, so it
        // is surfaced loudly rather than silently dropped.
        tracing::error!(
            event_id = %job.event_id,
            submission_id = payload.job_id,
            kind = %job.submission_kind,
            "callback references an unknown submission"
        );
        GradingJobService::mark_rejected(db, job.id, "unknown subject").await?;
        Ok(Acknowledgement::rejected(
            AckClass::UnknownSubject,
            "unknown subject",
        ))
    }

    async fn reject_conflict(
        db: &DatabaseConnection,
        job: &grading_job::Model,
    ) -> Result<Acknowledgement, ServiceError> {
        tracing::warn!(
            event_id = %job.event_id,
            "callback conflicts with an already-resolved submission"
        );
        GradingJobService::mark_rejected(db, job.id, "conflicting result").await?;
        Ok(Acknowledgement::rejected(
            AckClass::Conflict,
            "conflicting result",
        ))
    }

    /// A new event whose values the submission already carries: no domain
    /// write needed, but the job itself did complete.
    async fn finish_replay(
        db: &DatabaseConnection,
        job: &grading_job::Model,
        submission_id: i64,
    ) -> Result<Acknowledgement, ServiceError> {
        GradingJobService::mark_applied(db, job.id, submission_id).await?;
        Ok(Acknowledgement::accepted(
            AckClass::AlreadyProcessed,
            "already resolved",
        ))
    }

    async fn finish_graded(
        db: &DatabaseConnection,
        ctx: &ReconcilerContext,
        job: &grading_job::Model,
        submission_id: i64,
    ) -> Result<Acknowledgement, ServiceError> {
        GradingJobService::mark_applied(db, job.id, submission_id).await?;
        AttemptService::recompute(db, job.attempt_id).await?;
        ctx.notifier
            .notify(
                job.user_id,
                &format!("Your {} answer has been graded", job.submission_kind),
                &format!("A result for quiz {} is now available.", job.quiz_id),
            )
            .await;
        Ok(Acknowledgement::accepted(AckClass::Accepted, "applied"))
    }

    async fn finish_failed(
        db: &DatabaseConnection,
        ctx: &ReconcilerContext,
        job: &grading_job::Model,
        submission_id: i64,
        reason: &str,
    ) -> Result<Acknowledgement, ServiceError> {
        GradingJobService::mark_applied(db, job.id, submission_id).await?;
        AttemptService::recompute(db, job.attempt_id).await?;
        ctx.notifier
            .notify(
                job.user_id,
                &format!("Grading of your {} answer failed", job.submission_kind),
                &format!("Quiz {}: {}. You can request a retry.", job.quiz_id, reason),
            )
            .await;
        Ok(Acknowledgement::accepted(AckClass::Accepted, "recorded failure"))
    }
}
