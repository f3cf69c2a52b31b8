//! Wire types for the grading service's callback body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grading outcome reported by the external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackStatus {
    Completed,
    Failed,
    Partial,
}

/// Per-question result entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CallbackItem {
    pub question_id: i64,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub verdict: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The JSON body of one callback delivery.
///
/// `event_id` is the sender-chosen idempotency key; `job_id` is the
/// submission row the result belongs to (we hand it to the grading service at
/// dispatch time and it echoes it back).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub event_id: String,
    pub provider: String,
    pub job_id: i64,
    pub attempt_id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub status: CallbackStatus,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub items: Vec<CallbackItem>,
    pub model: String,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl CallbackPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Human-readable feedback assembled from the top-level message and any
    /// per-question feedback entries.
    pub fn feedback_text(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(message) = &self.message {
            if !message.is_empty() {
                parts.push(message.clone());
            }
        }
        for item in &self.items {
            if let Some(feedback) = &item.feedback {
                if !feedback.is_empty() {
                    parts.push(feedback.clone());
                }
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}
