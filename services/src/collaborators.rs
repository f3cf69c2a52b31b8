//! Narrow contracts to the rest of the platform.
//!
//! Notification delivery and blob storage are external concerns; the
//! reconciler only ever sees these traits.

use async_trait::async_trait;

/// Fire-and-forget user notification dispatch.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, title: &str, content: &str);
}

/// Default notifier: records the notification in the log stream. Delivery is
/// owned by the notification service elsewhere in the platform.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: i64, title: &str, content: &str) {
        tracing::info!(user_id, title, content, "notification dispatched");
    }
}

/// Existence probe against the opaque blob store (speaking audio uploads).
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn exists(&self, url: &str) -> bool;
}

/// Probes the blob store over HTTP with a HEAD request.
pub struct HttpUploadStore {
    client: reqwest::Client,
}

impl HttpUploadStore {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpUploadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadStore for HttpUploadStore {
    async fn exists(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                tracing::warn!(url, %err, "upload existence probe failed");
                false
            }
        }
    }
}
