use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Saving,
    Saved,
    Error,
}

impl SyncStatus {
    pub fn is_error(self) -> bool {
        self == SyncStatus::Error
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub status: SyncStatus,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct SyncStatusTracker {
    status: SyncStatus,
    last_error: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    now_provider: NowProvider,
}

impl std::fmt::Debug for SyncStatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStatusTracker")
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Default for SyncStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatusTracker {
    pub fn new() -> Self {
        Self {
            status: SyncStatus::Idle,
            last_error: None,
            updated_at: None,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            status: self.status,
            last_error: self.last_error.clone(),
            updated_at: self.updated_at,
        }
    }

    pub fn begin(&mut self) {
        self.transition(SyncStatus::Saving);
        tracing::debug!(status = "saving", "sync started");
    }

    pub fn succeed(&mut self) {
        self.last_error = None;
        self.transition(SyncStatus::Saved);
        tracing::debug!(status = "saved", "sync finished");
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(status = "error", error = %message, "sync failed");
        self.last_error = Some(message);
        self.transition(SyncStatus::Error);
    }

    fn transition(&mut self, status: SyncStatus) {
        self.status = status;
        self.updated_at = Some((self.now_provider)());
    }
}
