use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RuntimeLifecycleState;

/// Broad error category used for reporting and retry decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Invalid input, unknown room, or other caller-side issue.
    Config,
    /// Transient network or transport failure reported by a job.
    Network,
    /// Rate-limited by the homeserver.
    RateLimited,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload reported by jobs and the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncError {
    /// High-level error category.
    pub category: SyncErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl SyncError {
    pub fn new(
        category: SyncErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build a job failure from an HTTP status reported by the job layer.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(classify_http_status(status), "http_error", message)
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: RuntimeLifecycleState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while runtime is in state {current:?}"),
        )
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            SyncErrorCategory::Network | SyncErrorCategory::RateLimited
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> SyncErrorCategory {
    match status {
        408 | 429 => SyncErrorCategory::RateLimited,
        400..=499 => SyncErrorCategory::Config,
        500..=599 => SyncErrorCategory::Network,
        _ => SyncErrorCategory::Internal,
    }
}
