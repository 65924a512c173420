//! Error types for dashboard actions
//!
//! Errors are classified by where they come from:
//! - Remote: network failures and errors reported by the hosted backend
//! - NotConfigured: the backend endpoint or key is absent or malformed
//! - Validation: input rejected before any remote call is issued
//! - Local: view bookkeeping (busy record, closed view, missing record)
//!
//! Nothing here is retried automatically. A failed action is terminal and
//! the user re-invokes it.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::RecordId;

/// Error type for every dashboard operation
#[derive(Debug, Error)]
pub enum DashboardError {
    // Remote errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    // Configuration
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    // Validation
    #[error("{0}")]
    Validation(String),

    #[error("Not signed in")]
    Unauthenticated,

    // Local bookkeeping
    #[error("Record {0} not found")]
    NotFound(RecordId),

    #[error("Record {0} still has a change in flight")]
    Busy(RecordId),

    #[error("View was closed before the response arrived")]
    Disposed,

    #[error("IO error: {0}")]
    Io(String),
}

/// Coarse classification used by renderers to pick how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Remote,
    NotConfigured,
    Validation,
    Local,
}

impl DashboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        DashboardError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DashboardError::Network(_)
            | DashboardError::Remote { .. }
            | DashboardError::Decode(_) => ErrorKind::Remote,
            DashboardError::NotConfigured(_) => ErrorKind::NotConfigured,
            DashboardError::Validation(_) | DashboardError::Unauthenticated => {
                ErrorKind::Validation
            }
            DashboardError::NotFound(_)
            | DashboardError::Busy(_)
            | DashboardError::Disposed
            | DashboardError::Io(_) => ErrorKind::Local,
        }
    }

    /// True when the backend rejected the request because the session is gone.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            DashboardError::Unauthenticated | DashboardError::Remote { status: 401, .. }
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            DashboardError::Network(_) => "Check your internet connection and try again.",
            DashboardError::Remote { status: 401, .. } | DashboardError::Unauthenticated => {
                "Sign in again and retry."
            }
            DashboardError::Remote { .. } => "The backend rejected the change. Try again.",
            DashboardError::Decode(_) => "The backend returned unexpected data. Reload the view.",
            DashboardError::NotConfigured(_) => {
                "Set SUPABASE_URL and SUPABASE_ANON_KEY or add them to ~/.hypeloop/config.json"
            }
            DashboardError::Validation(_) => "Fix the highlighted input and try again.",
            DashboardError::NotFound(_) => "Reload the view to pick up the latest records.",
            DashboardError::Busy(_) => "Wait for the previous change to finish.",
            DashboardError::Disposed => "Reopen the view.",
            DashboardError::Io(_) => "Check file permissions and disk space.",
        }
    }
}

impl From<reqwest::Error> for DashboardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DashboardError::Decode(err.to_string())
        } else {
            DashboardError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(err: serde_json::Error) -> Self {
        DashboardError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for DashboardError {
    fn from(err: std::io::Error) -> Self {
        DashboardError::Io(err.to_string())
    }
}

/// Transient message a view keeps after a failed action until the renderer
/// takes it.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub message: String,
    pub kind: ErrorKind,
    pub recovery_suggestion: String,
    pub raised_at: DateTime<Utc>,
}

impl From<&DashboardError> for Notice {
    fn from(err: &DashboardError) -> Self {
        Notice {
            message: err.to_string(),
            kind: err.kind(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
            raised_at: Utc::now(),
        }
    }
}
