//! Gate Error Types
//!
//! Every outcome a caller must be able to tell apart is a variant here.
//! Expected refusals (quota, write ceiling) carry the numbers a UI needs to
//! render them; collaborator failures carry only a generic reason.

use crate::quota::DailyLimit;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, GateError>;

/// Error types for generation and publishing operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// Malformed or empty request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Free-tier daily allowance used up
    #[error("Daily generation quota exceeded ({used}/{limit})")]
    QuotaExceeded { used: u32, limit: DailyLimit },

    /// System-wide monthly metered-write ceiling reached
    #[error("Monthly write ceiling reached ({remaining} remaining)")]
    WriteCeilingReached { remaining: u32 },

    /// Content generator errored, timed out, or produced nothing usable
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// External publish call errored or timed out; the attempt is in the ledger
    #[error("Publish failed for entry {entry_id}: {reason}")]
    PublishFailed { entry_id: u64, reason: String },

    /// Same text already published through the metered channel recently
    #[error("Duplicate post: identical text published within the last {window_hours}h")]
    DuplicatePost { window_hours: u64 },

    /// Ledger entry does not exist (or is not visible to the caller)
    #[error("Ledger entry not found: {0}")]
    NotFound(u64),

    /// Ledger entry already maps to a different external post
    #[error("Ledger entry {entry_id} already confirmed as {existing}")]
    AlreadyConfirmed { entry_id: u64, existing: String },

    /// Backing storage unavailable or corrupt
    #[error("Storage error: {0}")]
    Storage(String),
}

impl GateError {
    /// Whether the caller may safely retry the same request
    ///
    /// Only collaborator failures qualify: nothing was charged for them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::GenerationFailed(_) | GateError::PublishFailed { .. }
        )
    }

    /// HTTP status an outer web layer would surface for this error
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::InvalidInput(_) => 400,
            GateError::QuotaExceeded { .. } => 402,
            GateError::WriteCeilingReached { .. } => 429,
            GateError::GenerationFailed(_) | GateError::PublishFailed { .. } => 502,
            GateError::DuplicatePost { .. } | GateError::AlreadyConfirmed { .. } => 409,
            GateError::NotFound(_) => 404,
            GateError::Storage(_) => 500,
        }
    }
}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        GateError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::Storage(err.to_string())
    }
}
