// src/error.rs
// Domain error taxonomy for the ingestion/moderation/push pipeline.

use thiserror::Error;

use crate::moderation::ItemStatus;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed input from the caller (bad id, missing endpoint). Maps to 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// Dedup hit at ingestion: a non-rejected item already carries this fingerprint.
    #[error("duplicate content: fingerprint {fingerprint} already held by item {existing_id}")]
    DuplicateContent { fingerprint: String, existing_id: u64 },

    /// No item with this id exists.
    #[error("item {0} not found")]
    NotFound(u64),

    /// A second decision on an already-decided item. Surfaced, never retried.
    #[error("invalid transition for item {id}: status is {current:?}, expected Pending")]
    InvalidTransition { id: u64, current: ItemStatus },

    /// Per-subscription push send failure. Isolated; only the failure-count
    /// mechanism reacts to it.
    #[error("delivery failure for {endpoint}: {reason}")]
    Delivery { endpoint: String, reason: String },

    /// A backing store or downstream dependency is unreachable.
    #[error("dependency unavailable: {0}")]
    Dependency(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// True for errors the caller can fix by correcting input (4xx).
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_)
                | PipelineError::DuplicateContent { .. }
                | PipelineError::NotFound(_)
                | PipelineError::InvalidTransition { .. }
        )
    }
}
