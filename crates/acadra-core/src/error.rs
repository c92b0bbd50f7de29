//! Engine-level error taxonomy.
//!
//! Every fallible operation in the engine returns `EngineError`. Validation
//! and not-found errors are user-correctable; eligibility and conflict errors
//! carry enough detail for the caller to offer an informed override path.

/// Engine-level error type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or missing input; the caller can correct and retry.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown rule, record, student, or transfer.
    #[error("not found: {0}")]
    NotFound(String),

    /// Business-rule rejection. Carries every failed check, not just the first.
    #[error("not eligible: {}", reasons.join("; "))]
    NotEligible { reasons: Vec<String> },

    /// Duplicate active configuration, already-issued transfer, already-locked
    /// record, or a uniqueness violation in the store.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A configured value failed its type cast or a declared constraint.
    #[error("rule value error: {0}")]
    RuleValue(String),

    /// The record is locked and the requested mutation is not the rollback
    /// path that owns the lock.
    #[error("locked record: {0}")]
    LockedRecord(String),

    /// Illegal state transition (e.g. cancelling an issued transfer).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unexpected storage or infrastructure failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Single-reason eligibility rejection.
    pub fn not_eligible(reason: impl Into<String>) -> Self {
        EngineError::NotEligible {
            reasons: vec![reason.into()],
        }
    }

    /// Stable machine-readable code for the HTTP surface and logs.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "invalid_argument",
            EngineError::NotFound(_) => "not_found",
            EngineError::NotEligible { .. } => "not_eligible",
            EngineError::Conflict(_) => "conflict",
            EngineError::RuleValue(_) => "rule_value",
            EngineError::LockedRecord(_) => "locked_record",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::Internal(_) => "internal",
        }
    }
}
