//! Typed errors for the reconciliation engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.
//!
//! The taxonomy splits into two policy classes:
//! - invariant violations (`MalformedValue`, `AliasConflict`, ...) are
//!   per-record recoverable: the orchestrator skips the offending fact and
//!   reports it, never aborting the document;
//! - infrastructure failures (`StoreUnavailable`) abort the whole document,
//!   which is then retried atomically.

use thiserror::Error;

/// Errors that can occur during reconciliation and storage operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Hybrid value construction or decoding violated the single-slot
    /// invariant (zero or more than one payload populated, or min > max).
    #[error("malformed value: {reason}")]
    MalformedValue { reason: String },

    /// Alias string is already bound to a different chemical.
    #[error("alias '{alias}' already bound to chemical {existing}")]
    AliasConflict { alias: String, existing: uuid::Uuid },

    /// Exact alias binding and structural-key resolution disagree about
    /// which chemical a mention names. Surfaced for manual review, never
    /// silently resolved.
    #[error("alias '{alias}' is bound to {bound_to} but resolution selected {resolved}")]
    AmbiguousAlias {
        alias: String,
        bound_to: uuid::Uuid,
        /// What resolution selected instead: a structural key or chemical id.
        resolved: String,
    },

    /// Formulation label already used within its experiment, or experiment
    /// local id already used within its document.
    #[error("duplicate label '{label}' in {scope}")]
    DuplicateLabel { label: String, scope: String },

    /// Component role and chemical-identity presence are jointly invalid:
    /// Carrier components never bind a chemical, Cpa/Adjuvant always do.
    #[error("role {role} with chemical binding {bound}: role/chemical constraint violated")]
    RoleConstraintViolation { role: String, bound: bool },

    /// Dependent property target named both a formulation and a component,
    /// or neither.
    #[error("dependent property must target exactly one of formulation or component")]
    AmbiguousTarget,

    /// A fact references an experiment/formulation/chemical that does not
    /// exist in the store or in this batch.
    #[error("unresolved reference: {reference}")]
    ReferentialGap { reference: String },

    /// Unit is not legal for the property type.
    #[error("unit '{unit}' invalid for property type {property_type}")]
    InvalidUnit { unit: String, property_type: String },

    /// Structural key does not match the required 27-character pattern.
    #[error("invalid structural key: {key}")]
    InvalidStructuralKey { key: String },

    /// Chemical not found in the store.
    #[error("chemical not found: {id}")]
    ChemicalNotFound { id: uuid::Uuid },

    /// Embedding generation failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Transient storage failure. Retryable for the whole document.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Reconciliation was cancelled before commit.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// JSON parsing error in a fact payload.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Whether the orchestrator should retry the whole document.
    ///
    /// Only infrastructure failures are retryable; invariant violations are
    /// deterministic and retrying would reproduce them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::StoreUnavailable(_))
    }

    /// Whether this error is a per-record invariant violation that should
    /// skip the record and continue the document.
    pub fn is_record_violation(&self) -> bool {
        matches!(
            self,
            ReconcileError::MalformedValue { .. }
                | ReconcileError::AliasConflict { .. }
                | ReconcileError::AmbiguousAlias { .. }
                | ReconcileError::DuplicateLabel { .. }
                | ReconcileError::RoleConstraintViolation { .. }
                | ReconcileError::AmbiguousTarget
                | ReconcileError::ReferentialGap { .. }
                | ReconcileError::InvalidUnit { .. }
                | ReconcileError::InvalidStructuralKey { .. }
        )
    }
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
