//! Reconciliation report: what a document's reconciliation created and what
//! it skipped, with a reason per skip.
//!
//! Nothing is silently dropped - every rejected record lands here with
//! enough identity to drive a remediation pass.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReconcileError;
use crate::types::chemical::StructuralKey;

/// Why a fact was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MalformedValue,
    InvalidUnit,
    AliasConflict,
    AmbiguousAlias,
    InvalidStructuralKey,
    DuplicateLabel,
    RoleConstraintViolation,
    AmbiguousTarget,
    ReferentialGap,
}

impl SkipReason {
    /// Map a per-record invariant violation to its skip reason.
    ///
    /// Infrastructure errors have no skip reason; they abort the document.
    pub fn from_error(err: &ReconcileError) -> Option<Self> {
        match err {
            ReconcileError::MalformedValue { .. } => Some(SkipReason::MalformedValue),
            ReconcileError::InvalidUnit { .. } => Some(SkipReason::InvalidUnit),
            ReconcileError::AliasConflict { .. } => Some(SkipReason::AliasConflict),
            ReconcileError::AmbiguousAlias { .. } => Some(SkipReason::AmbiguousAlias),
            ReconcileError::InvalidStructuralKey { .. } => Some(SkipReason::InvalidStructuralKey),
            ReconcileError::DuplicateLabel { .. } => Some(SkipReason::DuplicateLabel),
            ReconcileError::RoleConstraintViolation { .. } => {
                Some(SkipReason::RoleConstraintViolation)
            }
            ReconcileError::AmbiguousTarget => Some(SkipReason::AmbiguousTarget),
            ReconcileError::ReferentialGap { .. } => Some(SkipReason::ReferentialGap),
            _ => None,
        }
    }
}

/// One skipped record: which fact, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFact {
    /// Human-readable identity of the record (e.g. "agent fact #3: DMSO
    /// VISCOSITY").
    pub record: String,
    pub reason: SkipReason,
    /// The full error message for remediation.
    pub detail: String,
}

/// A chemical identity created while reconciling this document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedIdentity {
    pub id: Uuid,
    pub preferred_name: String,
    pub structural_key: Option<StructuralKey>,
}

/// An alias created while reconciling this document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedAlias {
    pub chemical_id: Uuid,
    pub alias: String,
    /// True when the bind came from nearest-neighbor matching rather than
    /// an exact key or alias hit.
    pub heuristic: bool,
}

/// The outcome of reconciling one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub document_id: String,
    pub created_identities: Vec<CreatedIdentity>,
    pub created_aliases: Vec<CreatedAlias>,
    pub property_values_written: usize,
    pub experiments_created: usize,
    pub formulations_created: usize,
    pub components_created: usize,
    pub dependent_values_written: usize,
    pub skipped: Vec<SkippedFact>,
}

impl ReconciliationReport {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ..Default::default()
        }
    }

    /// Record a skipped fact.
    pub fn skip(&mut self, record: impl Into<String>, err: &ReconcileError) {
        let reason = SkipReason::from_error(err).unwrap_or(SkipReason::MalformedValue);
        self.skipped.push(SkippedFact {
            record: record.into(),
            reason,
            detail: err.to_string(),
        });
    }

    pub fn has_skips(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// Total records written across both subgraphs.
    pub fn records_written(&self) -> usize {
        self.property_values_written
            + self.experiments_created
            + self.formulations_created
            + self.components_created
            + self.dependent_values_written
    }
}
