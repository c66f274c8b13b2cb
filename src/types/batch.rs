//! The per-document write batch: everything a document's reconciliation
//! wants to persist, staged so the store can apply it atomically.
//!
//! Resolution is read-only; planned identities and aliases ride in the
//! batch and are created inside the store's commit critical section. The
//! store re-validates uniqueness there and remaps planned ids onto rows a
//! concurrent document created first, so two workers introducing the same
//! structural key converge on one identity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::chemical::{Alias, ChemicalIdentity, PropertyType};
use crate::types::graph::{DependentTarget, Experiment, Formulation, FormulationComponent};
use crate::types::chemical::DependentPropertyType;
use crate::types::report::SkipReason;
use crate::types::value::HybridValue;

/// One staged intrinsic property observation.
#[derive(Debug, Clone)]
pub struct PropertyWrite {
    /// Target chemical; may be a planned id from this batch.
    pub chemical_id: Uuid,
    pub property_type: PropertyType,
    pub value: HybridValue,
    pub unit: Option<String>,
    pub quote: String,
    /// Identity of the source record, for skip reporting.
    pub record: String,
}

/// One staged dependent property observation.
#[derive(Debug, Clone)]
pub struct DependentWrite {
    /// Targets an experiment/formulation/component id planned in this batch.
    pub target: DependentTarget,
    pub property_type: DependentPropertyType,
    pub value: HybridValue,
    pub unit: Option<String>,
    pub quote: String,
    pub record: String,
}

/// Everything one document's reconciliation wants to persist.
///
/// All ids referencing batch-planned rows are pre-generated; the commit may
/// remap them onto existing rows and returns the remap tables.
#[derive(Debug, Clone, Default)]
pub struct DocumentBatch {
    pub document_id: String,
    /// Locator attached to every provenance record.
    pub link: Option<String>,

    /// Identities planned by the resolver. Created if still absent at
    /// commit, keyed on structural key where present.
    pub new_chemicals: Vec<ChemicalIdentity>,
    /// Aliases planned by the resolver. Bound if still unbound at commit.
    pub new_aliases: Vec<Alias>,

    pub property_writes: Vec<PropertyWrite>,
    pub experiments: Vec<Experiment>,
    pub formulations: Vec<Formulation>,
    pub components: Vec<FormulationComponent>,
    pub dependent_writes: Vec<DependentWrite>,
}

impl DocumentBatch {
    pub fn new(document_id: impl Into<String>, link: Option<String>) -> Self {
        Self {
            document_id: document_id.into(),
            link,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new_chemicals.is_empty()
            && self.new_aliases.is_empty()
            && self.property_writes.is_empty()
            && self.experiments.is_empty()
            && self.formulations.is_empty()
            && self.components.is_empty()
            && self.dependent_writes.is_empty()
    }
}

/// A write the store dropped during commit, with the error that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedWrite {
    pub record: String,
    pub reason: SkipReason,
    pub detail: String,
}

/// What a commit actually did.
///
/// Because concurrent documents may have created the same identity or alias
/// first, the outcome reports which planned rows were really created and how
/// planned ids map onto the rows that won.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Planned chemical ids that were actually created (not remapped).
    pub created_chemicals: Vec<Uuid>,
    /// Planned alias ids that were actually created (not remapped).
    pub created_aliases: Vec<Uuid>,
    /// Planned chemical id -> surviving chemical id, for remapped rows.
    pub chemical_remap: HashMap<Uuid, Uuid>,
    /// Planned alias id -> surviving alias id, for remapped rows.
    pub alias_remap: HashMap<Uuid, Uuid>,

    pub property_values_written: usize,
    pub experiments_created: usize,
    pub formulations_created: usize,
    pub components_created: usize,
    pub dependent_values_written: usize,

    /// Writes dropped by commit-time re-validation (conflicts discovered
    /// inside the critical section, duplicate labels on replay).
    pub dropped: Vec<DroppedWrite>,
}

impl CommitOutcome {
    /// The surviving chemical id for a planned one.
    pub fn surviving_chemical(&self, planned: Uuid) -> Uuid {
        self.chemical_remap.get(&planned).copied().unwrap_or(planned)
    }
}
