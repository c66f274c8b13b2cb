//! Stored records of the two entity subgraphs.
//!
//! The agent subgraph is rooted at a chemical identity: property headers,
//! their value rows, and provenance. The formulation subgraph is rooted at
//! an experiment: formulations, components, and dependent properties. The
//! two subgraphs reference chemical identities by id only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ReconcileError, Result};
use crate::types::chemical::{ChemicalRole, DependentPropertyType, PropertyType};
use crate::types::value::ValueRecord;

/// A (chemical, property-type) header. Unique per pair; all observed values
/// of that property attach here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyHeader {
    pub id: Uuid,
    pub chemical_id: Uuid,
    pub property_type: PropertyType,
}

impl PropertyHeader {
    pub fn new(chemical_id: Uuid, property_type: PropertyType) -> Self {
        Self {
            id: Uuid::new_v4(),
            chemical_id,
            property_type,
        }
    }
}

/// One observed value of a property. Immutable once created; superseding
/// information is a new row, never an edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyValue {
    pub id: Uuid,
    pub property_id: Uuid,
    pub record: ValueRecord,
    pub unit: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PropertyValue {
    pub fn new(property_id: Uuid, record: ValueRecord, unit: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            property_id,
            record,
            unit,
            created_at: Utc::now(),
        }
    }
}

/// Link from a stored value back to its source document and supporting
/// quote. Many references may point at one value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub id: Uuid,
    pub value_id: Uuid,
    pub document_id: String,
    pub quote: Option<String>,
    pub link: Option<String>,
}

impl Provenance {
    pub fn new(
        value_id: Uuid,
        document_id: impl Into<String>,
        quote: Option<String>,
        link: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            value_id,
            document_id: document_id.into(),
            quote,
            link,
        }
    }
}

/// One described experimental setup within a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub document_id: String,
    /// Extraction-local identifier, unique within the document.
    pub local_id: String,
    /// Performed in this paper, as opposed to cited from elsewhere.
    pub performed_in_this_paper: bool,
    pub label: Option<String>,
    pub method: Option<String>,
    /// Opaque biological context blob; the engine stores it uninterpreted.
    pub biological_context: Option<serde_json::Value>,
    pub quote: String,
}

/// A named mixture scoped to one experiment. Label unique per experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formulation {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub label: String,
    pub quote: String,
}

/// One ingredient of a formulation.
///
/// Invariant: Carrier components never bind a chemical identity, Cpa and
/// Adjuvant components always do. Enforced at insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulationComponent {
    pub id: Uuid,
    pub formulation_id: Uuid,
    pub role: ChemicalRole,
    pub chemical_id: Option<Uuid>,
    pub alias_id: Option<Uuid>,
    pub amount: Option<ValueRecord>,
    pub unit: Option<String>,
    pub quote: String,
}

impl FormulationComponent {
    /// Check the role / chemical-presence joint constraint.
    pub fn check_role_constraint(role: ChemicalRole, chemical_id: Option<Uuid>) -> Result<()> {
        if role.requires_chemical() == chemical_id.is_some() {
            Ok(())
        } else {
            Err(ReconcileError::RoleConstraintViolation {
                role: role.to_string(),
                bound: chemical_id.is_some(),
            })
        }
    }
}

/// The attachment point of a dependent property: exactly one of a whole
/// formulation or a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentTarget {
    Formulation(Uuid),
    Component(Uuid),
}

impl DependentTarget {
    /// Build a target from raw optional ids, rejecting both-or-neither.
    pub fn from_ids(formulation_id: Option<Uuid>, component_id: Option<Uuid>) -> Result<Self> {
        match (formulation_id, component_id) {
            (Some(f), None) => Ok(DependentTarget::Formulation(f)),
            (None, Some(c)) => Ok(DependentTarget::Component(c)),
            _ => Err(ReconcileError::AmbiguousTarget),
        }
    }
}

/// Header for a context-specific measurement. Unique per (target, type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentProperty {
    pub id: Uuid,
    pub target: DependentTarget,
    pub property_type: DependentPropertyType,
}

impl DependentProperty {
    pub fn new(target: DependentTarget, property_type: DependentPropertyType) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            property_type,
        }
    }
}

/// One observed value of a dependent property. Same hybrid representation
/// and immutability rules as intrinsic property values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentPropertyValue {
    pub id: Uuid,
    pub property_id: Uuid,
    pub record: ValueRecord,
    pub unit: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DependentPropertyValue {
    pub fn new(property_id: Uuid, record: ValueRecord, unit: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            property_id,
            record,
            unit,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_with_chemical_rejected() {
        let err = FormulationComponent::check_role_constraint(
            ChemicalRole::Carrier,
            Some(Uuid::new_v4()),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::RoleConstraintViolation { .. }));
    }

    #[test]
    fn cpa_without_chemical_rejected() {
        let err =
            FormulationComponent::check_role_constraint(ChemicalRole::Cpa, None).unwrap_err();
        assert!(matches!(err, ReconcileError::RoleConstraintViolation { .. }));
    }

    #[test]
    fn valid_role_bindings_accepted() {
        assert!(
            FormulationComponent::check_role_constraint(ChemicalRole::Carrier, None).is_ok()
        );
        assert!(FormulationComponent::check_role_constraint(
            ChemicalRole::Adjuvant,
            Some(Uuid::new_v4())
        )
        .is_ok());
    }

    #[test]
    fn dependent_target_xor() {
        let f = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert_eq!(
            DependentTarget::from_ids(Some(f), None).unwrap(),
            DependentTarget::Formulation(f)
        );
        assert_eq!(
            DependentTarget::from_ids(None, Some(c)).unwrap(),
            DependentTarget::Component(c)
        );
        assert!(matches!(
            DependentTarget::from_ids(Some(f), Some(c)),
            Err(ReconcileError::AmbiguousTarget)
        ));
        assert!(matches!(
            DependentTarget::from_ids(None, None),
            Err(ReconcileError::AmbiguousTarget)
        ));
    }
}
