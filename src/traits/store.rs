//! Storage traits for the reconciliation graph.
//!
//! The storage layer is split into focused traits:
//! - `ChemicalStore`: canonical chemical identities
//! - `AliasRegistry`: the global surface-form -> identity mapping
//! - `PropertyStore`: property headers, hybrid value rows, provenance
//! - `FormulationStore`: experiment -> formulation -> component subgraph
//! - `FactStore`: composite trait combining all of them plus atomic
//!   per-document commit
//!
//! Uniqueness guarantees (structural key, alias string) must hold under
//! concurrent writers, so implementations provide them as conditional
//! inserts inside a single critical section - never check-then-insert
//! across calls.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::batch::{CommitOutcome, DocumentBatch};
use crate::types::chemical::{
    Alias, ChemicalIdentity, ChemicalRole, DependentPropertyType, PropertyType, StructuralKey,
};
use crate::types::graph::{
    DependentProperty, DependentPropertyValue, DependentTarget, Experiment, Formulation,
    FormulationComponent, PropertyHeader, PropertyValue, Provenance,
};
use crate::types::value::HybridValue;

/// Store for canonical chemical identities.
#[async_trait]
pub trait ChemicalStore: Send + Sync {
    /// Get a chemical by id.
    async fn get_chemical(&self, id: Uuid) -> Result<Option<ChemicalIdentity>>;

    /// Look up a chemical by its structural key.
    async fn find_by_structural_key(&self, key: &StructuralKey)
        -> Result<Option<ChemicalIdentity>>;

    /// Atomic create-if-absent keyed on the structural key.
    ///
    /// Returns the stored identity: the given one if it was created, or the
    /// existing identity when another writer introduced the key first.
    /// Identities without a structural key are always created.
    async fn create_chemical_if_absent(
        &self,
        chemical: ChemicalIdentity,
    ) -> Result<ChemicalIdentity>;

    /// Revise a chemical's role classification. Roles are revisable but
    /// never cleared; the identifier is immutable.
    async fn revise_role(&self, id: Uuid, role: ChemicalRole) -> Result<()>;

    /// Delete a chemical, cascading to its aliases, property headers,
    /// values, and provenance.
    async fn delete_chemical(&self, id: Uuid) -> Result<()>;

    /// Number of stored chemicals.
    async fn chemical_count(&self) -> Result<usize>;
}

/// The global many-to-one mapping from surface-form names to chemicals.
#[async_trait]
pub trait AliasRegistry: Send + Sync {
    /// Bind an alias to a chemical.
    ///
    /// Atomic with the global-uniqueness check: fails with `AliasConflict`
    /// if the alias belongs to a different chemical; re-binding to the same
    /// chemical is an idempotent no-op returning the existing row.
    async fn bind(
        &self,
        chemical_id: Uuid,
        alias: &str,
        embedding: &[f32],
        is_preferred: bool,
    ) -> Result<Alias>;

    /// Exact case-insensitive alias lookup.
    async fn find_exact(&self, alias: &str) -> Result<Option<Alias>>;

    /// The `k` nearest aliases by cosine distance, closest first.
    ///
    /// Sublinear (index-backed), not a linear scan.
    async fn find_nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(Alias, f32)>>;

    /// All aliases bound to a chemical.
    async fn aliases_for(&self, chemical_id: Uuid) -> Result<Vec<Alias>>;
}

/// Store for intrinsic property headers, values, and provenance.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Get or create the (chemical, property-type) header. Idempotent.
    async fn upsert_property(
        &self,
        chemical_id: Uuid,
        property_type: PropertyType,
    ) -> Result<PropertyHeader>;

    /// Append a value row. Never overwrites - distinct observations coexist.
    async fn add_value(
        &self,
        property_id: Uuid,
        value: &HybridValue,
        unit: Option<&str>,
    ) -> Result<PropertyValue>;

    /// Attach a provenance reference to a value.
    async fn attach_provenance(
        &self,
        value_id: Uuid,
        document_id: &str,
        quote: Option<&str>,
        link: Option<&str>,
    ) -> Result<Provenance>;

    /// Denormalized read path: every observed value of a property with its
    /// sources.
    async fn values_for(
        &self,
        chemical_id: Uuid,
        property_type: PropertyType,
    ) -> Result<Vec<(PropertyValue, Vec<Provenance>)>>;
}

/// Store for the experiment -> formulation -> component subgraph and its
/// dependent properties.
#[async_trait]
pub trait FormulationStore: Send + Sync {
    /// Create an experiment. Fails with `DuplicateLabel` if the document
    /// already has an experiment with this local id.
    async fn create_experiment(&self, experiment: Experiment) -> Result<Experiment>;

    /// Find an experiment by its document-scoped local id.
    async fn find_experiment(&self, document_id: &str, local_id: &str)
        -> Result<Option<Experiment>>;

    /// Create a formulation. Fails with `DuplicateLabel` if the label is
    /// already used within the experiment.
    async fn create_formulation(
        &self,
        experiment_id: Uuid,
        label: &str,
        quote: &str,
    ) -> Result<Formulation>;

    /// Add a component. Fails with `RoleConstraintViolation` when the role
    /// and chemical-identity presence are jointly invalid.
    #[allow(clippy::too_many_arguments)]
    async fn add_component(
        &self,
        formulation_id: Uuid,
        role: ChemicalRole,
        chemical_id: Option<Uuid>,
        alias_id: Option<Uuid>,
        amount: Option<&HybridValue>,
        unit: Option<&str>,
        quote: &str,
    ) -> Result<FormulationComponent>;

    /// Get or create the dependent property header for a target. Idempotent.
    async fn upsert_dependent_property(
        &self,
        target: DependentTarget,
        property_type: DependentPropertyType,
    ) -> Result<DependentProperty>;

    /// Append a dependent value row.
    async fn add_dependent_value(
        &self,
        property_id: Uuid,
        value: &HybridValue,
        unit: Option<&str>,
    ) -> Result<DependentPropertyValue>;

    /// Attach a provenance reference to a dependent value.
    async fn attach_dependent_provenance(
        &self,
        value_id: Uuid,
        document_id: &str,
        quote: Option<&str>,
        link: Option<&str>,
    ) -> Result<Provenance>;

    /// Denormalized read path for dependent values.
    async fn dependent_values_for(
        &self,
        target: DependentTarget,
        property_type: DependentPropertyType,
    ) -> Result<Vec<(DependentPropertyValue, Vec<Provenance>)>>;

    /// Delete an experiment, cascading to its formulations, components,
    /// dependent properties, and their values and provenance.
    async fn delete_experiment(&self, id: Uuid) -> Result<()>;
}

/// Atomic per-document commit.
#[async_trait]
pub trait BatchCommit: Send + Sync {
    /// Apply a whole document batch atomically: either every surviving
    /// write lands, or (on infrastructure failure) none do.
    ///
    /// Re-validates planned identities and aliases inside the write
    /// critical section and remaps planned ids onto rows a concurrent
    /// document created first. Writes invalidated by that re-validation
    /// are dropped and reported in the outcome, not silently lost.
    async fn commit(&self, batch: DocumentBatch) -> Result<CommitOutcome>;
}

/// Composite storage trait combining all stores.
///
/// This is the main trait consumed by the resolver and the orchestrator.
pub trait FactStore:
    ChemicalStore + AliasRegistry + PropertyStore + FormulationStore + BatchCommit
{
}

// Blanket implementation: anything implementing the five traits is a FactStore
impl<T: ChemicalStore + AliasRegistry + PropertyStore + FormulationStore + BatchCommit> FactStore
    for T
{
}

/// Cosine distance between two vectors (0 = identical direction).
///
/// Degenerate inputs (length mismatch, zero vectors) yield the maximum
/// distance so they never win a nearest-neighbor match.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_distance(&a, &b).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_distance(&a, &c) - 1.0).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_distance(&a, &d) - 2.0).abs() < 0.001);
    }

    #[test]
    fn degenerate_vectors_never_match() {
        assert_eq!(cosine_distance(&[], &[]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
