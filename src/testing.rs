//! Test doubles for unit and integration tests.
//!
//! `MockEmbedder` produces deterministic embeddings without a provider:
//! pin vectors for specific names to control distances, or rely on the
//! hash-derived fallback when only determinism matters. `UnreliableStore`
//! wraps any store and fails a configured number of commits with
//! `StoreUnavailable`, for exercising the retry path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ReconcileError, Result};
use crate::traits::embedder::Embedder;
use crate::traits::store::{
    AliasRegistry, BatchCommit, ChemicalStore, FormulationStore, PropertyStore,
};
use crate::types::batch::{CommitOutcome, DocumentBatch};
use crate::types::chemical::{
    Alias, ChemicalIdentity, ChemicalRole, DependentPropertyType, PropertyType, StructuralKey,
};
use crate::types::graph::{
    DependentProperty, DependentPropertyValue, DependentTarget, Experiment, Formulation,
    FormulationComponent, PropertyHeader, PropertyValue, Provenance,
};
use crate::types::value::HybridValue;

/// Deterministic embedder for tests.
///
/// Names with pinned vectors return them verbatim; everything else gets a
/// unit vector derived from a hash of the canonical name, so repeated calls
/// agree and distinct names land far apart.
pub struct MockEmbedder {
    dim: usize,
    pinned: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            pinned: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Pin the embedding for a name (canonicalized).
    pub fn with_embedding(mut self, name: &str, embedding: Vec<f32>) -> Self {
        self.pinned.insert(Alias::canonical(name), embedding);
        self
    }

    /// Number of `embed` calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// The vector `embed` would return for a name, synchronously.
    pub fn embedding_for(&self, name: &str) -> Vec<f32> {
        let canonical = Alias::canonical(name);
        if let Some(pinned) = self.pinned.get(&canonical) {
            return pinned.clone();
        }
        derived_embedding(&canonical, self.dim)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.embedding_for(text))
    }
}

/// Hash-derived unit vector, stable across runs.
fn derived_embedding(canonical: &str, dim: usize) -> Vec<f32> {
    let mut bytes = Vec::with_capacity(dim * 4);
    let mut counter = 0u32;
    while bytes.len() < dim * 4 {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hasher.update(counter.to_le_bytes());
        bytes.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    let mut out: Vec<f32> = bytes
        .chunks_exact(4)
        .take(dim)
        .map(|chunk| {
            let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            (raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
        })
        .collect();
    let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut out {
            *x /= norm;
        }
    }
    out
}

/// Store wrapper that fails the first `n` commits with `StoreUnavailable`,
/// then delegates. Read and write paths other than commit always delegate.
pub struct UnreliableStore<S> {
    inner: Arc<S>,
    commit_failures: AtomicUsize,
}

impl<S> UnreliableStore<S> {
    pub fn failing_commits(inner: Arc<S>, n: usize) -> Self {
        Self {
            inner,
            commit_failures: AtomicUsize::new(n),
        }
    }

    /// Remaining commit failures.
    pub fn failures_left(&self) -> usize {
        self.commit_failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<S: ChemicalStore> ChemicalStore for UnreliableStore<S> {
    async fn get_chemical(&self, id: Uuid) -> Result<Option<ChemicalIdentity>> {
        self.inner.get_chemical(id).await
    }

    async fn find_by_structural_key(
        &self,
        key: &StructuralKey,
    ) -> Result<Option<ChemicalIdentity>> {
        self.inner.find_by_structural_key(key).await
    }

    async fn create_chemical_if_absent(
        &self,
        chemical: ChemicalIdentity,
    ) -> Result<ChemicalIdentity> {
        self.inner.create_chemical_if_absent(chemical).await
    }

    async fn revise_role(&self, id: Uuid, role: ChemicalRole) -> Result<()> {
        self.inner.revise_role(id, role).await
    }

    async fn delete_chemical(&self, id: Uuid) -> Result<()> {
        self.inner.delete_chemical(id).await
    }

    async fn chemical_count(&self) -> Result<usize> {
        self.inner.chemical_count().await
    }
}

#[async_trait]
impl<S: AliasRegistry> AliasRegistry for UnreliableStore<S> {
    async fn bind(
        &self,
        chemical_id: Uuid,
        alias: &str,
        embedding: &[f32],
        is_preferred: bool,
    ) -> Result<Alias> {
        self.inner.bind(chemical_id, alias, embedding, is_preferred).await
    }

    async fn find_exact(&self, alias: &str) -> Result<Option<Alias>> {
        self.inner.find_exact(alias).await
    }

    async fn find_nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(Alias, f32)>> {
        self.inner.find_nearest(embedding, k).await
    }

    async fn aliases_for(&self, chemical_id: Uuid) -> Result<Vec<Alias>> {
        self.inner.aliases_for(chemical_id).await
    }
}

#[async_trait]
impl<S: PropertyStore> PropertyStore for UnreliableStore<S> {
    async fn upsert_property(
        &self,
        chemical_id: Uuid,
        property_type: PropertyType,
    ) -> Result<PropertyHeader> {
        self.inner.upsert_property(chemical_id, property_type).await
    }

    async fn add_value(
        &self,
        property_id: Uuid,
        value: &HybridValue,
        unit: Option<&str>,
    ) -> Result<PropertyValue> {
        self.inner.add_value(property_id, value, unit).await
    }

    async fn attach_provenance(
        &self,
        value_id: Uuid,
        document_id: &str,
        quote: Option<&str>,
        link: Option<&str>,
    ) -> Result<Provenance> {
        self.inner
            .attach_provenance(value_id, document_id, quote, link)
            .await
    }

    async fn values_for(
        &self,
        chemical_id: Uuid,
        property_type: PropertyType,
    ) -> Result<Vec<(PropertyValue, Vec<Provenance>)>> {
        self.inner.values_for(chemical_id, property_type).await
    }
}

#[async_trait]
impl<S: FormulationStore> FormulationStore for UnreliableStore<S> {
    async fn create_experiment(&self, experiment: Experiment) -> Result<Experiment> {
        self.inner.create_experiment(experiment).await
    }

    async fn find_experiment(
        &self,
        document_id: &str,
        local_id: &str,
    ) -> Result<Option<Experiment>> {
        self.inner.find_experiment(document_id, local_id).await
    }

    async fn create_formulation(
        &self,
        experiment_id: Uuid,
        label: &str,
        quote: &str,
    ) -> Result<Formulation> {
        self.inner.create_formulation(experiment_id, label, quote).await
    }

    async fn add_component(
        &self,
        formulation_id: Uuid,
        role: ChemicalRole,
        chemical_id: Option<Uuid>,
        alias_id: Option<Uuid>,
        amount: Option<&HybridValue>,
        unit: Option<&str>,
        quote: &str,
    ) -> Result<FormulationComponent> {
        self.inner
            .add_component(formulation_id, role, chemical_id, alias_id, amount, unit, quote)
            .await
    }

    async fn upsert_dependent_property(
        &self,
        target: DependentTarget,
        property_type: DependentPropertyType,
    ) -> Result<DependentProperty> {
        self.inner.upsert_dependent_property(target, property_type).await
    }

    async fn add_dependent_value(
        &self,
        property_id: Uuid,
        value: &HybridValue,
        unit: Option<&str>,
    ) -> Result<DependentPropertyValue> {
        self.inner.add_dependent_value(property_id, value, unit).await
    }

    async fn attach_dependent_provenance(
        &self,
        value_id: Uuid,
        document_id: &str,
        quote: Option<&str>,
        link: Option<&str>,
    ) -> Result<Provenance> {
        self.inner
            .attach_dependent_provenance(value_id, document_id, quote, link)
            .await
    }

    async fn dependent_values_for(
        &self,
        target: DependentTarget,
        property_type: DependentPropertyType,
    ) -> Result<Vec<(DependentPropertyValue, Vec<Provenance>)>> {
        self.inner.dependent_values_for(target, property_type).await
    }

    async fn delete_experiment(&self, id: Uuid) -> Result<()> {
        self.inner.delete_experiment(id).await
    }
}

#[async_trait]
impl<S: BatchCommit> BatchCommit for UnreliableStore<S> {
    async fn commit(&self, batch: DocumentBatch) -> Result<CommitOutcome> {
        let left = self.commit_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.commit_failures.store(left - 1, Ordering::Relaxed);
            return Err(ReconcileError::StoreUnavailable(
                "simulated outage".into(),
            ));
        }
        self.inner.commit(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(16);
        let a = embedder.embed("DMSO").await.unwrap();
        let b = embedder.embed("dmso ").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_eq!(embedder.call_count(), 2);

        // unit norm
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn pinned_embeddings_win_over_derived() {
        let pinned = vec![1.0, 0.0, 0.0];
        let embedder = MockEmbedder::new(3).with_embedding("DMSO", pinned.clone());
        assert_eq!(embedder.embed("dmso").await.unwrap(), pinned);
        assert_ne!(embedder.embed("glycerol").await.unwrap(), pinned);
    }
}
