//! In-memory storage implementation.
//!
//! All graph state lives behind one `RwLock`, so uniqueness checks and the
//! per-document commit are single critical sections: check-and-insert never
//! races. Alias similarity search goes through an HNSW index so
//! `find_nearest` stays sublinear as the registry grows.
//!
//! Suitable for tests, development, and single-process ingestion. A
//! multi-instance deployment needs a backend whose conditional inserts are
//! atomic at the store boundary; the trait contracts in
//! [`crate::traits::store`] spell out what such a backend must honor.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anndists::dist::DistCosine;
use async_trait::async_trait;
use dashmap::DashMap;
use hnsw_rs::hnsw::Hnsw;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ReconcileError, Result};
use crate::traits::store::{
    AliasRegistry, BatchCommit, ChemicalStore, FormulationStore, PropertyStore,
};
use crate::types::batch::{CommitOutcome, DocumentBatch, DroppedWrite};
use crate::types::chemical::{
    Alias, ChemicalIdentity, ChemicalRole, DependentPropertyType, PropertyType, StructuralKey,
};
use crate::types::graph::{
    DependentProperty, DependentPropertyValue, DependentTarget, Experiment, Formulation,
    FormulationComponent, PropertyHeader, PropertyValue, Provenance,
};
use crate::types::report::SkipReason;
use crate::types::value::{HybridValue, ValueRecord};

/// HNSW index over alias embeddings.
///
/// Entries are append-only; deletion removes the id mapping so stale index
/// entries are filtered out of search results.
struct AliasIndex {
    hnsw: RwLock<Hnsw<'static, f32, DistCosine>>,
    id_to_alias: DashMap<usize, Uuid>,
    next_id: AtomicUsize,
}

// Safety: Hnsw uses internal synchronization via atomics/locks.
// The RwLock wrapper provides the outer synchronization needed.
unsafe impl Send for AliasIndex {}
unsafe impl Sync for AliasIndex {}

impl AliasIndex {
    fn new(capacity: usize) -> Self {
        let max_layer = (capacity as f64).log2().ceil() as usize;
        let max_layer = max_layer.clamp(4, 16);
        let hnsw = Hnsw::new(16, capacity.max(16), max_layer, 200, DistCosine);
        Self {
            hnsw: RwLock::new(hnsw),
            id_to_alias: DashMap::new(),
            next_id: AtomicUsize::new(0),
        }
    }

    fn insert(&self, alias_id: Uuid, embedding: &[f32]) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let data = embedding.to_vec();
        // insert takes &self, not &mut self
        match self.hnsw.read() {
            Ok(hnsw) => {
                hnsw.insert((&data, id));
                self.id_to_alias.insert(id, alias_id);
            }
            Err(_) => {
                warn!(
                    alias = %alias_id,
                    "alias index lock poisoned, alias will not appear in similarity search"
                );
            }
        }
    }

    fn remove(&self, alias_id: Uuid) {
        self.id_to_alias.retain(|_, v| *v != alias_id);
    }

    /// The `k` nearest live alias ids with their cosine distances.
    fn search(&self, embedding: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        if self.id_to_alias.is_empty() {
            return Vec::new();
        }
        let ef_search = (k * 2).max(32);
        let hnsw = match self.hnsw.read() {
            Ok(h) => h,
            Err(_) => {
                warn!("alias index lock poisoned, similarity search returning nothing");
                return Vec::new();
            }
        };
        let query = embedding.to_vec();
        // Overfetch to compensate for entries whose alias was deleted.
        hnsw.search(&query, k * 2, ef_search)
            .into_iter()
            .filter_map(|n| {
                let alias_id = *self.id_to_alias.get(&n.d_id)?.value();
                Some((alias_id, n.distance))
            })
            .take(k)
            .collect()
    }
}

/// All graph state. One lock, one critical section.
#[derive(Default)]
struct GraphState {
    chemicals: HashMap<Uuid, ChemicalIdentity>,
    by_structural_key: HashMap<StructuralKey, Uuid>,

    aliases: HashMap<Uuid, Alias>,
    alias_by_canonical: HashMap<String, Uuid>,

    properties: HashMap<Uuid, PropertyHeader>,
    property_by_pair: HashMap<(Uuid, PropertyType), Uuid>,
    values: HashMap<Uuid, PropertyValue>,
    values_by_property: HashMap<Uuid, Vec<Uuid>>,
    provenance_by_value: HashMap<Uuid, Vec<Provenance>>,

    experiments: HashMap<Uuid, Experiment>,
    experiment_by_local: HashMap<(String, String), Uuid>,
    formulations: HashMap<Uuid, Formulation>,
    formulation_by_label: HashMap<(Uuid, String), Uuid>,
    components: HashMap<Uuid, FormulationComponent>,
    components_by_formulation: HashMap<Uuid, Vec<Uuid>>,

    dependent_properties: HashMap<Uuid, DependentProperty>,
    dependent_by_pair: HashMap<(DependentTarget, DependentPropertyType), Uuid>,
    dependent_values: HashMap<Uuid, DependentPropertyValue>,
    dependent_values_by_property: HashMap<Uuid, Vec<Uuid>>,
    dependent_provenance_by_value: HashMap<Uuid, Vec<Provenance>>,
}

impl GraphState {
    fn create_chemical(&mut self, chemical: ChemicalIdentity) {
        if let Some(key) = &chemical.structural_key {
            self.by_structural_key.insert(key.clone(), chemical.id);
        }
        self.chemicals.insert(chemical.id, chemical);
    }

    fn bind_alias(&mut self, alias: Alias, index: &AliasIndex) {
        index.insert(alias.id, &alias.embedding);
        self.alias_by_canonical
            .insert(Alias::canonical(&alias.alias), alias.id);
        self.aliases.insert(alias.id, alias);
    }

    fn upsert_property(&mut self, chemical_id: Uuid, property_type: PropertyType) -> PropertyHeader {
        if let Some(id) = self.property_by_pair.get(&(chemical_id, property_type)) {
            return self.properties[id].clone();
        }
        let header = PropertyHeader::new(chemical_id, property_type);
        self.property_by_pair
            .insert((chemical_id, property_type), header.id);
        self.properties.insert(header.id, header.clone());
        header
    }

    fn add_value(
        &mut self,
        property_id: Uuid,
        value: &HybridValue,
        unit: Option<&str>,
    ) -> Result<PropertyValue> {
        let header = self
            .properties
            .get(&property_id)
            .ok_or(ReconcileError::ReferentialGap {
                reference: format!("property {property_id}"),
            })?;
        header.property_type.validate_unit(unit)?;
        let row = PropertyValue::new(
            property_id,
            ValueRecord::encode(value),
            unit.map(str::to_string),
        );
        self.values_by_property
            .entry(property_id)
            .or_default()
            .push(row.id);
        self.values.insert(row.id, row.clone());
        Ok(row)
    }

    fn attach_provenance(
        &mut self,
        value_id: Uuid,
        document_id: &str,
        quote: Option<&str>,
        link: Option<&str>,
    ) -> Result<Provenance> {
        if !self.values.contains_key(&value_id) {
            return Err(ReconcileError::ReferentialGap {
                reference: format!("property value {value_id}"),
            });
        }
        let reference = Provenance::new(
            value_id,
            document_id,
            quote.map(str::to_string),
            link.map(str::to_string),
        );
        self.provenance_by_value
            .entry(value_id)
            .or_default()
            .push(reference.clone());
        Ok(reference)
    }

    fn create_experiment(&mut self, experiment: Experiment) -> Result<Experiment> {
        let key = (experiment.document_id.clone(), experiment.local_id.clone());
        if self.experiment_by_local.contains_key(&key) {
            return Err(ReconcileError::DuplicateLabel {
                label: experiment.local_id.clone(),
                scope: format!("document {}", experiment.document_id),
            });
        }
        self.experiment_by_local.insert(key, experiment.id);
        self.experiments.insert(experiment.id, experiment.clone());
        Ok(experiment)
    }

    fn create_formulation(
        &mut self,
        experiment_id: Uuid,
        label: &str,
        quote: &str,
    ) -> Result<Formulation> {
        if !self.experiments.contains_key(&experiment_id) {
            return Err(ReconcileError::ReferentialGap {
                reference: format!("experiment {experiment_id}"),
            });
        }
        let key = (experiment_id, label.to_string());
        if self.formulation_by_label.contains_key(&key) {
            return Err(ReconcileError::DuplicateLabel {
                label: label.to_string(),
                scope: format!("experiment {experiment_id}"),
            });
        }
        let formulation = Formulation {
            id: Uuid::new_v4(),
            experiment_id,
            label: label.to_string(),
            quote: quote.to_string(),
        };
        self.formulation_by_label.insert(key, formulation.id);
        self.formulations.insert(formulation.id, formulation.clone());
        Ok(formulation)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_component(
        &mut self,
        formulation_id: Uuid,
        role: ChemicalRole,
        chemical_id: Option<Uuid>,
        alias_id: Option<Uuid>,
        amount: Option<&HybridValue>,
        unit: Option<&str>,
        quote: &str,
    ) -> Result<FormulationComponent> {
        FormulationComponent::check_role_constraint(role, chemical_id)?;
        if !self.formulations.contains_key(&formulation_id) {
            return Err(ReconcileError::ReferentialGap {
                reference: format!("formulation {formulation_id}"),
            });
        }
        if let Some(id) = chemical_id {
            if !self.chemicals.contains_key(&id) {
                return Err(ReconcileError::ReferentialGap {
                    reference: format!("chemical {id}"),
                });
            }
        }
        let component = FormulationComponent {
            id: Uuid::new_v4(),
            formulation_id,
            role,
            chemical_id,
            alias_id,
            amount: amount.map(ValueRecord::encode),
            unit: unit.map(str::to_string),
            quote: quote.to_string(),
        };
        self.components_by_formulation
            .entry(formulation_id)
            .or_default()
            .push(component.id);
        self.components.insert(component.id, component.clone());
        Ok(component)
    }

    fn target_exists(&self, target: DependentTarget) -> bool {
        match target {
            DependentTarget::Formulation(id) => self.formulations.contains_key(&id),
            DependentTarget::Component(id) => self.components.contains_key(&id),
        }
    }

    fn upsert_dependent_property(
        &mut self,
        target: DependentTarget,
        property_type: DependentPropertyType,
    ) -> Result<DependentProperty> {
        if !self.target_exists(target) {
            return Err(ReconcileError::ReferentialGap {
                reference: format!("dependent target {target:?}"),
            });
        }
        if let Some(id) = self.dependent_by_pair.get(&(target, property_type)) {
            return Ok(self.dependent_properties[id].clone());
        }
        let header = DependentProperty::new(target, property_type);
        self.dependent_by_pair.insert((target, property_type), header.id);
        self.dependent_properties.insert(header.id, header.clone());
        Ok(header)
    }

    fn add_dependent_value(
        &mut self,
        property_id: Uuid,
        value: &HybridValue,
        unit: Option<&str>,
    ) -> Result<DependentPropertyValue> {
        if !self.dependent_properties.contains_key(&property_id) {
            return Err(ReconcileError::ReferentialGap {
                reference: format!("dependent property {property_id}"),
            });
        }
        let row = DependentPropertyValue::new(
            property_id,
            ValueRecord::encode(value),
            unit.map(str::to_string),
        );
        self.dependent_values_by_property
            .entry(property_id)
            .or_default()
            .push(row.id);
        self.dependent_values.insert(row.id, row.clone());
        Ok(row)
    }

    fn attach_dependent_provenance(
        &mut self,
        value_id: Uuid,
        document_id: &str,
        quote: Option<&str>,
        link: Option<&str>,
    ) -> Result<Provenance> {
        if !self.dependent_values.contains_key(&value_id) {
            return Err(ReconcileError::ReferentialGap {
                reference: format!("dependent value {value_id}"),
            });
        }
        let reference = Provenance::new(
            value_id,
            document_id,
            quote.map(str::to_string),
            link.map(str::to_string),
        );
        self.dependent_provenance_by_value
            .entry(value_id)
            .or_default()
            .push(reference.clone());
        Ok(reference)
    }

    /// Recursive sweep deleting a formulation and everything under it.
    fn sweep_formulation(&mut self, formulation_id: Uuid) {
        for component_id in self
            .components_by_formulation
            .remove(&formulation_id)
            .unwrap_or_default()
        {
            self.components.remove(&component_id);
            self.sweep_dependent(DependentTarget::Component(component_id));
        }
        self.sweep_dependent(DependentTarget::Formulation(formulation_id));
        if let Some(formulation) = self.formulations.remove(&formulation_id) {
            self.formulation_by_label
                .remove(&(formulation.experiment_id, formulation.label));
        }
    }

    fn sweep_dependent(&mut self, target: DependentTarget) {
        let headers: Vec<Uuid> = self
            .dependent_by_pair
            .iter()
            .filter(|((t, _), _)| *t == target)
            .map(|(_, id)| *id)
            .collect();
        for header_id in headers {
            if let Some(header) = self.dependent_properties.remove(&header_id) {
                self.dependent_by_pair
                    .remove(&(header.target, header.property_type));
            }
            for value_id in self
                .dependent_values_by_property
                .remove(&header_id)
                .unwrap_or_default()
            {
                self.dependent_values.remove(&value_id);
                self.dependent_provenance_by_value.remove(&value_id);
            }
        }
    }
}

/// In-memory store for the full reconciliation graph.
pub struct MemoryStore {
    state: RwLock<GraphState>,
    alias_index: AliasIndex,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with a default alias-index capacity hint.
    pub fn new() -> Self {
        Self::with_alias_capacity(10_000)
    }

    /// Create an empty store sized for an expected alias count.
    pub fn with_alias_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            alias_index: AliasIndex::new(capacity),
        }
    }

    /// Number of stored aliases.
    pub fn alias_count(&self) -> usize {
        self.state.read().unwrap().aliases.len()
    }

    /// Number of stored experiments.
    pub fn experiment_count(&self) -> usize {
        self.state.read().unwrap().experiments.len()
    }

    /// Number of stored property value rows.
    pub fn value_count(&self) -> usize {
        self.state.read().unwrap().values.len()
    }
}

#[async_trait]
impl ChemicalStore for MemoryStore {
    async fn get_chemical(&self, id: Uuid) -> Result<Option<ChemicalIdentity>> {
        Ok(self.state.read().unwrap().chemicals.get(&id).cloned())
    }

    async fn find_by_structural_key(
        &self,
        key: &StructuralKey,
    ) -> Result<Option<ChemicalIdentity>> {
        let state = self.state.read().unwrap();
        Ok(state
            .by_structural_key
            .get(key)
            .and_then(|id| state.chemicals.get(id))
            .cloned())
    }

    async fn create_chemical_if_absent(
        &self,
        chemical: ChemicalIdentity,
    ) -> Result<ChemicalIdentity> {
        let mut state = self.state.write().unwrap();
        if let Some(key) = &chemical.structural_key {
            if let Some(existing_id) = state.by_structural_key.get(key) {
                return Ok(state.chemicals[existing_id].clone());
            }
        }
        state.create_chemical(chemical.clone());
        Ok(chemical)
    }

    async fn revise_role(&self, id: Uuid, role: ChemicalRole) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let chemical = state
            .chemicals
            .get_mut(&id)
            .ok_or(ReconcileError::ChemicalNotFound { id })?;
        chemical.role = role;
        Ok(())
    }

    async fn delete_chemical(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if !state.chemicals.contains_key(&id) {
            return Err(ReconcileError::ChemicalNotFound { id });
        }
        // Never physically deleted while referenced.
        if let Some(component) = state
            .components
            .values()
            .find(|c| c.chemical_id == Some(id))
        {
            return Err(ReconcileError::ReferentialGap {
                reference: format!("chemical {id} still referenced by component {}", component.id),
            });
        }

        let alias_ids: Vec<Uuid> = state
            .aliases
            .values()
            .filter(|a| a.chemical_id == id)
            .map(|a| a.id)
            .collect();
        for alias_id in alias_ids {
            if let Some(alias) = state.aliases.remove(&alias_id) {
                state.alias_by_canonical.remove(&Alias::canonical(&alias.alias));
            }
            self.alias_index.remove(alias_id);
        }

        let header_ids: Vec<Uuid> = state
            .properties
            .values()
            .filter(|h| h.chemical_id == id)
            .map(|h| h.id)
            .collect();
        for header_id in header_ids {
            if let Some(header) = state.properties.remove(&header_id) {
                state
                    .property_by_pair
                    .remove(&(header.chemical_id, header.property_type));
            }
            for value_id in state
                .values_by_property
                .remove(&header_id)
                .unwrap_or_default()
            {
                state.values.remove(&value_id);
                state.provenance_by_value.remove(&value_id);
            }
        }

        if let Some(chemical) = state.chemicals.remove(&id) {
            if let Some(key) = &chemical.structural_key {
                state.by_structural_key.remove(key);
            }
        }
        Ok(())
    }

    async fn chemical_count(&self) -> Result<usize> {
        Ok(self.state.read().unwrap().chemicals.len())
    }
}

#[async_trait]
impl AliasRegistry for MemoryStore {
    async fn bind(
        &self,
        chemical_id: Uuid,
        alias: &str,
        embedding: &[f32],
        is_preferred: bool,
    ) -> Result<Alias> {
        let mut state = self.state.write().unwrap();
        let canonical = Alias::canonical(alias);
        if let Some(existing_id) = state.alias_by_canonical.get(&canonical) {
            let existing = state.aliases[existing_id].clone();
            if existing.chemical_id == chemical_id {
                // idempotent re-bind
                return Ok(existing);
            }
            return Err(ReconcileError::AliasConflict {
                alias: alias.to_string(),
                existing: existing.chemical_id,
            });
        }
        if !state.chemicals.contains_key(&chemical_id) {
            return Err(ReconcileError::ChemicalNotFound { id: chemical_id });
        }
        let row = Alias::new(chemical_id, alias, embedding.to_vec(), is_preferred);
        state.bind_alias(row.clone(), &self.alias_index);
        Ok(row)
    }

    async fn find_exact(&self, alias: &str) -> Result<Option<Alias>> {
        let state = self.state.read().unwrap();
        Ok(state
            .alias_by_canonical
            .get(&Alias::canonical(alias))
            .and_then(|id| state.aliases.get(id))
            .cloned())
    }

    async fn find_nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<(Alias, f32)>> {
        let hits = self.alias_index.search(embedding, k);
        let state = self.state.read().unwrap();
        Ok(hits
            .into_iter()
            .filter_map(|(alias_id, distance)| {
                let alias = state.aliases.get(&alias_id)?.clone();
                Some((alias, distance))
            })
            .collect())
    }

    async fn aliases_for(&self, chemical_id: Uuid) -> Result<Vec<Alias>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .aliases
            .values()
            .filter(|a| a.chemical_id == chemical_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PropertyStore for MemoryStore {
    async fn upsert_property(
        &self,
        chemical_id: Uuid,
        property_type: PropertyType,
    ) -> Result<PropertyHeader> {
        let mut state = self.state.write().unwrap();
        if !state.chemicals.contains_key(&chemical_id) {
            return Err(ReconcileError::ChemicalNotFound { id: chemical_id });
        }
        Ok(state.upsert_property(chemical_id, property_type))
    }

    async fn add_value(
        &self,
        property_id: Uuid,
        value: &HybridValue,
        unit: Option<&str>,
    ) -> Result<PropertyValue> {
        self.state.write().unwrap().add_value(property_id, value, unit)
    }

    async fn attach_provenance(
        &self,
        value_id: Uuid,
        document_id: &str,
        quote: Option<&str>,
        link: Option<&str>,
    ) -> Result<Provenance> {
        self.state
            .write()
            .unwrap()
            .attach_provenance(value_id, document_id, quote, link)
    }

    async fn values_for(
        &self,
        chemical_id: Uuid,
        property_type: PropertyType,
    ) -> Result<Vec<(PropertyValue, Vec<Provenance>)>> {
        let state = self.state.read().unwrap();
        let Some(header_id) = state.property_by_pair.get(&(chemical_id, property_type)) else {
            return Ok(Vec::new());
        };
        let value_ids = state
            .values_by_property
            .get(header_id)
            .cloned()
            .unwrap_or_default();
        Ok(value_ids
            .into_iter()
            .filter_map(|id| {
                let value = state.values.get(&id)?.clone();
                let sources = state
                    .provenance_by_value
                    .get(&id)
                    .cloned()
                    .unwrap_or_default();
                Some((value, sources))
            })
            .collect())
    }
}

#[async_trait]
impl FormulationStore for MemoryStore {
    async fn create_experiment(&self, experiment: Experiment) -> Result<Experiment> {
        self.state.write().unwrap().create_experiment(experiment)
    }

    async fn find_experiment(
        &self,
        document_id: &str,
        local_id: &str,
    ) -> Result<Option<Experiment>> {
        let state = self.state.read().unwrap();
        Ok(state
            .experiment_by_local
            .get(&(document_id.to_string(), local_id.to_string()))
            .and_then(|id| state.experiments.get(id))
            .cloned())
    }

    async fn create_formulation(
        &self,
        experiment_id: Uuid,
        label: &str,
        quote: &str,
    ) -> Result<Formulation> {
        self.state
            .write()
            .unwrap()
            .create_formulation(experiment_id, label, quote)
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
        self.state.write().unwrap().add_component(
            formulation_id,
            role,
            chemical_id,
            alias_id,
            amount,
            unit,
            quote,
        )
    }

    async fn upsert_dependent_property(
        &self,
        target: DependentTarget,
        property_type: DependentPropertyType,
    ) -> Result<DependentProperty> {
        self.state
            .write()
            .unwrap()
            .upsert_dependent_property(target, property_type)
    }

    async fn add_dependent_value(
        &self,
        property_id: Uuid,
        value: &HybridValue,
        unit: Option<&str>,
    ) -> Result<DependentPropertyValue> {
        self.state
            .write()
            .unwrap()
            .add_dependent_value(property_id, value, unit)
    }

    async fn attach_dependent_provenance(
        &self,
        value_id: Uuid,
        document_id: &str,
        quote: Option<&str>,
        link: Option<&str>,
    ) -> Result<Provenance> {
        self.state
            .write()
            .unwrap()
            .attach_dependent_provenance(value_id, document_id, quote, link)
    }

    async fn dependent_values_for(
        &self,
        target: DependentTarget,
        property_type: DependentPropertyType,
    ) -> Result<Vec<(DependentPropertyValue, Vec<Provenance>)>> {
        let state = self.state.read().unwrap();
        let Some(header_id) = state.dependent_by_pair.get(&(target, property_type)) else {
            return Ok(Vec::new());
        };
        let value_ids = state
            .dependent_values_by_property
            .get(header_id)
            .cloned()
            .unwrap_or_default();
        Ok(value_ids
            .into_iter()
            .filter_map(|id| {
                let value = state.dependent_values.get(&id)?.clone();
                let sources = state
                    .dependent_provenance_by_value
                    .get(&id)
                    .cloned()
                    .unwrap_or_default();
                Some((value, sources))
            })
            .collect())
    }

    async fn delete_experiment(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let Some(experiment) = state.experiments.remove(&id) else {
            return Err(ReconcileError::ReferentialGap {
                reference: format!("experiment {id}"),
            });
        };
        state
            .experiment_by_local
            .remove(&(experiment.document_id.clone(), experiment.local_id.clone()));
        let formulation_ids: Vec<Uuid> = state
            .formulations
            .values()
            .filter(|f| f.experiment_id == id)
            .map(|f| f.id)
            .collect();
        for formulation_id in formulation_ids {
            state.sweep_formulation(formulation_id);
        }
        Ok(())
    }
}

#[async_trait]
impl BatchCommit for MemoryStore {
    async fn commit(&self, batch: DocumentBatch) -> Result<CommitOutcome> {
        let mut state = self.state.write().unwrap();
        let mut outcome = CommitOutcome::default();

        let planned_chemicals: HashMap<Uuid, &ChemicalIdentity> =
            batch.new_chemicals.iter().map(|c| (c.id, c)).collect();

        // 1. Planned chemicals with a structural key: a concurrent document
        //    may have introduced the key first; remap instead of creating.
        for chemical in &batch.new_chemicals {
            if let Some(key) = &chemical.structural_key {
                if let Some(existing_id) = state.by_structural_key.get(key) {
                    debug!(key = %key, existing = %existing_id, "structural key already present, remapping");
                    outcome.chemical_remap.insert(chemical.id, *existing_id);
                }
            }
        }

        // 2. Planned aliases: re-validate global uniqueness inside the
        //    critical section.
        let mut conflicted_aliases: HashSet<Uuid> = HashSet::new();
        let mut aliases_to_create: Vec<Alias> = Vec::new();
        for alias in &batch.new_aliases {
            let canonical = Alias::canonical(&alias.alias);
            let expected_owner = outcome.surviving_chemical(alias.chemical_id);
            match state.alias_by_canonical.get(&canonical) {
                Some(existing_id) => {
                    let existing = &state.aliases[existing_id];
                    if existing.chemical_id == expected_owner {
                        outcome.alias_remap.insert(alias.id, existing.id);
                    } else if planned_chemicals.contains_key(&alias.chemical_id)
                        && !outcome.chemical_remap.contains_key(&alias.chemical_id)
                        && planned_chemicals[&alias.chemical_id].structural_key.is_none()
                    {
                        // The planned identity existed only to own this
                        // alias; converge on the identity that won the race.
                        let owner = existing.chemical_id;
                        debug!(alias = %alias.alias, %owner, "alias bound concurrently, converging");
                        outcome.chemical_remap.insert(alias.chemical_id, owner);
                        outcome.alias_remap.insert(alias.id, existing.id);
                    } else {
                        conflicted_aliases.insert(alias.id);
                        outcome.dropped.push(DroppedWrite {
                            record: format!("alias '{}'", alias.alias),
                            reason: SkipReason::AliasConflict,
                            detail: ReconcileError::AliasConflict {
                                alias: alias.alias.clone(),
                                existing: existing.chemical_id,
                            }
                            .to_string(),
                        });
                    }
                }
                None => aliases_to_create.push(alias.clone()),
            }
        }

        // 3. Create surviving chemicals and aliases.
        for chemical in &batch.new_chemicals {
            if outcome.chemical_remap.contains_key(&chemical.id) {
                continue;
            }
            state.create_chemical(chemical.clone());
            outcome.created_chemicals.push(chemical.id);
        }
        for mut alias in aliases_to_create {
            alias.chemical_id = outcome.surviving_chemical(alias.chemical_id);
            if !state.chemicals.contains_key(&alias.chemical_id) {
                outcome.dropped.push(DroppedWrite {
                    record: format!("alias '{}'", alias.alias),
                    reason: SkipReason::ReferentialGap,
                    detail: format!("unresolved reference: chemical {}", alias.chemical_id),
                });
                continue;
            }
            outcome.created_aliases.push(alias.id);
            state.bind_alias(alias, &self.alias_index);
        }

        // 4. Intrinsic property values with provenance.
        for write in &batch.property_writes {
            let chemical_id = outcome.surviving_chemical(write.chemical_id);
            if !state.chemicals.contains_key(&chemical_id) {
                outcome.dropped.push(DroppedWrite {
                    record: write.record.clone(),
                    reason: SkipReason::ReferentialGap,
                    detail: format!("unresolved reference: chemical {chemical_id}"),
                });
                continue;
            }
            let header = state.upsert_property(chemical_id, write.property_type);
            let row = match state.add_value(header.id, &write.value, write.unit.as_deref()) {
                Ok(row) => row,
                Err(err) => {
                    outcome.dropped.push(DroppedWrite {
                        record: write.record.clone(),
                        reason: SkipReason::from_error(&err)
                            .unwrap_or(SkipReason::ReferentialGap),
                        detail: err.to_string(),
                    });
                    continue;
                }
            };
            state.attach_provenance(
                row.id,
                &batch.document_id,
                Some(&write.quote),
                batch.link.as_deref(),
            )?;
            outcome.property_values_written += 1;
        }

        // 5. Experiment subgraph. Failed parents poison their children so
        //    nothing is written without a live owner.
        let mut dead_experiments: HashSet<Uuid> = HashSet::new();
        let mut dead_formulations: HashSet<Uuid> = HashSet::new();
        let mut dead_components: HashSet<Uuid> = HashSet::new();

        for experiment in &batch.experiments {
            match state.create_experiment(experiment.clone()) {
                Ok(_) => outcome.experiments_created += 1,
                Err(err) => {
                    dead_experiments.insert(experiment.id);
                    outcome.dropped.push(DroppedWrite {
                        record: format!("experiment '{}'", experiment.local_id),
                        reason: SkipReason::from_error(&err)
                            .unwrap_or(SkipReason::DuplicateLabel),
                        detail: err.to_string(),
                    });
                }
            }
        }

        for formulation in &batch.formulations {
            if dead_experiments.contains(&formulation.experiment_id) {
                dead_formulations.insert(formulation.id);
                outcome.dropped.push(DroppedWrite {
                    record: format!("formulation '{}'", formulation.label),
                    reason: SkipReason::ReferentialGap,
                    detail: format!(
                        "unresolved reference: experiment {}",
                        formulation.experiment_id
                    ),
                });
                continue;
            }
            let key = (formulation.experiment_id, formulation.label.clone());
            if state.formulation_by_label.contains_key(&key) {
                dead_formulations.insert(formulation.id);
                outcome.dropped.push(DroppedWrite {
                    record: format!("formulation '{}'", formulation.label),
                    reason: SkipReason::DuplicateLabel,
                    detail: ReconcileError::DuplicateLabel {
                        label: formulation.label.clone(),
                        scope: format!("experiment {}", formulation.experiment_id),
                    }
                    .to_string(),
                });
                continue;
            }
            state.formulation_by_label.insert(key, formulation.id);
            state
                .formulations
                .insert(formulation.id, formulation.clone());
            outcome.formulations_created += 1;
        }

        for component in &batch.components {
            if dead_formulations.contains(&component.formulation_id) {
                dead_components.insert(component.id);
                outcome.dropped.push(DroppedWrite {
                    record: format!("component (formulation {})", component.formulation_id),
                    reason: SkipReason::ReferentialGap,
                    detail: format!(
                        "unresolved reference: formulation {}",
                        component.formulation_id
                    ),
                });
                continue;
            }
            let mut component = component.clone();
            if let Some(alias_id) = component.alias_id {
                if conflicted_aliases.contains(&alias_id) {
                    dead_components.insert(component.id);
                    outcome.dropped.push(DroppedWrite {
                        record: format!("component (formulation {})", component.formulation_id),
                        reason: SkipReason::AliasConflict,
                        detail: "alias binding conflicted during commit".to_string(),
                    });
                    continue;
                }
                component.alias_id = Some(
                    outcome
                        .alias_remap
                        .get(&alias_id)
                        .copied()
                        .unwrap_or(alias_id),
                );
            }
            if let Some(chemical_id) = component.chemical_id {
                component.chemical_id = Some(outcome.surviving_chemical(chemical_id));
            }
            if let Err(err) = FormulationComponent::check_role_constraint(
                component.role,
                component.chemical_id,
            ) {
                dead_components.insert(component.id);
                outcome.dropped.push(DroppedWrite {
                    record: format!("component (formulation {})", component.formulation_id),
                    reason: SkipReason::from_error(&err)
                        .unwrap_or(SkipReason::RoleConstraintViolation),
                    detail: err.to_string(),
                });
                continue;
            }
            state
                .components_by_formulation
                .entry(component.formulation_id)
                .or_default()
                .push(component.id);
            state.components.insert(component.id, component);
            outcome.components_created += 1;
        }

        // 6. Dependent property values with provenance.
        for write in &batch.dependent_writes {
            let target_dead = match write.target {
                DependentTarget::Formulation(id) => dead_formulations.contains(&id),
                DependentTarget::Component(id) => dead_components.contains(&id),
            };
            if target_dead {
                outcome.dropped.push(DroppedWrite {
                    record: write.record.clone(),
                    reason: SkipReason::ReferentialGap,
                    detail: format!("unresolved reference: dependent target {:?}", write.target),
                });
                continue;
            }
            let header = match state.upsert_dependent_property(write.target, write.property_type) {
                Ok(header) => header,
                Err(err) => {
                    outcome.dropped.push(DroppedWrite {
                        record: write.record.clone(),
                        reason: SkipReason::from_error(&err)
                            .unwrap_or(SkipReason::ReferentialGap),
                        detail: err.to_string(),
                    });
                    continue;
                }
            };
            let row = state.add_dependent_value(header.id, &write.value, write.unit.as_deref())?;
            state.attach_dependent_provenance(
                row.id,
                &batch.document_id,
                Some(&write.quote),
                batch.link.as_deref(),
            )?;
            outcome.dependent_values_written += 1;
        }

        Ok(outcome)
    }
}
