//! Reconciliation orchestrator: per-document ingestion of extraction
//! output.
//!
//! One document is one atomic unit of work. The orchestrator resolves every
//! mention (read-only), stages all valid writes into a [`DocumentBatch`],
//! and hands the batch to the store for a single commit. Per-record
//! invariant violations skip the record and land in the report;
//! infrastructure failures abort the document, which is retried whole with
//! exponential backoff. Cancellation is honored before any side effect.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ReconcileError, Result};
use crate::resolver::{Resolution, Resolver};
use crate::traits::embedder::Embedder;
use crate::traits::store::FactStore;
use crate::types::batch::{DependentWrite, DocumentBatch, PropertyWrite};
use crate::types::chemical::Alias;
use crate::types::config::{ResolverConfig, RetryConfig};
use crate::types::fact::DocumentFacts;
use crate::types::graph::{DependentTarget, Experiment, Formulation, FormulationComponent};
use crate::types::report::{CreatedAlias, CreatedIdentity, ReconciliationReport, SkippedFact};
use crate::types::value::{HybridValue, ValueRecord};

/// Drives reconciliation of extraction output into the store.
pub struct Reconciler<S, E> {
    store: Arc<S>,
    resolver: Resolver<S, E>,
    retry: RetryConfig,
}

impl<S: FactStore, E: Embedder> Reconciler<S, E> {
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: ResolverConfig) -> Self {
        Self {
            resolver: Resolver::new(store.clone(), embedder, config),
            store,
            retry: RetryConfig::default(),
        }
    }

    /// Set the retry policy for transient store failures.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn resolver(&self) -> &Resolver<S, E> {
        &self.resolver
    }

    /// Reconcile one document: resolve, stage, commit, report.
    ///
    /// Invariant violations skip the offending record; only infrastructure
    /// errors (and cancellation) return `Err`. Cancellation before the
    /// commit leaves no side effects.
    pub async fn reconcile(
        &self,
        document_id: &str,
        facts: &DocumentFacts,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport> {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        info!(
            document = document_id,
            agent_facts = facts.agent_facts.len(),
            experiments = facts.experiments.len(),
            formulations = facts.formulations.len(),
            "reconciling document"
        );

        let resolution = self.resolver.resolve_document(facts).await?;
        let mut report = ReconciliationReport::new(document_id);
        let batch = self
            .stage(document_id, facts, &resolution, &mut report)
            .await?;

        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }

        let outcome = self.store.commit(batch).await?;

        for id in &outcome.created_chemicals {
            if let Some(chemical) = resolution.planned_chemical(*id) {
                report.created_identities.push(CreatedIdentity {
                    id: *id,
                    preferred_name: chemical.preferred_name.clone(),
                    structural_key: chemical.structural_key.clone(),
                });
            }
        }
        for id in &outcome.created_aliases {
            if let Some(alias) = resolution.planned_alias(*id) {
                report.created_aliases.push(CreatedAlias {
                    chemical_id: outcome.surviving_chemical(alias.chemical_id),
                    alias: alias.alias.clone(),
                    heuristic: resolution.heuristic_aliases.contains(id),
                });
            }
        }
        report.property_values_written = outcome.property_values_written;
        report.experiments_created = outcome.experiments_created;
        report.formulations_created = outcome.formulations_created;
        report.components_created = outcome.components_created;
        report.dependent_values_written = outcome.dependent_values_written;
        for dropped in outcome.dropped {
            report.skipped.push(SkippedFact {
                record: dropped.record,
                reason: dropped.reason,
                detail: dropped.detail,
            });
        }

        info!(
            document = document_id,
            written = report.records_written(),
            skipped = report.skipped.len(),
            "document reconciled"
        );
        Ok(report)
    }

    /// Reconcile with retry on transient store failures.
    ///
    /// Every retry replays the whole document; a failed commit wrote
    /// nothing, so replay is safe. Deterministic errors are not retried.
    pub async fn reconcile_with_retry(
        &self,
        document_id: &str,
        facts: &DocumentFacts,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport> {
        let mut attempt = 1;
        loop {
            match self.reconcile(document_id, facts, cancel).await {
                Ok(report) => return Ok(report),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        document = document_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ReconcileError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Stage all valid writes into a batch, skipping invalid records into
    /// the report. Read-only with respect to the store.
    async fn stage(
        &self,
        document_id: &str,
        facts: &DocumentFacts,
        resolution: &Resolution,
        report: &mut ReconciliationReport,
    ) -> Result<DocumentBatch> {
        let mut batch = DocumentBatch::new(document_id, facts.link.clone());
        batch.new_chemicals = resolution.new_chemicals.clone();
        batch.new_aliases = resolution.new_aliases.clone();

        for (i, fact) in facts.agent_facts.iter().enumerate() {
            let record = format!(
                "agent fact #{i}: {} {:?}",
                fact.mention.name, fact.property_type
            );
            if let Some(err) = resolution.failure(&fact.mention.name) {
                report.skip(record, err);
                continue;
            }
            let Some(resolved) = resolution.lookup(&fact.mention.name) else {
                report.skip(
                    record,
                    &ReconcileError::ReferentialGap {
                        reference: format!("mention '{}'", fact.mention.name),
                    },
                );
                continue;
            };
            let value = match HybridValue::from_json(&fact.value) {
                Ok(value) => value,
                Err(err) => {
                    report.skip(record, &err);
                    continue;
                }
            };
            if let Err(err) = fact.property_type.validate_unit(fact.unit.as_deref()) {
                report.skip(record, &err);
                continue;
            }
            batch.property_writes.push(PropertyWrite {
                chemical_id: resolved.chemical_id,
                property_type: fact.property_type,
                value,
                unit: fact.unit.clone(),
                quote: fact.quote.clone(),
                record,
            });
        }

        // local_id -> planned experiment id, for formulation references
        let mut experiment_ids: HashMap<String, Uuid> = HashMap::new();
        for fact in &facts.experiments {
            let record = format!("experiment '{}'", fact.local_id);
            let duplicate_in_batch = experiment_ids.contains_key(&fact.local_id);
            let duplicate_in_store = self
                .store
                .find_experiment(document_id, &fact.local_id)
                .await?
                .is_some();
            if duplicate_in_batch || duplicate_in_store {
                report.skip(
                    record,
                    &ReconcileError::DuplicateLabel {
                        label: fact.local_id.clone(),
                        scope: format!("document {document_id}"),
                    },
                );
                continue;
            }
            let experiment = Experiment {
                id: Uuid::new_v4(),
                document_id: document_id.to_string(),
                local_id: fact.local_id.clone(),
                performed_in_this_paper: fact.performed_in_this_paper,
                label: fact.label.clone(),
                method: fact.method.clone(),
                biological_context: fact.biological_context.clone(),
                quote: fact.quote.clone(),
            };
            experiment_ids.insert(fact.local_id.clone(), experiment.id);
            batch.experiments.push(experiment);
        }

        let mut formulation_labels: HashSet<(Uuid, String)> = HashSet::new();
        for fact in &facts.formulations {
            let record = format!(
                "formulation '{}' (experiment '{}')",
                fact.label, fact.experiment_local_id
            );
            let Some(&experiment_id) = experiment_ids.get(&fact.experiment_local_id) else {
                report.skip(
                    record,
                    &ReconcileError::ReferentialGap {
                        reference: format!("experiment '{}'", fact.experiment_local_id),
                    },
                );
                continue;
            };
            if !formulation_labels.insert((experiment_id, fact.label.clone())) {
                report.skip(
                    record,
                    &ReconcileError::DuplicateLabel {
                        label: fact.label.clone(),
                        scope: format!("experiment '{}'", fact.experiment_local_id),
                    },
                );
                continue;
            }
            let formulation_id = Uuid::new_v4();
            batch.formulations.push(Formulation {
                id: formulation_id,
                experiment_id,
                label: fact.label.clone(),
                quote: fact.quote.clone(),
            });

            // canonical component label -> planned component id, for
            // dependent property targeting
            let mut component_ids: HashMap<String, Uuid> = HashMap::new();
            for component in &fact.components {
                let record =
                    format!("component '{}' in formulation '{}'", component.label, fact.label);
                let (chemical_id, alias_id) = if component.role.requires_chemical() {
                    if let Some(err) = resolution.failure(&component.label) {
                        report.skip(record, err);
                        continue;
                    }
                    match resolution.lookup(&component.label) {
                        Some(resolved) => (Some(resolved.chemical_id), resolved.planned_alias),
                        None => {
                            report.skip(
                                record,
                                &ReconcileError::ReferentialGap {
                                    reference: format!("mention '{}'", component.label),
                                },
                            );
                            continue;
                        }
                    }
                } else {
                    // A carrier claiming a chemical identity is the same
                    // violation as a CPA without one.
                    if component.structural_key.is_some() {
                        report.skip(
                            record,
                            &ReconcileError::RoleConstraintViolation {
                                role: component.role.to_string(),
                                bound: true,
                            },
                        );
                        continue;
                    }
                    (None, None)
                };
                if let Err(err) =
                    FormulationComponent::check_role_constraint(component.role, chemical_id)
                {
                    report.skip(record, &err);
                    continue;
                }
                let amount = match &component.amount {
                    Some(raw) => match HybridValue::from_json(raw) {
                        Ok(value) => Some(value),
                        Err(err) => {
                            report.skip(record, &err);
                            continue;
                        }
                    },
                    None => None,
                };
                let planned = FormulationComponent {
                    id: Uuid::new_v4(),
                    formulation_id,
                    role: component.role,
                    chemical_id,
                    alias_id,
                    amount: amount.as_ref().map(ValueRecord::encode),
                    unit: component.unit.clone(),
                    quote: component.quote.clone(),
                };
                component_ids.insert(Alias::canonical(&component.label), planned.id);
                batch.components.push(planned);
            }

            for (i, dependent) in fact.dependent_properties.iter().enumerate() {
                let record = format!(
                    "dependent fact #{i}: {:?} on formulation '{}'",
                    dependent.property_type, fact.label
                );
                let target = match (dependent.whole_formulation, dependent.component_label.as_deref())
                {
                    (true, None) => DependentTarget::Formulation(formulation_id),
                    (false, Some(label)) => {
                        match component_ids.get(&Alias::canonical(label)) {
                            Some(&component_id) => DependentTarget::Component(component_id),
                            None => {
                                report.skip(
                                    record,
                                    &ReconcileError::ReferentialGap {
                                        reference: format!("component '{label}'"),
                                    },
                                );
                                continue;
                            }
                        }
                    }
                    _ => {
                        report.skip(record, &ReconcileError::AmbiguousTarget);
                        continue;
                    }
                };
                let value = match HybridValue::from_json(&dependent.value) {
                    Ok(value) => value,
                    Err(err) => {
                        report.skip(record, &err);
                        continue;
                    }
                };
                batch.dependent_writes.push(DependentWrite {
                    target,
                    property_type: dependent.property_type,
                    value,
                    unit: dependent.unit.clone(),
                    quote: dependent.quote.clone(),
                    record,
                });
            }
        }

        Ok(batch)
    }
}
