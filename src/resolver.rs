//! Identity resolution: mapping surface-form mentions onto canonical
//! chemical identities.
//!
//! Resolution runs strongest-signal-first:
//! 1. structural key lookup (exact, machine-checkable)
//! 2. exact alias lookup (case-insensitive)
//! 3. nearest-neighbor alias match in embedding space, accepted only below
//!    the configured distance threshold
//! 4. plan a new identity
//!
//! Resolution itself is read-only. Planned identities and aliases are
//! returned in the [`Resolution`] and created by the store's batch commit,
//! which re-validates uniqueness inside its critical section. Heuristic
//! (nearest-neighbor) binds are logged for audit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ReconcileError, Result};
use crate::traits::embedder::Embedder;
use crate::traits::store::{cosine_distance, FactStore};
use crate::types::chemical::{Alias, ChemicalIdentity, ChemicalRole, StructuralKey};
use crate::types::config::ResolverConfig;
use crate::types::fact::{DocumentFacts, Mention};

/// How a mention was resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolutionMethod {
    /// Structural key matched an existing identity.
    StructuralKey,
    /// Exact (case-insensitive) alias hit.
    ExactAlias,
    /// Nearest-neighbor alias match within the distance threshold.
    NearestNeighbor { distance: f32 },
    /// No match; a new identity is planned.
    Created,
}

impl ResolutionMethod {
    /// Whether this decision rests on similarity rather than an exact key.
    pub fn is_heuristic(&self) -> bool {
        matches!(self, ResolutionMethod::NearestNeighbor { .. })
    }
}

/// The resolution decision for one mention.
#[derive(Debug, Clone)]
pub struct ResolvedMention {
    /// Existing chemical id, or a planned id when `method` is `Created`.
    pub chemical_id: Uuid,
    /// Planned alias id when the mention's name needs a new binding.
    pub planned_alias: Option<Uuid>,
    pub method: ResolutionMethod,
}

/// All resolution decisions for one document, keyed by canonical mention
/// name.
#[derive(Debug, Default)]
pub struct Resolution {
    resolved: HashMap<String, ResolvedMention>,
    /// Mentions that violated a per-record invariant. Facts referencing
    /// them are skipped, not the whole document.
    failed: HashMap<String, ReconcileError>,

    /// Identities to create at commit.
    pub new_chemicals: Vec<ChemicalIdentity>,
    /// Aliases to bind at commit.
    pub new_aliases: Vec<Alias>,
    /// Planned alias ids that came from nearest-neighbor matching.
    pub heuristic_aliases: HashSet<Uuid>,
}

impl Resolution {
    /// The decision for a mention name, if it resolved.
    pub fn lookup(&self, name: &str) -> Option<&ResolvedMention> {
        self.resolved.get(&Alias::canonical(name))
    }

    /// The per-record error for a mention name, if resolution rejected it.
    pub fn failure(&self, name: &str) -> Option<&ReconcileError> {
        self.failed.get(&Alias::canonical(name))
    }

    /// The planned identity with this id, if any.
    pub fn planned_chemical(&self, id: Uuid) -> Option<&ChemicalIdentity> {
        self.new_chemicals.iter().find(|c| c.id == id)
    }

    /// The planned alias with this id, if any.
    pub fn planned_alias(&self, id: Uuid) -> Option<&Alias> {
        self.new_aliases.iter().find(|a| a.id == id)
    }
}

/// Resolves mentions against the store, planning identity and alias
/// creation for the batch commit.
pub struct Resolver<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: ResolverConfig,
}

impl<S: FactStore, E: Embedder> Resolver<S, E> {
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: ResolverConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve every distinct mention in a document.
    ///
    /// Per-record invariant violations land in [`Resolution::failure`];
    /// only infrastructure errors fail the call.
    pub async fn resolve_document(&self, facts: &DocumentFacts) -> Result<Resolution> {
        let mut resolution = Resolution::default();
        for mention in facts.mentions() {
            self.resolve_mention(&mention, &mut resolution).await?;
        }
        Ok(resolution)
    }

    /// Resolve a single mention, recording the decision in `resolution`.
    pub async fn resolve_mention(
        &self,
        mention: &Mention,
        resolution: &mut Resolution,
    ) -> Result<()> {
        let canonical = Alias::canonical(&mention.name);
        if resolution.resolved.contains_key(&canonical)
            || resolution.failed.contains_key(&canonical)
        {
            return Ok(());
        }
        if canonical.is_empty() {
            resolution.failed.insert(
                canonical,
                ReconcileError::MalformedValue {
                    reason: "empty mention name".to_string(),
                },
            );
            return Ok(());
        }

        let key = match mention.structural_key.as_deref() {
            Some(raw) => match StructuralKey::parse(raw) {
                Ok(key) => Some(key),
                Err(err) => {
                    warn!(name = %mention.name, key = raw, "malformed structural key");
                    resolution.failed.insert(canonical, err);
                    return Ok(());
                }
            },
            None => None,
        };

        let embedding = self.embed(&canonical).await?;
        let decision = self
            .decide(mention, key, embedding, resolution)
            .await?;
        match decision {
            Ok(resolved) => {
                resolution.resolved.insert(canonical, resolved);
            }
            Err(err) => {
                resolution.failed.insert(canonical, err);
            }
        }
        Ok(())
    }

    /// The cascade proper. The outer `Result` is infrastructure, the inner
    /// one the per-record verdict.
    async fn decide(
        &self,
        mention: &Mention,
        key: Option<StructuralKey>,
        embedding: Vec<f32>,
        resolution: &mut Resolution,
    ) -> Result<std::result::Result<ResolvedMention, ReconcileError>> {
        // 1. Structural key: the strongest signal wins outright.
        if let Some(key) = &key {
            if let Some(existing) = self.store.find_by_structural_key(key).await? {
                debug!(name = %mention.name, key = %key, chemical = %existing.id, "resolved by structural key");
                let planned_alias = match self
                    .plan_alias_if_unbound(existing.id, key, mention, &embedding, resolution)
                    .await?
                {
                    Ok(planned) => planned,
                    Err(err) => return Ok(Err(err)),
                };
                return Ok(Ok(ResolvedMention {
                    chemical_id: existing.id,
                    planned_alias,
                    method: ResolutionMethod::StructuralKey,
                }));
            }
        }

        // 2. Exact alias.
        if let Some(alias) = self.store.find_exact(&mention.name).await? {
            if let Some(key) = &key {
                // The name is already bound, but the mention carries a key
                // the binding's owner does not match. Trust neither.
                let owner = self
                    .store
                    .get_chemical(alias.chemical_id)
                    .await?
                    .ok_or(ReconcileError::ChemicalNotFound {
                        id: alias.chemical_id,
                    })?;
                if owner.structural_key.as_ref().is_some_and(|k| k != key) {
                    return Ok(Err(ReconcileError::AmbiguousAlias {
                        alias: mention.name.clone(),
                        bound_to: alias.chemical_id,
                        resolved: key.to_string(),
                    }));
                }
            }
            debug!(name = %mention.name, chemical = %alias.chemical_id, "resolved by exact alias");
            return Ok(Ok(ResolvedMention {
                chemical_id: alias.chemical_id,
                planned_alias: None,
                method: ResolutionMethod::ExactAlias,
            }));
        }

        // 3. Nearest neighbor, gated by the distance threshold. Aliases
        //    planned earlier in this batch compete too, so two unseen
        //    synonyms in one document converge on one planned identity.
        let mut best: Option<(Uuid, String, f32)> = None;
        for (neighbor, distance) in self.store.find_nearest(&embedding, 5).await? {
            if best.as_ref().is_none_or(|(_, _, d)| distance < *d) {
                best = Some((neighbor.chemical_id, neighbor.alias, distance));
            }
        }
        for planned in &resolution.new_aliases {
            let distance = cosine_distance(&embedding, &planned.embedding);
            if best.as_ref().is_none_or(|(_, _, d)| distance < *d) {
                best = Some((planned.chemical_id, planned.alias.clone(), distance));
            }
        }
        if let Some((chemical_id, matched, distance)) = best {
            if distance <= self.config.similarity_threshold && key.is_none() {
                info!(
                    name = %mention.name,
                    matched = %matched,
                    chemical = %chemical_id,
                    distance,
                    threshold = self.config.similarity_threshold,
                    "heuristic alias bind"
                );
                let alias = Alias::new(chemical_id, &mention.name, embedding, false);
                let alias_id = alias.id;
                resolution.new_aliases.push(alias);
                resolution.heuristic_aliases.insert(alias_id);
                return Ok(Ok(ResolvedMention {
                    chemical_id,
                    planned_alias: Some(alias_id),
                    method: ResolutionMethod::NearestNeighbor { distance },
                }));
            }
            debug!(
                name = %mention.name,
                nearest = %matched,
                distance,
                "nearest alias above threshold"
            );
        }

        // 4. New identity, preferred alias for its own name.
        let role = mention.role_hint.unwrap_or(ChemicalRole::Cpa);
        let chemical = ChemicalIdentity::new(key, &mention.name, role)
            .with_embedding(embedding.clone());
        let chemical_id = chemical.id;
        let alias = Alias::new(chemical_id, &mention.name, embedding, true);
        let alias_id = alias.id;
        debug!(name = %mention.name, chemical = %chemical_id, "planning new identity");
        resolution.new_chemicals.push(chemical);
        resolution.new_aliases.push(alias);
        Ok(Ok(ResolvedMention {
            chemical_id,
            planned_alias: Some(alias_id),
            method: ResolutionMethod::Created,
        }))
    }

    /// After a structural-key match, make sure the mention's name is bound
    /// to the matched identity. A name already bound to a different identity
    /// is a conflict the key cannot override: the record fails with
    /// `AmbiguousAlias` so the contradiction reaches manual review instead
    /// of committing facts under either identity.
    async fn plan_alias_if_unbound(
        &self,
        chemical_id: Uuid,
        key: &StructuralKey,
        mention: &Mention,
        embedding: &[f32],
        resolution: &mut Resolution,
    ) -> Result<std::result::Result<Option<Uuid>, ReconcileError>> {
        match self.store.find_exact(&mention.name).await? {
            Some(existing) if existing.chemical_id == chemical_id => Ok(Ok(None)),
            Some(existing) => {
                warn!(
                    name = %mention.name,
                    bound_to = %existing.chemical_id,
                    key = %key,
                    "name bound to a different identity than its structural key"
                );
                Ok(Err(ReconcileError::AmbiguousAlias {
                    alias: mention.name.clone(),
                    bound_to: existing.chemical_id,
                    resolved: key.to_string(),
                }))
            }
            None => {
                let alias = Alias::new(chemical_id, &mention.name, embedding.to_vec(), false);
                let alias_id = alias.id;
                resolution.new_aliases.push(alias);
                Ok(Ok(Some(alias_id)))
            }
        }
    }

    async fn embed(&self, canonical: &str) -> Result<Vec<f32>> {
        let embedding = self.embedder.embed(canonical).await?;
        if embedding.len() != self.config.embedding_dim {
            return Err(ReconcileError::Embedding(format!(
                "embedder returned {} dimensions, configured for {}",
                embedding.len(),
                self.config.embedding_dim
            )));
        }
        Ok(embedding)
    }
}
