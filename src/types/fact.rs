//! Input contract: the per-document fact batch produced by extraction
//! passes.
//!
//! Extraction output is untrusted. Values arrive as arbitrary JSON and are
//! classified by the hybrid value codec; structural keys and units are
//! validated during reconciliation, not at deserialization, so a malformed
//! fact skips that record instead of failing the whole batch parse.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::types::chemical::{ChemicalRole, DependentPropertyType, PropertyType};

/// An agent mention as produced by an extraction pass: a surface-form name,
/// optionally a structural key, optionally a role hint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mention {
    pub name: String,
    /// Raw candidate key; validated against the 27-character pattern during
    /// resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_hint: Option<ChemicalRole>,
}

impl Mention {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            structural_key: None,
            role_hint: None,
        }
    }

    pub fn with_structural_key(mut self, key: impl Into<String>) -> Self {
        self.structural_key = Some(key.into());
        self
    }

    pub fn with_role_hint(mut self, role: ChemicalRole) -> Self {
        self.role_hint = Some(role);
        self
    }
}

/// An intrinsic property observation for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFact {
    pub mention: Mention,
    pub property_type: PropertyType,
    /// Untrusted value payload, classified by `HybridValue::from_json`.
    pub value: Json,
    #[serde(default)]
    pub unit: Option<String>,
    pub quote: String,
}

/// One experimental setup described in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentFact {
    /// Document-local identifier; formulation facts reference it.
    pub local_id: String,
    pub performed_in_this_paper: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    /// Opaque biological context blob, stored uninterpreted.
    #[serde(default)]
    pub biological_context: Option<Json>,
    pub quote: String,
}

/// One ingredient of a formulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentFact {
    pub role: ChemicalRole,
    /// Surface-form name of the ingredient.
    pub label: String,
    #[serde(default)]
    pub structural_key: Option<String>,
    /// Untrusted amount payload (point, range, or free text).
    #[serde(default)]
    pub amount: Option<Json>,
    #[serde(default)]
    pub unit: Option<String>,
    pub quote: String,
}

impl ComponentFact {
    /// The mention this component resolves through (Carrier components are
    /// not resolved; they carry no chemical binding).
    pub fn mention(&self) -> Mention {
        Mention {
            name: self.label.clone(),
            structural_key: self.structural_key.clone(),
            role_hint: Some(self.role),
        }
    }
}

/// A context-specific measurement inside a formulation fact.
///
/// Attaches to the whole formulation (`whole_formulation = true`) or to the
/// component with the given label - exactly one of the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentPropertyFact {
    pub property_type: DependentPropertyType,
    pub value: Json,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub whole_formulation: bool,
    #[serde(default)]
    pub component_label: Option<String>,
    pub quote: String,
}

/// A named mixture within one experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulationFact {
    /// Local id of the owning experiment within this document.
    pub experiment_local_id: String,
    pub label: String,
    pub components: Vec<ComponentFact>,
    #[serde(default)]
    pub dependent_properties: Vec<DependentPropertyFact>,
    pub quote: String,
}

/// Everything one extraction pass produced for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFacts {
    #[serde(default)]
    pub agent_facts: Vec<AgentFact>,
    #[serde(default)]
    pub experiments: Vec<ExperimentFact>,
    #[serde(default)]
    pub formulations: Vec<FormulationFact>,
    /// Locator for provenance records (e.g. a DOI URL).
    #[serde(default)]
    pub link: Option<String>,
}

impl DocumentFacts {
    pub fn is_empty(&self) -> bool {
        self.agent_facts.is_empty() && self.experiments.is_empty() && self.formulations.is_empty()
    }

    /// All distinct mentions in this batch that require identity
    /// resolution, in first-seen order. Carrier components are excluded:
    /// they never bind a chemical identity.
    pub fn mentions(&self) -> Vec<Mention> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut push = |m: Mention| {
            if seen.insert(crate::types::chemical::Alias::canonical(&m.name)) {
                out.push(m);
            }
        };
        for fact in &self.agent_facts {
            push(fact.mention.clone());
        }
        for formulation in &self.formulations {
            for component in &formulation.components {
                if component.role.requires_chemical() {
                    push(component.mention());
                }
            }
        }
        out
    }
}
