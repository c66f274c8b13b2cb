//! Reconciliation & Storage Engine for Extracted Chemical-Agent Facts
//!
//! Consumes per-document fact batches produced by LLM extraction passes
//! over scientific literature and reconciles them into a canonical store:
//! chemical identities, their aliases, intrinsic property observations,
//! and the experiment / formulation / component graph with its
//! context-dependent measurements.
//!
//! # Design Philosophy
//!
//! **"Never lose an observation, never trust one either"**
//!
//! - Values are stored exactly as observed: point, range, raw text, or
//!   structured payload, one representation per row
//! - Distinct observations coexist; superseding information is a new row,
//!   never an edit
//! - Identity resolution runs strongest-signal-first: structural key,
//!   exact alias, then thresholded embedding similarity
//! - One document is one atomic commit; invalid records are skipped and
//!   reported, never silently dropped
//! - Every stored value carries provenance back to its source quote
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reconciliation::{MemoryStore, Reconciler, ResolverConfig};
//! use reconciliation::testing::MockEmbedder;
//! use tokio_util::sync::CancellationToken;
//!
//! let store = Arc::new(MemoryStore::new());
//! let embedder = Arc::new(MockEmbedder::new(1536));
//! let reconciler = Reconciler::new(store, embedder, ResolverConfig::default());
//!
//! let facts = serde_json::from_str(extraction_output)?;
//! let report = reconciler
//!     .reconcile_with_retry("10.1000/xyz", &facts, &CancellationToken::new())
//!     .await?;
//! println!("wrote {}, skipped {}", report.records_written(), report.skipped.len());
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (FactStore, Embedder)
//! - [`types`] - Domain types: hybrid values, identities, graph records,
//!   input facts, reports
//! - [`resolver`] - Identity resolution cascade
//! - [`orchestrator`] - Per-document reconciliation with retry and
//!   cancellation
//! - [`stores`] - Storage implementations (MemoryStore)
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod orchestrator;
pub mod resolver;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{ReconcileError, Result};
pub use orchestrator::Reconciler;
pub use resolver::{Resolution, ResolutionMethod, ResolvedMention, Resolver};
pub use stores::MemoryStore;
pub use traits::{
    embedder::Embedder,
    store::{
        cosine_distance, AliasRegistry, BatchCommit, ChemicalStore, FactStore, FormulationStore,
        PropertyStore,
    },
};
pub use types::{
    batch::{CommitOutcome, DocumentBatch, DroppedWrite},
    chemical::{
        Alias, ChemicalIdentity, ChemicalRole, DependentPropertyType, PropertyType, StructuralKey,
    },
    config::{ResolverConfig, RetryConfig},
    fact::{
        AgentFact, ComponentFact, DependentPropertyFact, DocumentFacts, ExperimentFact,
        FormulationFact, Mention,
    },
    graph::{
        DependentProperty, DependentPropertyValue, DependentTarget, Experiment, Formulation,
        FormulationComponent, PropertyHeader, PropertyValue, Provenance,
    },
    report::{CreatedAlias, CreatedIdentity, ReconciliationReport, SkipReason, SkippedFact},
    value::{HybridValue, ValueKind, ValueRecord},
};
