//! End-to-end reconciliation tests: documents in, canonical graph out.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use reconciliation::testing::MockEmbedder;
use reconciliation::{
    AgentFact, AliasRegistry, ChemicalRole, ChemicalStore, ComponentFact, DependentPropertyFact,
    DependentPropertyType, DocumentFacts, ExperimentFact, FormulationFact, FormulationStore,
    MemoryStore, Mention, PropertyStore, PropertyType, Reconciler, ResolverConfig, SkipReason,
    ValueKind,
};

const DIM: usize = 8;

fn unit(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

fn engine(
    embedder: MockEmbedder,
    threshold: f32,
) -> (Arc<MemoryStore>, Reconciler<MemoryStore, MockEmbedder>) {
    let store = Arc::new(MemoryStore::new());
    let config = ResolverConfig::new()
        .with_embedding_dim(DIM)
        .with_similarity_threshold(threshold);
    let reconciler = Reconciler::new(store.clone(), Arc::new(embedder), config);
    (store, reconciler)
}

fn agent_fact(name: &str, property_type: PropertyType, value: serde_json::Value) -> AgentFact {
    AgentFact {
        mention: Mention::named(name),
        property_type,
        value,
        unit: None,
        quote: format!("{name} observation"),
    }
}

#[tokio::test]
async fn synonyms_converge_on_one_identity() {
    let embedder = MockEmbedder::new(DIM)
        .with_embedding("dmso", unit(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]))
        .with_embedding(
            "dimethyl sulfoxide",
            unit(vec![0.99, 0.14, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        );
    let (store, reconciler) = engine(embedder, 0.08);
    let cancel = CancellationToken::new();

    let doc_a = DocumentFacts {
        agent_facts: vec![AgentFact {
            mention: Mention::named("DMSO"),
            property_type: PropertyType::Viscosity,
            value: json!(1.99),
            unit: Some("mPa.s".to_string()),
            quote: "viscosity of 1.99 mPa.s".to_string(),
        }],
        ..Default::default()
    };
    let report_a = reconciler.reconcile("doc-a", &doc_a, &cancel).await.unwrap();
    assert_eq!(report_a.created_identities.len(), 1);
    let dmso_id = report_a.created_identities[0].id;

    // second document uses the long synonym, close in embedding space
    let doc_b = DocumentFacts {
        agent_facts: vec![AgentFact {
            mention: Mention::named("Dimethyl sulfoxide"),
            property_type: PropertyType::Density,
            value: json!(1.1),
            unit: Some("g/cm3".to_string()),
            quote: "density 1.1 g/cm3".to_string(),
        }],
        ..Default::default()
    };
    let report_b = reconciler.reconcile("doc-b", &doc_b, &cancel).await.unwrap();

    assert!(report_b.created_identities.is_empty());
    assert_eq!(report_b.created_aliases.len(), 1);
    assert!(report_b.created_aliases[0].heuristic);
    assert_eq!(report_b.created_aliases[0].chemical_id, dmso_id);

    assert_eq!(store.chemical_count().await.unwrap(), 1);
    assert_eq!(store.alias_count(), 2);
    // both observations attach to the same identity
    let viscosity = store
        .values_for(dmso_id, PropertyType::Viscosity)
        .await
        .unwrap();
    let density = store.values_for(dmso_id, PropertyType::Density).await.unwrap();
    assert_eq!(viscosity.len(), 1);
    assert_eq!(density.len(), 1);
}

#[tokio::test]
async fn same_document_synonyms_share_one_identity() {
    let embedder = MockEmbedder::new(DIM)
        .with_embedding("dmso", unit(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]))
        .with_embedding(
            "dimethyl sulfoxide",
            unit(vec![0.98, 0.199, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        );
    let (store, reconciler) = engine(embedder, 0.08);

    // both names are new to the store and appear in the same document
    let doc = DocumentFacts {
        agent_facts: vec![
            agent_fact("DMSO", PropertyType::Ph, json!(7.2)),
            agent_fact("Dimethyl sulfoxide", PropertyType::RefractiveIndex, json!(1.479)),
        ],
        ..Default::default()
    };
    let report = reconciler
        .reconcile("doc-1", &doc, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.created_identities.len(), 1);
    assert_eq!(report.created_aliases.len(), 2);
    assert_eq!(store.chemical_count().await.unwrap(), 1);
    assert_eq!(store.alias_count(), 2);
    assert_eq!(report.property_values_written, 2);
}

#[tokio::test]
async fn name_bound_elsewhere_than_its_key_is_skipped_for_review() {
    let embedder = MockEmbedder::new(DIM);
    let (store, reconciler) = engine(MockEmbedder::new(DIM), 0.38);

    // "glycerin" already belongs to one identity, the key to another
    let glycerol = store
        .create_chemical_if_absent(reconciliation::ChemicalIdentity::new(
            None,
            "Glycerol",
            ChemicalRole::Cpa,
        ))
        .await
        .unwrap();
    store
        .bind(
            glycerol.id,
            "glycerin",
            &embedder.embedding_for("glycerin"),
            false,
        )
        .await
        .unwrap();
    let dmso = store
        .create_chemical_if_absent(reconciliation::ChemicalIdentity::new(
            Some(reconciliation::StructuralKey::parse("IAZDPXIOMUYVGZ-UHFFFAOYSA-N").unwrap()),
            "DMSO",
            ChemicalRole::Cpa,
        ))
        .await
        .unwrap();

    let doc = DocumentFacts {
        agent_facts: vec![AgentFact {
            mention: Mention::named("glycerin")
                .with_structural_key("IAZDPXIOMUYVGZ-UHFFFAOYSA-N"),
            property_type: PropertyType::Ph,
            value: json!({"value_type": "point", "value": 7.2}),
            unit: None,
            quote: "pH 7.2".to_string(),
        }],
        ..Default::default()
    };
    let report = reconciler
        .reconcile("doc-1", &doc, &CancellationToken::new())
        .await
        .unwrap();

    // the contradiction is reported, never committed under either identity
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, SkipReason::AmbiguousAlias);
    assert_eq!(report.property_values_written, 0);
    let under_dmso = store.values_for(dmso.id, PropertyType::Ph).await.unwrap();
    assert!(under_dmso.is_empty());
    let under_glycerol = store
        .values_for(glycerol.id, PropertyType::Ph)
        .await
        .unwrap();
    assert!(under_glycerol.is_empty());
}

#[tokio::test]
async fn distant_names_stay_separate_identities() {
    let embedder = MockEmbedder::new(DIM)
        .with_embedding("dmso", unit(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]))
        .with_embedding(
            "trehalose",
            unit(vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        );
    let (store, reconciler) = engine(embedder, 0.38);
    let cancel = CancellationToken::new();

    let doc = DocumentFacts {
        agent_facts: vec![
            agent_fact("DMSO", PropertyType::Ph, json!(7.2)),
            agent_fact("trehalose", PropertyType::Ph, json!(6.8)),
        ],
        ..Default::default()
    };
    let report = reconciler.reconcile("doc-1", &doc, &cancel).await.unwrap();

    assert_eq!(report.created_identities.len(), 2);
    assert_eq!(store.chemical_count().await.unwrap(), 2);
    assert!(report.created_aliases.iter().all(|a| !a.heuristic));
}

#[tokio::test]
async fn concurrent_documents_with_same_structural_key_converge() {
    let (store, reconciler) = engine(MockEmbedder::new(DIM), 0.05);
    let reconciler = Arc::new(reconciler);

    let make_doc = |name: &str| DocumentFacts {
        agent_facts: vec![AgentFact {
            mention: Mention::named(name)
                .with_structural_key("IAZDPXIOMUYVGZ-UHFFFAOYSA-N"),
            property_type: PropertyType::MolecularMass,
            value: json!(78.13),
            unit: Some("g/mol".to_string()),
            quote: format!("{name}, MW 78.13"),
        }],
        ..Default::default()
    };

    let tasks: Vec<_> = [("doc-a", "DMSO"), ("doc-b", "Me2SO")]
        .into_iter()
        .map(|(doc, name)| {
            let reconciler = reconciler.clone();
            let facts = make_doc(name);
            tokio::spawn(async move {
                reconciler
                    .reconcile(doc, &facts, &CancellationToken::new())
                    .await
            })
        })
        .collect();
    let reports: Vec<_> = futures::future::try_join_all(tasks)
        .await
        .unwrap()
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    // exactly one identity survives no matter who committed first
    assert_eq!(store.chemical_count().await.unwrap(), 1);
    let created: usize = reports.iter().map(|r| r.created_identities.len()).sum();
    assert_eq!(created, 1);
    // both property observations landed on it
    let id = store
        .find_exact("DMSO")
        .await
        .unwrap()
        .map(|a| a.chemical_id)
        .or(store
            .find_exact("Me2SO")
            .await
            .unwrap()
            .map(|a| a.chemical_id))
        .unwrap();
    let values = store
        .values_for(id, PropertyType::MolecularMass)
        .await
        .unwrap();
    assert_eq!(values.len(), 2);
}

#[tokio::test]
async fn malformed_value_skips_one_record_commits_the_rest() {
    let (store, reconciler) = engine(MockEmbedder::new(DIM), 0.05);

    let mut facts = vec![
        agent_fact("DMSO", PropertyType::Ph, json!(7.2)),
        agent_fact("DMSO", PropertyType::RefractiveIndex, json!(1.479)),
        agent_fact(
            "DMSO",
            PropertyType::MeltingPoint,
            json!({"value_type": "point", "value": 19.0}),
        ),
        agent_fact(
            "DMSO",
            PropertyType::Viscosity,
            json!({"value_type": "range", "min": 1.9, "max": 2.2}),
        ),
        agent_fact("DMSO", PropertyType::Hydrophobicity, json!("miscible with water")),
        agent_fact("DMSO", PropertyType::DielectricConstant, json!(46.7)),
        agent_fact("glycerol", PropertyType::Ph, json!(7.0)),
        agent_fact("glycerol", PropertyType::RefractiveIndex, json!(1.473)),
        agent_fact("glycerol", PropertyType::DielectricConstant, json!(42.5)),
    ];
    // the tenth record is malformed: null is neither number, text, nor struct
    facts.push(agent_fact("glycerol", PropertyType::MeltingPoint, json!(null)));

    let report = reconciler
        .reconcile(
            "doc-1",
            &DocumentFacts {
                agent_facts: facts,
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.property_values_written, 9);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, SkipReason::MalformedValue);
    assert!(report.skipped[0].record.contains("MeltingPoint"));
    assert_eq!(store.value_count(), 9);
}

#[tokio::test]
async fn invalid_unit_and_invalid_key_are_reported_per_record() {
    let (store, reconciler) = engine(MockEmbedder::new(DIM), 0.05);

    let facts = DocumentFacts {
        agent_facts: vec![
            AgentFact {
                mention: Mention::named("DMSO"),
                property_type: PropertyType::MolecularMass,
                value: json!(78.13),
                unit: Some("liters".to_string()),
                quote: "MW 78.13".to_string(),
            },
            AgentFact {
                mention: Mention::named("glycerol").with_structural_key("BAD-KEY"),
                property_type: PropertyType::Density,
                value: json!(1.26),
                unit: Some("g/cm3".to_string()),
                quote: "density 1.26".to_string(),
            },
        ],
        ..Default::default()
    };

    let report = reconciler
        .reconcile("doc-1", &facts, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.property_values_written, 0);
    let reasons: Vec<_> = report.skipped.iter().map(|s| s.reason.clone()).collect();
    assert!(reasons.contains(&SkipReason::InvalidUnit));
    assert!(reasons.contains(&SkipReason::InvalidStructuralKey));
    // identity for the invalid-unit mention was still created (the fact
    // failed, not the mention)
    assert_eq!(store.chemical_count().await.unwrap(), 1);
}

fn formulation_document() -> DocumentFacts {
    DocumentFacts {
        agent_facts: vec![agent_fact("DMSO", PropertyType::Ph, json!(7.2))],
        experiments: vec![ExperimentFact {
            local_id: "E1".to_string(),
            performed_in_this_paper: true,
            label: Some("rat kidney vitrification".to_string()),
            method: Some("stepwise perfusion".to_string()),
            biological_context: Some(json!({"species": "rat", "organ": "kidney"})),
            quote: "kidneys were perfused with M22".to_string(),
        }],
        formulations: vec![FormulationFact {
            experiment_local_id: "E1".to_string(),
            label: "M22".to_string(),
            components: vec![
                ComponentFact {
                    role: ChemicalRole::Cpa,
                    label: "DMSO".to_string(),
                    structural_key: Some("IAZDPXIOMUYVGZ-UHFFFAOYSA-N".to_string()),
                    amount: Some(json!(2.855)),
                    unit: Some("M".to_string()),
                    quote: "2.855 M Me2SO".to_string(),
                },
                ComponentFact {
                    role: ChemicalRole::Carrier,
                    label: "LM5".to_string(),
                    structural_key: None,
                    amount: None,
                    unit: None,
                    quote: "in LM5 carrier solution".to_string(),
                },
            ],
            dependent_properties: vec![
                DependentPropertyFact {
                    property_type: DependentPropertyType::GlassTransitionTemperature,
                    value: json!(-123.3),
                    unit: Some("degC".to_string()),
                    whole_formulation: true,
                    component_label: None,
                    quote: "Tg of -123.3 degC".to_string(),
                },
                DependentPropertyFact {
                    property_type: DependentPropertyType::Toxicity,
                    value: json!("low at 0 degC"),
                    unit: None,
                    whole_formulation: false,
                    component_label: Some("DMSO".to_string()),
                    quote: "Me2SO toxicity was low at 0 degC".to_string(),
                },
            ],
            quote: "M22 formulation".to_string(),
        }],
        link: Some("https://doi.org/10.1000/m22".to_string()),
    }
}

#[tokio::test]
async fn formulation_graph_commits_end_to_end() {
    let (store, reconciler) = engine(MockEmbedder::new(DIM), 0.05);

    let report = reconciler
        .reconcile("10.1000/m22", &formulation_document(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.has_skips(), "unexpected skips: {:?}", report.skipped);
    assert_eq!(report.experiments_created, 1);
    assert_eq!(report.formulations_created, 1);
    assert_eq!(report.components_created, 2);
    assert_eq!(report.dependent_values_written, 2);
    assert_eq!(report.property_values_written, 1);

    let experiment = store
        .find_experiment("10.1000/m22", "E1")
        .await
        .unwrap()
        .unwrap();
    assert!(experiment.performed_in_this_paper);
    assert_eq!(experiment.label.as_deref(), Some("rat kidney vitrification"));

    // provenance carries the document link
    let dmso = store.find_exact("DMSO").await.unwrap().unwrap();
    let values = store
        .values_for(dmso.chemical_id, PropertyType::Ph)
        .await
        .unwrap();
    assert_eq!(values.len(), 1);
    let (_, sources) = &values[0];
    assert_eq!(sources[0].document_id, "10.1000/m22");
    assert_eq!(sources[0].link.as_deref(), Some("https://doi.org/10.1000/m22"));
}

#[tokio::test]
async fn replaying_a_document_reports_duplicates_without_corruption() {
    let (store, reconciler) = engine(MockEmbedder::new(DIM), 0.05);
    let cancel = CancellationToken::new();
    let doc = formulation_document();

    let first = reconciler
        .reconcile("10.1000/m22", &doc, &cancel)
        .await
        .unwrap();
    assert!(!first.has_skips());

    let second = reconciler
        .reconcile("10.1000/m22", &doc, &cancel)
        .await
        .unwrap();
    // the experiment local id is already taken; everything under it skips
    assert_eq!(second.experiments_created, 0);
    assert!(second
        .skipped
        .iter()
        .any(|s| s.reason == SkipReason::DuplicateLabel));
    assert_eq!(store.experiment_count(), 1);
}

#[tokio::test]
async fn carrier_claiming_a_chemical_is_a_role_violation() {
    let (_, reconciler) = engine(MockEmbedder::new(DIM), 0.05);

    let mut doc = formulation_document();
    doc.formulations[0].components[1].structural_key =
        Some("PEDCQBHIVMGVHV-UHFFFAOYSA-N".to_string());

    let report = reconciler
        .reconcile("doc-1", &doc, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report
        .skipped
        .iter()
        .any(|s| s.reason == SkipReason::RoleConstraintViolation));
    // the rest of the formulation still committed
    assert_eq!(report.formulations_created, 1);
    assert_eq!(report.components_created, 1);
}

#[tokio::test]
async fn dependent_target_must_be_exactly_one() {
    let (_, reconciler) = engine(MockEmbedder::new(DIM), 0.05);

    let mut doc = formulation_document();
    doc.formulations[0].dependent_properties = vec![
        // both
        DependentPropertyFact {
            property_type: DependentPropertyType::Toxicity,
            value: json!("high"),
            unit: None,
            whole_formulation: true,
            component_label: Some("DMSO".to_string()),
            quote: "q".to_string(),
        },
        // neither
        DependentPropertyFact {
            property_type: DependentPropertyType::Osmotolerance,
            value: json!("poor"),
            unit: None,
            whole_formulation: false,
            component_label: None,
            quote: "q".to_string(),
        },
        // valid
        DependentPropertyFact {
            property_type: DependentPropertyType::CriticalCoolingRate,
            value: json!(0.1),
            unit: Some("degC/min".to_string()),
            whole_formulation: true,
            component_label: None,
            quote: "critical cooling rate 0.1 degC/min".to_string(),
        },
    ];

    let report = reconciler
        .reconcile("doc-1", &doc, &CancellationToken::new())
        .await
        .unwrap();

    let ambiguous = report
        .skipped
        .iter()
        .filter(|s| s.reason == SkipReason::AmbiguousTarget)
        .count();
    assert_eq!(ambiguous, 2);
    assert_eq!(report.dependent_values_written, 1);
}

#[tokio::test]
async fn unknown_experiment_reference_skips_the_formulation() {
    let (store, reconciler) = engine(MockEmbedder::new(DIM), 0.05);

    let mut doc = formulation_document();
    doc.formulations[0].experiment_local_id = "E99".to_string();

    let report = reconciler
        .reconcile("doc-1", &doc, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.formulations_created, 0);
    assert_eq!(report.components_created, 0);
    assert_eq!(report.dependent_values_written, 0);
    assert!(report
        .skipped
        .iter()
        .any(|s| s.reason == SkipReason::ReferentialGap));
    // the experiment itself and the agent fact are unaffected
    assert_eq!(report.experiments_created, 1);
    assert_eq!(report.property_values_written, 1);
    assert_eq!(store.experiment_count(), 1);
}

#[tokio::test]
async fn dependent_on_unknown_component_label_is_a_referential_gap() {
    let (_, reconciler) = engine(MockEmbedder::new(DIM), 0.05);

    let mut doc = formulation_document();
    doc.formulations[0].dependent_properties[1].component_label =
        Some("ethylene glycol".to_string());

    let report = reconciler
        .reconcile("doc-1", &doc, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.dependent_values_written, 1);
    assert!(report
        .skipped
        .iter()
        .any(|s| s.reason == SkipReason::ReferentialGap
            && s.record.contains("Toxicity")));
}

#[tokio::test]
async fn range_and_raw_values_round_trip_through_the_store() {
    let (store, reconciler) = engine(MockEmbedder::new(DIM), 0.05);

    let doc = DocumentFacts {
        agent_facts: vec![
            agent_fact(
                "DMSO",
                PropertyType::MeltingPoint,
                json!({"value_type": "range", "min": 18.4, "max": 19.0}),
            ),
            agent_fact(
                "DMSO",
                PropertyType::SourceOfCompound,
                json!("byproduct of kraft pulping"),
            ),
            agent_fact(
                "DMSO",
                PropertyType::HydrogenBondDonorsAcceptors,
                json!({"donors": 0, "acceptors": 1}),
            ),
        ],
        ..Default::default()
    };
    let report = reconciler
        .reconcile("doc-1", &doc, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!report.has_skips());

    let dmso = store.find_exact("DMSO").await.unwrap().unwrap();
    let melting = store
        .values_for(dmso.chemical_id, PropertyType::MeltingPoint)
        .await
        .unwrap();
    assert_eq!(melting[0].0.record.value_kind, ValueKind::Range);
    assert_eq!(melting[0].0.record.range_min, Some(18.4));
    assert_eq!(melting[0].0.record.range_max, Some(19.0));

    let source = store
        .values_for(dmso.chemical_id, PropertyType::SourceOfCompound)
        .await
        .unwrap();
    assert_eq!(source[0].0.record.value_kind, ValueKind::Raw);

    let bonds = store
        .values_for(dmso.chemical_id, PropertyType::HydrogenBondDonorsAcceptors)
        .await
        .unwrap();
    assert_eq!(bonds[0].0.record.value_kind, ValueKind::Struct);
}
