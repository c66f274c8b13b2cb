//! Chemical identity types: canonical identities, aliases, roles, and the
//! fixed property-type vocabulary.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ReconcileError, Result};

/// 14 + 10 + 1 upper-case letter blocks separated by single hyphens.
static STRUCTURAL_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{14}-[A-Z]{10}-[A-Z]$").expect("valid pattern"));

/// A standardized structural key: the machine-checkable chemical identifier
/// used as the strong lookup key for identity resolution.
///
/// 27 characters, three segments (e.g. `BSYNRYMUTXBXSQ-UHFFFAOYSA-N`).
/// Normalized to upper case on parse; globally unique across identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuralKey(String);

impl StructuralKey {
    /// Parse and normalize a candidate key.
    ///
    /// Pattern validation is a hard precondition for using the key as an
    /// identity lookup, so this is the only constructor.
    pub fn parse(key: &str) -> Result<Self> {
        let normalized = key.trim().to_ascii_uppercase();
        if STRUCTURAL_KEY_PATTERN.is_match(&normalized) {
            Ok(StructuralKey(normalized))
        } else {
            Err(ReconcileError::InvalidStructuralKey {
                key: key.to_string(),
            })
        }
    }

    /// Whether a candidate string is a well-formed key.
    pub fn is_valid(key: &str) -> bool {
        STRUCTURAL_KEY_PATTERN.is_match(key.trim().to_ascii_uppercase().as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StructuralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role classification of a chemical within a formulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChemicalRole {
    /// Cryoprotective agent proper.
    Cpa,
    /// Supporting additive.
    Adjuvant,
    /// Carrier medium; never bound to a chemical identity.
    Carrier,
}

impl ChemicalRole {
    /// Case-normalized parse. Source material is inconsistent about casing,
    /// so any casing of the three role names is accepted.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CPA" => Some(ChemicalRole::Cpa),
            "ADJUVANT" => Some(ChemicalRole::Adjuvant),
            "CARRIER" => Some(ChemicalRole::Carrier),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChemicalRole::Cpa => "CPA",
            ChemicalRole::Adjuvant => "ADJUVANT",
            ChemicalRole::Carrier => "CARRIER",
        }
    }

    /// Whether a component with this role must bind a chemical identity.
    pub fn requires_chemical(&self) -> bool {
        !matches!(self, ChemicalRole::Carrier)
    }
}

impl std::fmt::Display for ChemicalRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical chemical entity.
///
/// Created on first unresolved mention. The identifier is immutable; the
/// role may be revised (upgraded from a placeholder classification) but
/// never cleared. Never physically deleted while referenced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChemicalIdentity {
    pub id: Uuid,

    /// Globally unique when present.
    pub structural_key: Option<StructuralKey>,

    /// Human-preferred display name. Comparisons are case-insensitive.
    pub preferred_name: String,

    pub role: ChemicalRole,

    /// Embedding of the preferred name, used for alias similarity search.
    pub embedding: Option<Vec<f32>>,

    pub created_at: DateTime<Utc>,
}

impl ChemicalIdentity {
    pub fn new(
        structural_key: Option<StructuralKey>,
        preferred_name: impl Into<String>,
        role: ChemicalRole,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            structural_key,
            preferred_name: preferred_name.into(),
            role,
            embedding: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Case-insensitive name comparison.
    pub fn name_matches(&self, name: &str) -> bool {
        self.preferred_name.eq_ignore_ascii_case(name.trim())
    }
}

/// A surface-form name bound to exactly one chemical identity.
///
/// Alias strings are globally unique (case-insensitive) across all
/// chemicals; an alias is never reassigned without removing its old binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub id: Uuid,
    pub chemical_id: Uuid,
    pub alias: String,
    pub embedding: Vec<f32>,
    pub is_preferred: bool,
    pub created_at: DateTime<Utc>,
}

impl Alias {
    pub fn new(
        chemical_id: Uuid,
        alias: impl Into<String>,
        embedding: Vec<f32>,
        is_preferred: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            chemical_id,
            alias: alias.into(),
            embedding,
            is_preferred,
            created_at: Utc::now(),
        }
    }

    /// Normalized form used for uniqueness and exact lookup.
    pub fn canonical(name: &str) -> String {
        name.trim().to_lowercase()
    }
}

/// Intrinsic property types of a chemical agent. Fixed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyType {
    MolecularMass,
    Solubility,
    Viscosity,
    TgPrime,
    PartitionCoefficient,
    DielectricConstant,
    ThermalConductivity,
    HeatCapacity,
    ThermalExpansionCoefficient,
    CrystallizationTemperature,
    DiffusionCoefficient,
    HydrogenBondDonorsAcceptors,
    SourceOfCompound,
    GrasCertification,
    MeltingPoint,
    Hydrophobicity,
    Density,
    RefractiveIndex,
    SurfaceTension,
    Ph,
    OsmolalityOsmolarity,
    PolarSurfaceArea,
}

impl PropertyType {
    /// Allowed units for this property type, or `None` when the type is
    /// dimensionless and any unit annotation is accepted as-is.
    pub fn allowed_units(&self) -> Option<&'static [&'static str]> {
        match self {
            PropertyType::MolecularMass => Some(&["g/mol", "Da", "kDa"]),
            PropertyType::Solubility => Some(&["mg/mL", "g/100 mL", "% w/v"]),
            PropertyType::Viscosity => Some(&["mPa.s", "cP"]),
            PropertyType::TgPrime => Some(&["degC", "degK"]),
            PropertyType::PartitionCoefficient => Some(&["logP"]),
            PropertyType::DielectricConstant => None,
            PropertyType::ThermalConductivity => Some(&["W/(m.K)"]),
            PropertyType::HeatCapacity => Some(&["J/(g.K)", "J/(mol.K)"]),
            PropertyType::ThermalExpansionCoefficient => Some(&["1/K"]),
            PropertyType::CrystallizationTemperature => Some(&["degC", "degK"]),
            PropertyType::DiffusionCoefficient => Some(&["m2/s", "cm2/s"]),
            PropertyType::HydrogenBondDonorsAcceptors => Some(&["count"]),
            PropertyType::SourceOfCompound => Some(&["text"]),
            PropertyType::GrasCertification => Some(&["boolean"]),
            PropertyType::MeltingPoint => Some(&["degC", "degK"]),
            PropertyType::Hydrophobicity => Some(&["qualitative"]),
            PropertyType::Density => Some(&["g/cm3", "kg/m3"]),
            PropertyType::RefractiveIndex => None,
            PropertyType::SurfaceTension => Some(&["mN/m", "dyn/cm"]),
            PropertyType::Ph => None,
            PropertyType::OsmolalityOsmolarity => Some(&["Osmol/kg", "Osmol/L"]),
            PropertyType::PolarSurfaceArea => Some(&["A2"]),
        }
    }

    /// Validate a unit annotation against this property type.
    pub fn validate_unit(&self, unit: Option<&str>) -> Result<()> {
        let (Some(unit), Some(allowed)) = (unit, self.allowed_units()) else {
            return Ok(());
        };
        if allowed.contains(&unit) {
            Ok(())
        } else {
            Err(ReconcileError::InvalidUnit {
                unit: unit.to_string(),
                property_type: format!("{self:?}"),
            })
        }
    }
}

/// Context-specific (dependent) property types, measured for a formulation
/// as a whole or one of its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependentPropertyType {
    Toxicity,
    MembranePermeability,
    CriticalCoolingRate,
    CriticalWarmingRate,
    GlassTransitionTemperature,
    LoadingTemperature,
    LoadingDuration,
    Osmotolerance,
    DevitrificationTendency,
    ViabilityOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_key_pattern() {
        let key = StructuralKey::parse("IAZDPXIOMUYVGZ-UHFFFAOYSA-N").unwrap();
        assert_eq!(key.as_str(), "IAZDPXIOMUYVGZ-UHFFFAOYSA-N");

        // normalized to upper case
        let lower = StructuralKey::parse("iazdpxiomuyvgz-uhfffaoysa-n").unwrap();
        assert_eq!(lower, key);

        assert!(StructuralKey::parse("IAZDPXIOMUYVGZ-UHFFFAOYSA").is_err());
        assert!(StructuralKey::parse("IAZDPXIOMUYVG1-UHFFFAOYSA-N").is_err());
        assert!(StructuralKey::parse("").is_err());
    }

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(ChemicalRole::parse("cpa"), Some(ChemicalRole::Cpa));
        assert_eq!(ChemicalRole::parse("Carrier"), Some(ChemicalRole::Carrier));
        assert_eq!(ChemicalRole::parse("ADJUVANT"), Some(ChemicalRole::Adjuvant));
        assert_eq!(ChemicalRole::parse("solvent"), None);
    }

    #[test]
    fn carrier_does_not_require_chemical() {
        assert!(ChemicalRole::Cpa.requires_chemical());
        assert!(ChemicalRole::Adjuvant.requires_chemical());
        assert!(!ChemicalRole::Carrier.requires_chemical());
    }

    #[test]
    fn unit_validation() {
        assert!(PropertyType::MolecularMass
            .validate_unit(Some("g/mol"))
            .is_ok());
        assert!(PropertyType::MolecularMass.validate_unit(None).is_ok());
        assert!(matches!(
            PropertyType::MolecularMass.validate_unit(Some("liters")),
            Err(ReconcileError::InvalidUnit { .. })
        ));
        // dimensionless types accept anything
        assert!(PropertyType::Ph.validate_unit(Some("pH units")).is_ok());
    }

    #[test]
    fn name_comparison_ignores_case() {
        let chem = ChemicalIdentity::new(None, "Glycerol", ChemicalRole::Cpa);
        assert!(chem.name_matches("glycerol"));
        assert!(chem.name_matches("  GLYCEROL "));
        assert!(!chem.name_matches("glucose"));
    }
}
