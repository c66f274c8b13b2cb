//! Hybrid value representation - the tagged union over fact value shapes.
//!
//! Extraction passes supply values as single numbers, ranges, free text, or
//! structured objects. [`HybridValue`] models that as an explicit sum type so
//! every consumer matches exhaustively, and [`ValueRecord`] is the flat
//! persisted shape (`value_kind` discriminant plus nullable payload columns).
//! Decoding enforces the single-slot invariant structurally: a record with
//! zero or more than one populated payload is rejected, never coerced.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{ReconcileError, Result};

/// A fact value in one of four shapes.
///
/// Exactly one shape per value, by construction. Superseding information is
/// added as a new value; values are never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_type", rename_all = "snake_case")]
pub enum HybridValue {
    /// A single numeric observation.
    Point { value: f64 },

    /// A numeric interval. `inclusive` carries the endpoint inclusivity as
    /// `(min_inclusive, max_inclusive)`; extraction output has no interval
    /// notation, so classification defaults to the closed interval.
    Range {
        min: f64,
        max: f64,
        inclusive: (bool, bool),
    },

    /// Free text the extractor could not shape further.
    Raw { text: String },

    /// An opaque structured object, stored as-is.
    Struct { fields: serde_json::Map<String, Json> },
}

impl HybridValue {
    /// Create a point value.
    pub fn point(value: f64) -> Self {
        HybridValue::Point { value }
    }

    /// Create a closed range `[min, max]`.
    pub fn range(min: f64, max: f64) -> Result<Self> {
        Self::range_with_inclusivity(min, max, (true, true))
    }

    /// Create a range with explicit endpoint inclusivity.
    pub fn range_with_inclusivity(min: f64, max: f64, inclusive: (bool, bool)) -> Result<Self> {
        if min > max {
            return Err(ReconcileError::MalformedValue {
                reason: format!("range min {min} > max {max}"),
            });
        }
        Ok(HybridValue::Range {
            min,
            max,
            inclusive,
        })
    }

    /// Create a raw text value.
    pub fn raw(text: impl Into<String>) -> Self {
        HybridValue::Raw { text: text.into() }
    }

    /// Create a structured value.
    pub fn structured(fields: serde_json::Map<String, Json>) -> Self {
        HybridValue::Struct { fields }
    }

    /// The discriminant for this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            HybridValue::Point { .. } => ValueKind::Point,
            HybridValue::Range { .. } => ValueKind::Range,
            HybridValue::Raw { .. } => ValueKind::Raw,
            HybridValue::Struct { .. } => ValueKind::Struct,
        }
    }

    /// Classify an untrusted JSON fact value.
    ///
    /// Follows the extraction schema: objects discriminated by
    /// `value_type: "point" | "range"` are numeric values, bare scalars are
    /// raw, any other object is structured. Arrays and null have no slot and
    /// are rejected.
    pub fn from_json(value: &Json) -> Result<Self> {
        match value {
            Json::Object(map) => match map.get("value_type").and_then(Json::as_str) {
                Some("point") => {
                    let v = map.get("value").and_then(Json::as_f64).ok_or_else(|| {
                        ReconcileError::MalformedValue {
                            reason: "point value missing numeric 'value'".to_string(),
                        }
                    })?;
                    Ok(HybridValue::point(v))
                }
                Some("range") => {
                    let min = map.get("min").and_then(Json::as_f64).ok_or_else(|| {
                        ReconcileError::MalformedValue {
                            reason: "range value missing numeric 'min'".to_string(),
                        }
                    })?;
                    let max = map.get("max").and_then(Json::as_f64).ok_or_else(|| {
                        ReconcileError::MalformedValue {
                            reason: "range value missing numeric 'max'".to_string(),
                        }
                    })?;
                    HybridValue::range(min, max)
                }
                _ => Ok(HybridValue::structured(map.clone())),
            },
            // Bare numbers carry no declared intent; only discriminated
            // objects are trusted as numeric.
            Json::Number(n) => Ok(HybridValue::raw(n.to_string())),
            Json::String(s) => Ok(HybridValue::raw(s.clone())),
            Json::Bool(b) => Ok(HybridValue::raw(b.to_string())),
            Json::Null | Json::Array(_) => Err(ReconcileError::MalformedValue {
                reason: format!("unsupported value shape: {value}"),
            }),
        }
    }

    /// True if a numeric observation `x` falls inside this value.
    ///
    /// Points compare exactly; ranges honor their inclusivity flags; raw and
    /// structured values never contain numbers.
    pub fn contains(&self, x: f64) -> bool {
        match self {
            HybridValue::Point { value } => *value == x,
            HybridValue::Range {
                min,
                max,
                inclusive: (lo, hi),
            } => {
                let above = if *lo { x >= *min } else { x > *min };
                let below = if *hi { x <= *max } else { x < *max };
                above && below
            }
            _ => false,
        }
    }
}

/// Discriminant persisted alongside the payload columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueKind {
    Point,
    Range,
    Raw,
    Struct,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValueKind::Point => "POINT",
            ValueKind::Range => "RANGE",
            ValueKind::Raw => "RAW",
            ValueKind::Struct => "STRUCT",
        };
        f.write_str(s)
    }
}

/// The flat persisted shape of a hybrid value.
///
/// One `value_kind` discriminant and four nullable payload slots, mirroring
/// the store's row layout. `decode` is the only way back to a
/// [`HybridValue`] and enforces the single-slot invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub value_kind: ValueKind,
    pub numeric_value: Option<f64>,
    pub range_min: Option<f64>,
    pub range_max: Option<f64>,
    pub min_inclusive: Option<bool>,
    pub max_inclusive: Option<bool>,
    pub raw_value: Option<String>,
    pub extra: Option<serde_json::Map<String, Json>>,
}

impl ValueRecord {
    /// Encode a hybrid value into its flat record. Pure transform.
    pub fn encode(value: &HybridValue) -> Self {
        let mut record = ValueRecord {
            value_kind: value.kind(),
            numeric_value: None,
            range_min: None,
            range_max: None,
            min_inclusive: None,
            max_inclusive: None,
            raw_value: None,
            extra: None,
        };
        match value {
            HybridValue::Point { value } => record.numeric_value = Some(*value),
            HybridValue::Range {
                min,
                max,
                inclusive: (lo, hi),
            } => {
                record.range_min = Some(*min);
                record.range_max = Some(*max);
                record.min_inclusive = Some(*lo);
                record.max_inclusive = Some(*hi);
            }
            HybridValue::Raw { text } => record.raw_value = Some(text.clone()),
            HybridValue::Struct { fields } => record.extra = Some(fields.clone()),
        }
        record
    }

    /// Decode the record back into a hybrid value.
    ///
    /// Fails with `MalformedValue` when zero or more than one payload slot
    /// is populated, when the populated slot disagrees with `value_kind`, or
    /// when a range has min > max.
    pub fn decode(&self) -> Result<HybridValue> {
        let has_point = self.numeric_value.is_some();
        let has_range = self.range_min.is_some() || self.range_max.is_some();
        let has_raw = self.raw_value.is_some();
        let has_struct = self.extra.is_some();

        let populated = [has_point, has_range, has_raw, has_struct]
            .iter()
            .filter(|p| **p)
            .count();
        if populated != 1 {
            return Err(ReconcileError::MalformedValue {
                reason: format!("{populated} payload slots populated, expected exactly 1"),
            });
        }

        match self.value_kind {
            ValueKind::Point => {
                let value = self.numeric_value.ok_or_else(|| self.kind_mismatch())?;
                Ok(HybridValue::Point { value })
            }
            ValueKind::Range => {
                let min = self.range_min.ok_or_else(|| self.kind_mismatch())?;
                let max = self.range_max.ok_or_else(|| self.kind_mismatch())?;
                let inclusive = (
                    self.min_inclusive.unwrap_or(true),
                    self.max_inclusive.unwrap_or(true),
                );
                HybridValue::range_with_inclusivity(min, max, inclusive)
            }
            ValueKind::Raw => {
                let text = self
                    .raw_value
                    .clone()
                    .ok_or_else(|| self.kind_mismatch())?;
                Ok(HybridValue::Raw { text })
            }
            ValueKind::Struct => {
                let fields = self.extra.clone().ok_or_else(|| self.kind_mismatch())?;
                Ok(HybridValue::Struct { fields })
            }
        }
    }

    fn kind_mismatch(&self) -> ReconcileError {
        ReconcileError::MalformedValue {
            reason: format!("value_kind {} does not match populated payload", self.value_kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn point_round_trip() {
        let v = HybridValue::point(1.86);
        assert_eq!(ValueRecord::encode(&v).decode().unwrap(), v);
    }

    #[test]
    fn range_round_trip_keeps_inclusivity() {
        let v = HybridValue::range_with_inclusivity(15.0, 20.0, (true, false)).unwrap();
        let decoded = ValueRecord::encode(&v).decode().unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn closed_range_distinguishable_from_point() {
        let range = HybridValue::range(15.0, 20.0).unwrap();
        let point = HybridValue::point(20.0);
        assert_ne!(
            ValueRecord::encode(&range).decode().unwrap(),
            ValueRecord::encode(&point).decode().unwrap()
        );
        assert!(range.contains(17.5));
        assert!(range.contains(20.0));
        assert!(!point.contains(17.5));
    }

    #[test]
    fn inverted_range_rejected() {
        let err = HybridValue::range(20.0, 15.0).unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedValue { .. }));
    }

    #[test]
    fn two_populated_slots_rejected() {
        let mut record = ValueRecord::encode(&HybridValue::point(1.0));
        record.raw_value = Some("also text".to_string());
        assert!(matches!(
            record.decode(),
            Err(ReconcileError::MalformedValue { .. })
        ));
    }

    #[test]
    fn zero_populated_slots_rejected() {
        let record = ValueRecord {
            value_kind: ValueKind::Point,
            numeric_value: None,
            range_min: None,
            range_max: None,
            min_inclusive: None,
            max_inclusive: None,
            raw_value: None,
            extra: None,
        };
        assert!(matches!(
            record.decode(),
            Err(ReconcileError::MalformedValue { .. })
        ));
    }

    #[test]
    fn kind_payload_mismatch_rejected() {
        let mut record = ValueRecord::encode(&HybridValue::raw("viscous"));
        record.value_kind = ValueKind::Point;
        assert!(record.decode().is_err());
    }

    #[test]
    fn from_json_classifies_shapes() {
        let point = HybridValue::from_json(&json!({"value_type": "point", "value": 78.2})).unwrap();
        assert_eq!(point, HybridValue::point(78.2));

        let range =
            HybridValue::from_json(&json!({"value_type": "range", "min": 15, "max": 20})).unwrap();
        assert_eq!(range, HybridValue::range(15.0, 20.0).unwrap());

        let raw = HybridValue::from_json(&json!("highly viscous")).unwrap();
        assert_eq!(raw, HybridValue::raw("highly viscous"));

        // undeclared scalars stay raw, numbers included
        let bare_number = HybridValue::from_json(&json!(62.07)).unwrap();
        assert_eq!(bare_number, HybridValue::raw("62.07"));

        let structured =
            HybridValue::from_json(&json!({"donors": 2, "acceptors": 4})).unwrap();
        assert!(matches!(structured, HybridValue::Struct { .. }));

        assert!(HybridValue::from_json(&json!(null)).is_err());
        assert!(HybridValue::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn from_json_inverted_range_rejected() {
        let err =
            HybridValue::from_json(&json!({"value_type": "range", "min": 20, "max": 15}))
                .unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedValue { .. }));
    }

    proptest! {
        #[test]
        fn encode_decode_round_trips_points(v in -1e12f64..1e12) {
            let value = HybridValue::point(v);
            prop_assert_eq!(ValueRecord::encode(&value).decode().unwrap(), value);
        }

        #[test]
        fn encode_decode_round_trips_ranges(
            a in -1e9f64..1e9,
            b in -1e9f64..1e9,
            lo: bool,
            hi: bool,
        ) {
            let (min, max) = if a <= b { (a, b) } else { (b, a) };
            let value = HybridValue::range_with_inclusivity(min, max, (lo, hi)).unwrap();
            prop_assert_eq!(ValueRecord::encode(&value).decode().unwrap(), value);
        }

        #[test]
        fn encode_decode_round_trips_raw(text in ".{0,64}") {
            let value = HybridValue::raw(text);
            prop_assert_eq!(ValueRecord::encode(&value).decode().unwrap(), value);
        }
    }
}
