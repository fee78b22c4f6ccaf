//! Feature schema: the ordered, typed list of inputs a model was trained on.
//!
//! Requests arrive as JSON objects whose key order carries no meaning. The
//! schema is the single source of column order; every record handed to a
//! model is assembled by walking the schema, never the request.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    #[default]
    Float,
    Integer,
    Boolean,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureKind::Float => "float",
            FeatureKind::Integer => "integer",
            FeatureKind::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default)]
    pub kind: FeatureKind,
}

impl FeatureSpec {
    pub fn new(name: impl Into<String>, kind: FeatureKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Problems with a schema definition itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("feature schema declares no features")]
    Empty,
    #[error("feature `{0}` is declared more than once")]
    DuplicateFeature(String),
}

/// A request object that does not fit the schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("missing feature `{0}`")]
    MissingFeature(String),
    #[error("unexpected feature `{0}`")]
    UnexpectedFeature(String),
    #[error("feature `{feature}` expects a {expected} value, got {found}")]
    InvalidValue {
        feature: String,
        expected: FeatureKind,
        found: &'static str,
    },
    #[error("feature `{feature}` value {value} cannot be represented exactly as a model input")]
    OutOfRange { feature: String, value: String },
}

impl RecordError {
    /// Name of the offending request key.
    pub fn feature(&self) -> &str {
        match self {
            RecordError::MissingFeature(name) | RecordError::UnexpectedFeature(name) => name,
            RecordError::InvalidValue { feature, .. } | RecordError::OutOfRange { feature, .. } => {
                feature
            }
        }
    }

    /// Stable machine-readable tag, used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::MissingFeature(_) => "missing_feature",
            RecordError::UnexpectedFeature(_) => "unexpected_feature",
            RecordError::InvalidValue { .. } | RecordError::OutOfRange { .. } => "invalid_value",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    features: Vec<FeatureSpec>,
}

impl TryFrom<RawSchema> for FeatureSchema {
    type Error = SchemaError;

    fn try_from(raw: RawSchema) -> Result<Self, Self::Error> {
        FeatureSchema::new(raw.features)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSchema")]
pub struct FeatureSchema {
    features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    pub fn new(features: Vec<FeatureSpec>) -> Result<Self, SchemaError> {
        if features.is_empty() {
            return Err(SchemaError::Empty);
        }
        for (i, spec) in features.iter().enumerate() {
            if features[..i].iter().any(|prev| prev.name == spec.name) {
                return Err(SchemaError::DuplicateFeature(spec.name.clone()));
            }
        }
        Ok(Self { features })
    }

    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.features.iter().any(|spec| spec.name == name)
    }

    /// Validates `input` and lays its values out in schema order.
    ///
    /// Missing features are reported before unexpected ones so that a
    /// misspelled key surfaces as the feature the model actually needs.
    pub fn record(&self, input: &Map<String, Value>) -> Result<Record, RecordError> {
        if let Some(missing) = self.features.iter().find(|spec| !input.contains_key(&spec.name)) {
            return Err(RecordError::MissingFeature(missing.name.clone()));
        }
        if let Some(extra) = input.keys().find(|key| !self.contains(key)) {
            return Err(RecordError::UnexpectedFeature(extra.clone()));
        }

        let values = self
            .features
            .iter()
            .map(|spec| convert(spec, &input[&spec.name]))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Record { values })
    }
}

/// Largest integer magnitude an `f32` holds without rounding.
pub const MAX_EXACT_INTEGER: u64 = 1 << 24;

fn convert(spec: &FeatureSpec, value: &Value) -> Result<f32, RecordError> {
    let out_of_range = || RecordError::OutOfRange {
        feature: spec.name.clone(),
        value: value.to_string(),
    };

    let converted = match (spec.kind, value) {
        (FeatureKind::Float, Value::Number(n)) => n.as_f64().map(|v| v as f32),
        (FeatureKind::Integer, Value::Number(n)) if !n.is_f64() => {
            let exact = n
                .as_i64()
                .is_some_and(|v| v.unsigned_abs() <= MAX_EXACT_INTEGER);
            if !exact {
                return Err(out_of_range());
            }
            n.as_i64().map(|v| v as f32)
        }
        (FeatureKind::Boolean, Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };

    let converted = converted.ok_or_else(|| RecordError::InvalidValue {
        feature: spec.name.clone(),
        expected: spec.kind,
        found: json_type(value),
    })?;
    // 1e300 is a valid JSON number but overflows to inf as f32.
    if !converted.is_finite() {
        return Err(out_of_range());
    }
    Ok(converted)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One row of model input, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<f32>,
}

impl Record {
    pub fn from_values(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
