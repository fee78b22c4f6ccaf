use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

use crate::models::ModelInfo;
use crate::schema::{FeatureSchema, FeatureSpec, Record, RecordError};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unsupported model format for {} (expected .onnx or .json)", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("failed to load ONNX graph {}: {message}", .path.display())]
    Onnx { path: PathBuf, message: String },
    #[error("schema declares {features} features but the model has {coefficients} coefficients")]
    ShapeMismatch { features: usize, coefficients: usize },
    #[error("model expects {expected} inputs, record has {actual}")]
    InputShape { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model produced no output")]
    EmptyOutput,
    #[error("model produced a non-finite output ({0})")]
    NonFiniteOutput(f64),
}

/// Anything that maps one record to a class label.
pub trait Predictor: Send + Sync {
    fn predict(&self, record: &Record) -> Result<i64, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    Onnx,
    Linear,
}

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// The loaded model together with the schema its inputs must satisfy.
pub struct ModelInference {
    format: ModelFormat,
    schema: FeatureSchema,
    predictor: Box<dyn Predictor>,
}

impl ModelInference {
    pub fn new(format: ModelFormat, schema: FeatureSchema, predictor: Box<dyn Predictor>) -> Self {
        Self {
            format,
            schema,
            predictor,
        }
    }

    /// Loads an artifact, picking the format from the file extension.
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self, ModelError> {
        let path = model_path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("onnx") => {
                let schema: FeatureSchema = read_json(&schema_path(path))?;
                let model = OnnxModel::load(path, schema.len())?;
                Ok(Self::new(ModelFormat::Onnx, schema, Box::new(model)))
            }
            Some("json") => {
                let (schema, model) = LinearModel::load(path)?;
                Ok(Self::new(ModelFormat::Linear, schema, Box::new(model)))
            }
            _ => Err(ModelError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn predict(&self, input: &Map<String, Value>) -> Result<i64, PredictError> {
        let record = self.schema.record(input)?;
        Ok(self.predictor.predict(&record)?)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn format(&self) -> ModelFormat {
        self.format
    }

    pub fn get_model_info(&self) -> ModelInfo {
        ModelInfo {
            format: self.format,
            features: self.schema.features().to_vec(),
        }
    }
}

/// `model.onnx` -> `model.schema.json`
pub fn schema_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("schema.json")
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let text = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ModelError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

pub struct OnnxModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    n_features: usize,
}

impl OnnxModel {
    pub fn load(path: &Path, n_features: usize) -> Result<Self, ModelError> {
        Self::build(path, n_features).map_err(|e| ModelError::Onnx {
            path: path.to_path_buf(),
            message: format!("{e:#}"),
        })
    }

    fn build(path: &Path, n_features: usize) -> TractResult<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, n_features)),
            )?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self { model, n_features })
    }

    fn run(&self, record: &Record) -> TractResult<TVec<TValue>> {
        let input = Tensor::from_shape(&[1, self.n_features], record.values())?;
        self.model.run(tvec!(input.into()))
    }
}

impl Predictor for OnnxModel {
    fn predict(&self, record: &Record) -> Result<i64, ModelError> {
        if record.len() != self.n_features {
            return Err(ModelError::InputShape {
                expected: self.n_features,
                actual: record.len(),
            });
        }
        let outputs = self
            .run(record)
            .map_err(|e| ModelError::Inference(format!("{e:#}")))?;
        let first = outputs.first().ok_or(ModelError::EmptyOutput)?;
        first_label(first)
    }
}

// Classifiers exported from scikit-learn emit an int64 label tensor first;
// regressors and raw-score graphs emit floats.
fn first_label(output: &Tensor) -> Result<i64, ModelError> {
    let tract_err = |e: TractError| ModelError::Inference(format!("{e:#}"));

    if output.datum_type() == i64::datum_type() {
        let labels = output.as_slice::<i64>().map_err(tract_err)?;
        return labels.first().copied().ok_or(ModelError::EmptyOutput);
    }

    let cast = output.cast_to::<f64>().map_err(tract_err)?;
    let values = cast.as_slice::<f64>().map_err(tract_err)?;
    let value = values.first().copied().ok_or(ModelError::EmptyOutput)?;
    label_from_float(value)
}

/// Truncates toward zero, the same as an integer cast of the raw score.
pub fn label_from_float(value: f64) -> Result<i64, ModelError> {
    if !value.is_finite() {
        return Err(ModelError::NonFiniteOutput(value));
    }
    Ok(value.trunc() as i64)
}

#[derive(Debug, Deserialize)]
struct LinearArtifact {
    features: Vec<FeatureSpec>,
    coefficients: Vec<f32>,
    intercept: f32,
    #[serde(default)]
    threshold: f32,
    #[serde(default = "default_classes")]
    classes: [i64; 2],
}

fn default_classes() -> [i64; 2] {
    [0, 1]
}

/// Binary linear classifier: `classes[1]` when `w·x + b > threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    coefficients: Vec<f32>,
    intercept: f32,
    threshold: f32,
    classes: [i64; 2],
}

impl LinearModel {
    pub fn new(coefficients: Vec<f32>, intercept: f32, threshold: f32, classes: [i64; 2]) -> Self {
        Self {
            coefficients,
            intercept,
            threshold,
            classes,
        }
    }

    pub fn load(path: &Path) -> Result<(FeatureSchema, Self), ModelError> {
        let artifact: LinearArtifact = read_json(path)?;
        let schema = FeatureSchema::new(artifact.features).map_err(|e| ModelError::Decode {
            path: path.to_path_buf(),
            source: serde::de::Error::custom(e),
        })?;
        if schema.len() != artifact.coefficients.len() {
            return Err(ModelError::ShapeMismatch {
                features: schema.len(),
                coefficients: artifact.coefficients.len(),
            });
        }
        let model = Self::new(
            artifact.coefficients,
            artifact.intercept,
            artifact.threshold,
            artifact.classes,
        );
        Ok((schema, model))
    }

    pub fn decision(&self, record: &Record) -> f32 {
        self.coefficients
            .iter()
            .zip(record.values())
            .map(|(w, x)| w * x)
            .sum::<f32>()
            + self.intercept
    }
}

impl Predictor for LinearModel {
    fn predict(&self, record: &Record) -> Result<i64, ModelError> {
        if record.len() != self.coefficients.len() {
            return Err(ModelError::InputShape {
                expected: self.coefficients.len(),
                actual: record.len(),
            });
        }
        let score = self.decision(record);
        if !score.is_finite() {
            return Err(ModelError::NonFiniteOutput(score as f64));
        }
        Ok(if score > self.threshold {
            self.classes[1]
        } else {
            self.classes[0]
        })
    }
}
