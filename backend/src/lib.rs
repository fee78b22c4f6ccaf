//! HTTP prediction service: loads one pre-trained model at startup and
//! answers `POST /` with the model's label for a flat JSON feature record.

pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod routes;
pub mod schema;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use inference::{ModelInference, Predictor};
