use actix_web::error::JsonPayloadError;
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error, warn};
use std::sync::Arc;

use crate::error::ApiError;
use crate::inference::{ModelInference, PredictError};
use crate::models::{FeatureMap, PredictionResponse};

/// Registers the model handle, body parsing rules and all routes.
pub fn configure(
    model: Arc<ModelInference>,
    json_limit: usize,
) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(model))
            .app_data(json_config(json_limit))
            .service(
                web::resource("/")
                    .route(web::post().to(predict))
                    .default_service(web::route().to(method_not_allowed)),
            )
            .route("/model-info", web::get().to(model_info))
            .default_service(web::route().to(not_found));
    }
}

// Bodies are parsed as JSON whatever the Content-Type says.
fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .content_type_required(false)
        .content_type(|_| true)
        .error_handler(|err, _req| {
            warn!("Rejected request body: {}", err);
            match err {
                JsonPayloadError::OverflowKnownLength { .. } | JsonPayloadError::Overflow { .. } => {
                    ApiError::PayloadTooLarge(err.to_string()).into()
                }
                _ => ApiError::InvalidJson(err.to_string()).into(),
            }
        })
}

pub async fn predict(
    model: web::Data<Arc<ModelInference>>,
    body: web::Json<FeatureMap>,
) -> Result<HttpResponse, ApiError> {
    let model = model.get_ref().clone();
    let features = body.into_inner();

    let outcome = web::block(move || model.predict(&features))
        .await
        .map_err(|e| {
            error!("Prediction task failed to run: {}", e);
            ApiError::Blocking(e.to_string())
        })?;

    match outcome {
        Ok(label) => {
            debug!("Prediction succeeded: {}", label);
            Ok(HttpResponse::Ok().json(PredictionResponse::new(label)))
        }
        Err(PredictError::Record(e)) => {
            warn!("Request does not match the feature schema: {}", e);
            Err(e.into())
        }
        Err(PredictError::Model(e)) => {
            error!("Inference error: {}", e);
            Err(e.into())
        }
    }
}

pub async fn model_info(model: web::Data<Arc<ModelInference>>) -> HttpResponse {
    HttpResponse::Ok().json(model.get_model_info())
}

pub async fn method_not_allowed(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    Err(ApiError::MethodNotAllowed(req.method().to_string()))
}

pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    Err(ApiError::NotFound(format!("{} {}", req.method(), req.path())))
}
