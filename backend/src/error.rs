use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};

use crate::inference::{ModelError, PredictError};
use crate::models::ErrorBody;
use crate::schema::RecordError;

/// Every failure a request can end in, mapped to a status and JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),
    #[error("request body too large: {0}")]
    PayloadTooLarge(String),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("prediction task was cancelled: {0}")]
    Blocking(String),
    #[error("no route for {0}")]
    NotFound(String),
    #[error("method {0} not allowed, use POST")]
    MethodNotAllowed(String),
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        match err {
            PredictError::Record(e) => ApiError::Record(e),
            PredictError::Model(e) => ApiError::Model(e),
        }
    }
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidJson(_) => "invalid_json",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::Record(e) => e.kind(),
            ApiError::Model(_) | ApiError::Blocking(_) => "inference_failed",
            ApiError::NotFound(_) => "not_found",
            ApiError::MethodNotAllowed(_) => "method_not_allowed",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Record(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Model(_) | ApiError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = ErrorBody::new(self.kind(), self.to_string());
        if let ApiError::Record(e) = self {
            body = body.with_feature(e.feature());
        }
        let mut response = HttpResponse::build(self.status_code());
        if let ApiError::MethodNotAllowed(_) = self {
            response.insert_header((header::ALLOW, "POST"));
        }
        response.json(body)
    }
}
