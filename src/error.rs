// src/error.rs
use actix_web::http::StatusCode;
use actix_web::{error, HttpRequest, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Ошибки API: InvalidInput → 400, Validation → 422, Internal → 500.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<qrcode::types::QrError> for ApiError {
    fn from(e: qrcode::types::QrError) -> Self {
        ApiError::Internal(anyhow::Error::new(e))
    }
}

impl From<image::ImageError> for ApiError {
    fn from(e: image::ImageError) -> Self {
        ApiError::Internal(anyhow::Error::new(e))
    }
}

impl From<zip::result::ZipError> for ApiError {
    fn from(e: zip::result::ZipError) -> Self {
        ApiError::Internal(anyhow::Error::new(e))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(anyhow::Error::new(e))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::InvalidInput(msg) => {
                HttpResponse::BadRequest().json(json!({ "error": msg }))
            }
            ApiError::Validation(msg) => {
                HttpResponse::UnprocessableEntity().json(json!({ "error": msg }))
            }
            ApiError::Internal(e) => {
                log::error!("Internal error: {:#}", e);
                HttpResponse::InternalServerError().json(json!({ "detail": e.to_string() }))
            }
        }
    }
}

/// Структурно битый JSON тела запроса → 422, как у исходного API.
pub fn json_error_handler(err: error::JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    log::warn!("Invalid JSON body for {}: {}", req.path(), err);
    let response = HttpResponse::UnprocessableEntity().json(json!({ "error": err.to_string() }));
    error::InternalError::from_response(err, response).into()
}

pub fn query_error_handler(err: error::QueryPayloadError, req: &HttpRequest) -> actix_web::Error {
    log::warn!("Invalid query string for {}: {}", req.path(), err);
    let response = HttpResponse::UnprocessableEntity().json(json!({ "error": err.to_string() }));
    error::InternalError::from_response(err, response).into()
}
