use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use courier_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("sqlx error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("core error: {0}")]
  Core(#[from] CoreError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("authentication failed: {0}")]
  AuthenticationFailed(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("validation error: {0}")]
  Validation(String),

  #[error("template not found: {0}")]
  TemplateMissing(String),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("NATS error: {0}")]
  Nats(String),

  #[error("internal server error: {0}")]
  Internal(String),

  #[error("any error: {0}")]
  Any(#[from] anyhow::Error),
}

impl IntoResponse for ServerError {
  fn into_response(self) -> Response {
    let (status, error_message) = match self {
      ServerError::AuthenticationFailed(msg) => (StatusCode::UNAUTHORIZED, msg),
      ServerError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
      ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
      ServerError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
      ServerError::TemplateMissing(msg) => (StatusCode::NOT_FOUND, msg),
      ServerError::Nats(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
      other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    };

    let body = Json(json!({
      "error": error_message,
      "status": status.as_u16()
    }));

    (status, body).into_response()
  }
}
