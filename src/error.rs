use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures while reading the inbound form. Upstream failures never show up
/// here; they travel inside a 200 `api_response`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unable to parse form: {0}")]
    Form(String),

    #[error("Error retrieving file")]
    MissingImage,

    #[error("Error reading file: {0}")]
    ReadImage(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Form(_) | AppError::MissingImage => StatusCode::BAD_REQUEST,
            AppError::ReadImage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %self);

        (status, self.to_string()).into_response()
    }
}
