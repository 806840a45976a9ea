use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

use crate::{app_state::AppState, error::AppError};

const IMAGE_FIELD:  &str = "image";
const PROMPT_FIELD: &str = "context-ai";

/// What one POST carried. Lives only for the duration of the request.
struct Submission {
    image:  Vec<u8>,
    prompt: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context:      Option<String>,
    pub api_response: String,
}

pub async fn handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let multipart = multipart.map_err(|e| AppError::Form(e.body_text()))?;
    let submission = read_submission(multipart).await?;

    tracing::debug!(
        bytes = submission.image.len(),
        prompt_chars = submission.prompt.len(),
        "Forwarding image to completion API"
    );

    let image_base64 = STANDARD.encode(&submission.image);
    let api_response = state
        .completion
        .complete(&image_base64, &submission.prompt)
        .await;

    tracing::info!(chars = api_response.len(), "Answer ready");

    let response = if state.config.echo_input {
        AnalyzeResponse {
            base64_image: Some(image_base64),
            context:      Some(submission.prompt),
            api_response,
        }
    } else {
        AnalyzeResponse {
            base64_image: None,
            context:      None,
            api_response,
        }
    };

    Ok(Json(response))
}

async fn read_submission(mut multipart: Multipart) -> Result<Submission, AppError> {
    let mut image:  Option<Vec<u8>> = None;
    let mut prompt: Option<String>  = None;

    // The image must be a file part and the prompt a plain value part; the
    // first occurrence of each wins and later duplicates are skipped unread.
    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name    = field.name().map(str::to_owned);
        let is_file = field.file_name().is_some();

        match name.as_deref() {
            Some(IMAGE_FIELD) if is_file && image.is_none() => {
                let bytes = field.bytes().await.map_err(image_error)?;
                image = Some(bytes.to_vec());
            }

            Some(PROMPT_FIELD) if !is_file && prompt.is_none() => {
                prompt = Some(field.text().await.map_err(form_error)?);
            }

            _ => { /* ignore unexpected fields */ }
        }
    }

    Ok(Submission {
        image:  image.ok_or(AppError::MissingImage)?,
        prompt: prompt.unwrap_or_default(),
    })
}

fn form_error(e: MultipartError) -> AppError {
    AppError::Form(e.body_text())
}

/// Oversized and malformed parts are the client's fault; only server-side
/// read failures become a 500.
fn image_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::INTERNAL_SERVER_ERROR {
        AppError::ReadImage(e.body_text())
    } else {
        form_error(e)
    }
}
