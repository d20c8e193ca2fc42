//! HTTP mapping of flow errors.

use autokyc_core::FlowError;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// A step or lookup the flow refused or could not complete.
    Flow(FlowError),
    /// The request itself was unusable (missing part, bad field).
    BadRequest(String),
    /// The multipart body could not be read (malformed, over the size limit).
    Upload(MultipartError),
    NotFound(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        ApiError::Flow(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Upload(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Flow(err) => match err.rejection() {
                Some(rejection) => {
                    tracing::info!(
                        code = rejection.response_code.code(),
                        reason = %err,
                        "step rejected"
                    );
                    (StatusCode::BAD_REQUEST, Json(rejection)).into_response()
                }
                None => {
                    tracing::error!(error = %err, "step failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorBody {
                            error: err.to_string(),
                        }),
                    )
                        .into_response()
                }
            },
            ApiError::BadRequest(message) => {
                tracing::debug!(%message, "bad request");
                (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message })).into_response()
            }
            ApiError::Upload(err) => {
                let status = err.status();
                tracing::debug!(error = %err, %status, "unreadable upload");
                (status, Json(ErrorBody { error: err.body_text() })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorBody { error: message })).into_response()
            }
        }
    }
}
