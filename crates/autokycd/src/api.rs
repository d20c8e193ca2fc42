//! HTTP handlers for the three verification steps plus inspection.
//!
//! Endpoints:
//! - POST /liveness/post-data                 liveness provider result (JSON)
//! - POST /document-detection/inference       document photo (multipart)
//! - POST /face/compare                       document front + liveness image (multipart)
//! - GET  /sessions/:id                       derived state and recorded steps
//! - GET  /health                             version, database and model status

use crate::error::ApiError;
use crate::AppState;
use autokyc_core::types::AuditImage;
use autokyc_core::{
    FaceBox, FlowResponse, LivenessResponse, LivenessResult, LivenessStatus, SessionView,
    StepContext,
};
use axum::extract::{Multipart, Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Multipart form split into text fields and file parts.
#[derive(Debug, Default)]
struct Form {
    text: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Form::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                form.files.insert(name, field.bytes().await?.to_vec());
            } else {
                form.text.insert(name, field.text().await?);
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> Result<&str, ApiError> {
        self.text
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::bad_request(format!("missing form field {name:?}")))
    }

    fn file(&mut self, name: &str) -> Result<Vec<u8>, ApiError> {
        self.files
            .remove(name)
            .ok_or_else(|| ApiError::bad_request(format!("missing file part {name:?}")))
    }

    fn context(&self) -> Result<StepContext, ApiError> {
        let msisdn = self.text("msisdn")?;
        Ok(StepContext {
            session_id: self.text("session_id")?.to_string(),
            csid: self.text("csid")?.to_string(),
            msisdn: msisdn
                .parse()
                .map_err(|_| ApiError::bad_request(format!("msisdn {msisdn:?} is not a number")))?,
        })
    }
}

/// `POST /document-detection/inference`
pub async fn handle_document(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FlowResponse>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let ctx = form.context()?;
    let image = form.file("file")?;
    tracing::debug!(session_id = %ctx.session_id, csid = %ctx.csid, bytes = image.len(), "document upload");
    Ok(Json(state.service.submit_document(&ctx, image).await?))
}

/// `POST /face/compare`
pub async fn handle_face_compare(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FlowResponse>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let ctx = form.context()?;
    let front = form.file("document_front")?;
    let liveness = form.file("liveness_document")?;
    Ok(Json(
        state.service.submit_face_compare(&ctx, front, liveness).await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl NumberOrText {
    fn as_i64(&self) -> Option<i64> {
        match self {
            NumberOrText::Integer(v) => Some(*v),
            NumberOrText::Float(_) => None,
            NumberOrText::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_f32(&self) -> Option<f32> {
        match self {
            NumberOrText::Integer(v) => Some(*v as f32),
            NumberOrText::Float(v) => Some(*v as f32),
            NumberOrText::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3Object {
    bucket: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProviderImage {
    bounding_box: Option<FaceBox>,
    #[serde(rename = "S3Object")]
    s3_object: Option<S3Object>,
}

impl ProviderImage {
    fn object_name(&self) -> Option<&str> {
        self.s3_object
            .as_ref()
            .and_then(|o| o.name.as_deref())
            .filter(|n| !n.is_empty())
    }
}

/// Liveness result in the provider's format.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LivenessPayload {
    session_id: String,
    #[serde(rename = "CSID")]
    csid: String,
    #[serde(rename = "MSISDN")]
    msisdn: NumberOrText,
    confidence: NumberOrText,
    status: String,
    #[serde(default)]
    reference_image: Option<ProviderImage>,
    #[serde(default)]
    audit_images: Vec<ProviderImage>,
}

impl LivenessPayload {
    fn into_result(self) -> Result<LivenessResult, ApiError> {
        let msisdn = self
            .msisdn
            .as_i64()
            .ok_or_else(|| ApiError::bad_request("MSISDN is not a number"))?;
        let confidence = self
            .confidence
            .as_f32()
            .filter(|c| c.is_finite())
            .ok_or_else(|| ApiError::bad_request("Confidence is not a number"))?;

        // The first audit frame is the evidence image; the reference image
        // stands in when the provider sent none.
        let first_audit = self.audit_images.first();
        let reference_image_path = first_audit
            .and_then(ProviderImage::object_name)
            .or_else(|| self.reference_image.as_ref().and_then(ProviderImage::object_name))
            .map(str::to_string);
        let bounding_box = first_audit
            .and_then(|a| a.bounding_box)
            .or_else(|| self.reference_image.as_ref().and_then(|r| r.bounding_box));

        let audit_images = self
            .audit_images
            .iter()
            .map(|a| AuditImage {
                bounding_box: a.bounding_box,
                bucket: a.s3_object.as_ref().and_then(|o| o.bucket.clone()),
                object_name: a.object_name().map(str::to_string),
            })
            .collect();

        Ok(LivenessResult {
            session_id: self.session_id,
            csid: self.csid,
            msisdn,
            confidence,
            bounding_box,
            status: LivenessStatus::from_provider(&self.status),
            reference_image_path,
            audit_images,
            captured_at: Utc::now(),
        })
    }
}

/// `POST /liveness/post-data`
pub async fn handle_liveness(
    State(state): State<AppState>,
    Json(payload): Json<LivenessPayload>,
) -> Result<Json<LivenessResponse>, ApiError> {
    let result = payload.into_result()?;
    Ok(Json(state.service.submit_liveness(result).await?))
}

/// `GET /sessions/:id`
pub async fn handle_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let view = state.service.session(&session_id).await?;
    if view.history.is_empty() {
        return Err(ApiError::NotFound(format!("no steps recorded for session {session_id}")));
    }
    Ok(Json(view))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
    pub engine_running: bool,
    pub models: Option<crate::engine::ModelInfo>,
}

/// `GET /health`
pub async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = state.database.ping().await;
    let engine_running = state.engine.as_ref().map_or(true, |e| e.is_running());
    Json(HealthResponse {
        status: if database && engine_running { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        engine_running,
        models: state.engine.as_ref().map(|e| e.models().clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: serde_json::Value) -> LivenessPayload {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_liveness_prefers_first_audit_image() {
        let result = payload(serde_json::json!({
            "SessionId": "s-1",
            "CSID": "c-1",
            "MSISDN": "9800000001",
            "Confidence": 97.5,
            "Status": "SUCCEEDED",
            "ReferenceImage": {"S3Object": {"Bucket": "b", "Name": "ref.jpg"}},
            "AuditImages": [
                {
                    "BoundingBox": {"Width": 0.4, "Height": 0.5, "Left": 0.3, "Top": 0.2},
                    "S3Object": {"Bucket": "b", "Name": "audit-0.jpg"}
                },
                {"S3Object": {"Bucket": "b", "Name": "audit-1.jpg"}}
            ]
        }))
        .into_result()
        .unwrap();

        assert_eq!(result.msisdn, 9_800_000_001);
        assert_eq!(result.status, LivenessStatus::Succeeded);
        assert_eq!(result.reference_image_path.as_deref(), Some("audit-0.jpg"));
        assert_eq!(result.bounding_box.map(|b| b.left), Some(0.3));
        assert_eq!(result.audit_images.len(), 2);
        assert_eq!(result.audit_images[1].object_name.as_deref(), Some("audit-1.jpg"));
    }

    #[test]
    fn test_liveness_falls_back_to_reference_image() {
        let result = payload(serde_json::json!({
            "SessionId": "s-1",
            "CSID": "c-1",
            "MSISDN": 42,
            "Confidence": "12.5",
            "Status": "FAILED",
            "ReferenceImage": {"S3Object": {"Name": "ref.jpg"}}
        }))
        .into_result()
        .unwrap();

        assert_eq!(result.reference_image_path.as_deref(), Some("ref.jpg"));
        assert_eq!(result.confidence, 12.5);
        assert_eq!(result.status, LivenessStatus::Failed);
        assert!(result.audit_images.is_empty());
    }

    #[test]
    fn test_liveness_rejects_bad_msisdn() {
        let err = payload(serde_json::json!({
            "SessionId": "s-1",
            "CSID": "c-1",
            "MSISDN": "not-a-number",
            "Confidence": 90,
            "Status": "SUCCEEDED"
        }))
        .into_result()
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
