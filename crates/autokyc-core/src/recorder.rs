//! Step Recorder: persists each verification step through its stored
//! procedure and decodes the verdict the procedure returns.

use crate::collaborators::{Database, ProcedureRow, SqlValue};
use crate::error::FlowError;
use crate::types::{DetectionResult, FaceCompareResult, LivenessResult, StepOutcome, StepStatus};
use serde_json::json;
use std::sync::Arc;

/// Stored procedure names.
pub mod procedures {
    pub const INSERT_DETECTION: &str = "SP_INSERT_DD";
    pub const INSERT_FACE_COMPARE: &str = "SP_INSERT_FACECOMPARE";
    pub const INSERT_LIVENESS: &str = "SP_INSERT_LIVENESS";
    pub const FETCH_SESSION_STEPS: &str = "SP_FETCH_SESSION_STEPS";
}

/// Decode a status column: a big-endian byte string, or a plain integer.
pub fn decode_status(value: &SqlValue) -> Option<StepStatus> {
    match value {
        SqlValue::Blob(bytes) => StepStatus::from_be_bytes(bytes),
        SqlValue::Integer(code) => Some(StepStatus::from_code(*code)),
        _ => None,
    }
}

/// Decode the `[message, status, sp_code]` row every insert procedure returns.
fn decode_outcome(procedure: &str, rows: Vec<ProcedureRow>) -> Result<StepOutcome, FlowError> {
    let row = rows.into_iter().next().ok_or_else(|| {
        FlowError::PersistenceFailure(format!("{procedure} returned no rows"))
    })?;
    if row.len() < 3 {
        return Err(FlowError::PersistenceFailure(format!(
            "{procedure} returned {} columns, expected 3",
            row.len()
        )));
    }

    let status = decode_status(&row[1]).ok_or_else(|| {
        FlowError::PersistenceFailure(format!(
            "{procedure} returned undecodable status {:?}",
            row[1]
        ))
    })?;

    Ok(StepOutcome {
        message: row[0].as_text().unwrap_or_default().to_string(),
        status,
        sp_code: row[2].as_i64().unwrap_or(0),
    })
}

#[derive(Clone)]
pub struct StepRecorder {
    db: Arc<dyn Database>,
}

impl StepRecorder {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    async fn call(&self, procedure: &str, args: Vec<SqlValue>) -> Result<StepOutcome, FlowError> {
        let rows = self
            .db
            .call_procedure(procedure, args)
            .await
            .map_err(|e| FlowError::PersistenceFailure(e.to_string()))?;
        let outcome = decode_outcome(procedure, rows)?;
        tracing::debug!(
            procedure,
            status = outcome.status.code(),
            sp_code = outcome.sp_code,
            message = %outcome.message,
            "step recorded"
        );
        Ok(outcome)
    }

    /// Record a document detection. `attempt` is 0 for the first detection
    /// of this side in the session, 1 for any later one.
    pub async fn record_detection(
        &self,
        detection: &DetectionResult,
        attempt: u8,
    ) -> Result<StepOutcome, FlowError> {
        let details = json!({
            "side": detection.side.marker(),
            "captured_at": detection.captured_at.to_rfc3339(),
        });
        let args = vec![
            SqlValue::from(detection.msisdn),
            SqlValue::from(detection.session_id.as_str()),
            SqlValue::from(detection.csid.as_str()),
            SqlValue::from(i64::from(detection.document_type.code())),
            SqlValue::from(detection.raw_label.as_str()),
            SqlValue::from(detection.image_path.as_str()),
            SqlValue::from(json!(detection.bounding_box.to_array()).to_string()),
            SqlValue::from(detection.confidence),
            SqlValue::from(details.to_string()),
            SqlValue::from(i64::from(attempt)),
        ];
        self.call(procedures::INSERT_DETECTION, args).await
    }

    pub async fn record_face_compare(
        &self,
        result: &FaceCompareResult,
    ) -> Result<StepOutcome, FlowError> {
        let details = json!({
            "matched_face": result.matched_face,
            "captured_at": result.captured_at.to_rfc3339(),
        });
        let args = vec![
            SqlValue::from(result.msisdn),
            SqlValue::from(result.session_id.as_str()),
            SqlValue::from(result.csid.as_str()),
            SqlValue::from(result.similarity),
            SqlValue::from(result.cropped_image_path.clone()),
            SqlValue::from(details.to_string()),
        ];
        self.call(procedures::INSERT_FACE_COMPARE, args).await
    }

    pub async fn record_liveness(&self, result: &LivenessResult) -> Result<StepOutcome, FlowError> {
        let details = json!({
            "audit_images": result.audit_images,
            "captured_at": result.captured_at.to_rfc3339(),
        });
        let bounding_box = result
            .bounding_box
            .map(|b| json!(b).to_string());
        let args = vec![
            SqlValue::from(result.msisdn),
            SqlValue::from(result.session_id.as_str()),
            SqlValue::from(result.csid.as_str()),
            SqlValue::from(result.reference_image_path.clone()),
            SqlValue::from(bounding_box),
            SqlValue::from(result.confidence),
            SqlValue::from(result.status.as_provider()),
            SqlValue::from(details.to_string()),
        ];
        self.call(procedures::INSERT_LIVENESS, args).await
    }
}
