//! Session history: the recorded steps of one session, read back through
//! `SP_FETCH_SESSION_STEPS`.

use crate::collaborators::{Database, ProcedureRow, SqlValue};
use crate::error::FlowError;
use crate::normalizer::split_label;
use crate::recorder::{decode_status, procedures};
use crate::sequencer::{SessionState, StepEvent};
use crate::types::{DocumentType, LivenessStatus, Side, StepStatus};
use serde::Serialize;
use std::sync::Arc;

/// Columns of a `SP_FETCH_SESSION_STEPS` row.
const STEP_COLUMNS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Liveness,
    Document,
    FaceCompare,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Liveness => "LIVENESS",
            StepKind::Document => "DOCUMENT",
            StepKind::FaceCompare => "FACECOMPARE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LIVENESS" => Some(StepKind::Liveness),
            "DOCUMENT" => Some(StepKind::Document),
            "FACECOMPARE" => Some(StepKind::FaceCompare),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedStep {
    pub kind: StepKind,
    pub msisdn: i64,
    pub document_type: Option<DocumentType>,
    pub side: Option<Side>,
    pub raw_label: Option<String>,
    pub image_path: Option<String>,
    /// Document confidence, face similarity or liveness confidence.
    pub score: Option<f64>,
    pub liveness_status: Option<LivenessStatus>,
    pub status: StepStatus,
    pub recorded_at: String,
}

impl RecordedStep {
    fn from_row(row: &ProcedureRow) -> Result<Self, FlowError> {
        if row.len() < STEP_COLUMNS {
            return Err(FlowError::PersistenceFailure(format!(
                "{} returned {} columns, expected {STEP_COLUMNS}",
                procedures::FETCH_SESSION_STEPS,
                row.len()
            )));
        }
        let kind = row[0]
            .as_text()
            .and_then(StepKind::parse)
            .ok_or_else(|| {
                FlowError::PersistenceFailure(format!("unknown step kind {:?}", row[0]))
            })?;
        let status = decode_status(&row[7]).ok_or_else(|| {
            FlowError::PersistenceFailure(format!("undecodable step status {:?}", row[7]))
        })?;

        let raw_label = row[3].as_text().map(str::to_string);
        let side = raw_label.as_deref().map(|label| split_label(label).1);

        Ok(Self {
            kind,
            msisdn: row[1].as_i64().unwrap_or_default(),
            document_type: row[2].as_i64().map(|c| DocumentType::from_code(c as i32)),
            side,
            raw_label,
            image_path: row[4].as_text().map(str::to_string),
            score: row[5].as_f64(),
            liveness_status: row[6].as_text().map(LivenessStatus::from_provider),
            status,
            recorded_at: row[8].as_text().unwrap_or_default().to_string(),
        })
    }

    pub fn event(&self) -> StepEvent {
        match self.kind {
            StepKind::Liveness => StepEvent::Liveness {
                status: self.liveness_status.unwrap_or(LivenessStatus::Failed),
                outcome: self.status,
            },
            StepKind::Document => StepEvent::Document {
                document_type: self.document_type.unwrap_or(DocumentType::Unknown),
                side: self.side.unwrap_or(Side::Unspecified),
                outcome: self.status,
            },
            StepKind::FaceCompare => StepEvent::FaceCompare {
                outcome: self.status,
            },
        }
    }

    fn is_document(&self, side: Side) -> bool {
        self.kind == StepKind::Document && self.side == Some(side)
    }
}

/// All recorded steps of one session, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionHistory {
    pub session_id: String,
    pub steps: Vec<RecordedStep>,
}

impl SessionHistory {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Subscriber the session was opened for.
    pub fn msisdn(&self) -> Option<i64> {
        self.steps.first().map(|s| s.msisdn)
    }

    /// Fail when the session already belongs to a different subscriber.
    pub fn ensure_msisdn(&self, msisdn: i64) -> Result<(), FlowError> {
        match self.msisdn() {
            Some(owner) if owner != msisdn => Err(FlowError::SessionMismatch {
                session_id: self.session_id.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Type and side of the most recently recorded front detection, whatever
    /// its status. `None` means nothing has been uploaded yet.
    ///
    /// The back-type guard in the sequencer reads the front type from the
    /// replayed [`SessionState`] instead. Both agree once a front is
    /// accepted, since later fronts are replayed rather than recorded.
    pub fn prior_document(&self) -> Option<(DocumentType, Side)> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.is_document(Side::Front))
            .and_then(|s| Some((s.document_type?, s.side?)))
    }

    pub fn detections_of(&self, side: Side) -> usize {
        self.steps.iter().filter(|s| s.is_document(side)).count()
    }

    /// Image of the most recent accepted front detection.
    pub fn front_image(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.is_document(Side::Front) && s.status.is_accepted())
            .and_then(|s| s.image_path.as_deref())
    }

    /// Image of the most recent accepted, succeeded liveness check.
    pub fn liveness_image(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| {
                s.kind == StepKind::Liveness
                    && s.status.is_accepted()
                    && s.liveness_status == Some(LivenessStatus::Succeeded)
            })
            .and_then(|s| s.image_path.as_deref())
    }

    pub fn state(&self) -> SessionState {
        SessionState::replay(self.steps.iter().map(RecordedStep::event))
    }
}

/// Reads session history through the procedure layer.
#[derive(Clone)]
pub struct HistoryLookup {
    db: Arc<dyn Database>,
}

impl HistoryLookup {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn load(&self, session_id: &str) -> Result<SessionHistory, FlowError> {
        let rows = self
            .db
            .call_procedure(
                procedures::FETCH_SESSION_STEPS,
                vec![SqlValue::from(session_id)],
            )
            .await
            .map_err(|e| FlowError::PersistenceFailure(e.to_string()))?;
        let steps = rows
            .iter()
            .map(RecordedStep::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SessionHistory {
            session_id: session_id.to_string(),
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::DatabaseError;
    use async_trait::async_trait;

    struct Rows(Vec<ProcedureRow>);

    #[async_trait]
    impl Database for Rows {
        async fn call_procedure(
            &self,
            procedure: &str,
            _args: Vec<SqlValue>,
        ) -> Result<Vec<ProcedureRow>, DatabaseError> {
            assert_eq!(procedure, procedures::FETCH_SESSION_STEPS);
            Ok(self.0.clone())
        }
    }

    fn liveness(status: &str, accepted: bool) -> ProcedureRow {
        vec![
            SqlValue::from("LIVENESS"),
            SqlValue::Integer(42),
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::from("2024/Sep/03/42_s_liveness_image.jpg"),
            SqlValue::Real(0.99),
            SqlValue::from(status),
            SqlValue::Blob(vec![u8::from(accepted)]),
            SqlValue::from("2024-09-03T10:00:00Z"),
        ]
    }

    fn document(label: &str, code: i64, path: &str, accepted: bool) -> ProcedureRow {
        vec![
            SqlValue::from("DOCUMENT"),
            SqlValue::Integer(42),
            SqlValue::Integer(code),
            SqlValue::from(label),
            SqlValue::from(path),
            SqlValue::Real(0.9),
            SqlValue::Null,
            SqlValue::Blob(vec![u8::from(accepted)]),
            SqlValue::from("2024-09-03T10:01:00Z"),
        ]
    }

    #[tokio::test]
    async fn test_load_and_replay() {
        let lookup = HistoryLookup::new(Arc::new(Rows(vec![
            liveness("SUCCEEDED", true),
            document("PPF", 4, "front-1.jpg", false),
            document("NIDF", 3, "front-2.jpg", true),
        ])));
        let history = lookup.load("s").await.unwrap();
        assert_eq!(history.steps.len(), 3);
        assert_eq!(history.msisdn(), Some(42));
        assert_eq!(
            history.prior_document(),
            Some((DocumentType::NationalId, Side::Front))
        );
        assert_eq!(history.front_image(), Some("front-2.jpg"));
        assert_eq!(
            history.liveness_image(),
            Some("2024/Sep/03/42_s_liveness_image.jpg")
        );
        assert_eq!(history.detections_of(Side::Front), 2);
        assert_eq!(history.detections_of(Side::Back), 0);
        assert_eq!(
            history.state(),
            SessionState::AwaitingBackDocument(DocumentType::NationalId)
        );
    }

    #[tokio::test]
    async fn test_prior_type_ignores_status() {
        let lookup = HistoryLookup::new(Arc::new(Rows(vec![document(
            "PPF", 4, "f.jpg", false,
        )])));
        assert_eq!(
            lookup.load("s").await.unwrap().prior_document(),
            Some((DocumentType::Passport, Side::Front))
        );
    }

    #[tokio::test]
    async fn test_empty_history() {
        let history = HistoryLookup::new(Arc::new(Rows(vec![])))
            .load("s")
            .await
            .unwrap();
        assert!(history.is_empty());
        assert_eq!(history.prior_document(), None);
        assert_eq!(history.state(), SessionState::AwaitingLiveness);
        assert!(history.ensure_msisdn(7).is_ok());
    }

    #[tokio::test]
    async fn test_failed_liveness_has_no_image() {
        let history = HistoryLookup::new(Arc::new(Rows(vec![liveness("FAILED", false)])))
            .load("s")
            .await
            .unwrap();
        assert_eq!(history.liveness_image(), None);
        assert_eq!(history.state(), SessionState::AwaitingLiveness);
    }

    #[tokio::test]
    async fn test_msisdn_mismatch() {
        let history = HistoryLookup::new(Arc::new(Rows(vec![liveness("SUCCEEDED", true)])))
            .load("s")
            .await
            .unwrap();
        assert!(history.ensure_msisdn(42).is_ok());
        assert!(matches!(
            history.ensure_msisdn(43),
            Err(FlowError::SessionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_row_is_persistence_failure() {
        let mut row = liveness("SUCCEEDED", true);
        row[0] = SqlValue::from("SELFIE");
        let err = HistoryLookup::new(Arc::new(Rows(vec![row])))
            .load("s")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::PersistenceFailure(_)));
    }
}
