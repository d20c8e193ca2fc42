//! Verification service: one entry point per client step.
//!
//! Each call loads the session history, derives the state, runs the
//! collaborators under a per-request deadline, records the step and returns
//! the sequencer's response.

use crate::collaborators::{
    photo_path, BlobStore, Database, Deadline, DocumentDetector, FaceComparator, StagedBlob,
};
use crate::error::{Collaborator, FlowError};
use crate::face_compare::FaceCompareOrchestrator;
use crate::history::{HistoryLookup, SessionHistory};
use crate::normalizer::normalize_primary;
use crate::policy::MatchSelection;
use crate::recorder::StepRecorder;
use crate::response::{FlowResponse, LivenessResponse};
use crate::sequencer::{self, Plan, SessionState, Transition};
use crate::types::{DetectionResult, DocumentType, LivenessResult, Side, StepContext};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const FRONT_IMAGE_SUFFIX: &str = "front_image";
pub const BACK_IMAGE_SUFFIX: &str = "back_image";

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Budget for all collaborator calls of one request.
    pub step_timeout: Duration,
    pub match_selection: MatchSelection,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(20),
            match_selection: MatchSelection::Highest,
        }
    }
}

/// Recorded steps plus the state derived from them.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub prior_document: Option<(DocumentType, Side)>,
    #[serde(flatten)]
    pub history: SessionHistory,
}

impl SessionView {
    pub fn new(history: SessionHistory) -> Self {
        Self {
            state: history.state(),
            prior_document: history.prior_document(),
            history,
        }
    }
}

#[derive(Clone)]
pub struct VerificationService {
    detector: Arc<dyn DocumentDetector>,
    blobs: Arc<dyn BlobStore>,
    history: HistoryLookup,
    recorder: StepRecorder,
    face_compare: FaceCompareOrchestrator,
    settings: ServiceSettings,
}

impl VerificationService {
    pub fn new(
        detector: Arc<dyn DocumentDetector>,
        comparator: Arc<dyn FaceComparator>,
        blobs: Arc<dyn BlobStore>,
        db: Arc<dyn Database>,
        settings: ServiceSettings,
    ) -> Self {
        let recorder = StepRecorder::new(Arc::clone(&db));
        let face_compare = FaceCompareOrchestrator::new(
            comparator,
            Arc::clone(&blobs),
            recorder.clone(),
            settings.match_selection,
        );
        Self {
            detector,
            blobs,
            history: HistoryLookup::new(db),
            recorder,
            face_compare,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    async fn load_history(&self, session_id: &str, msisdn: i64) -> Result<SessionHistory, FlowError> {
        let history = self.history.load(session_id).await?;
        history.ensure_msisdn(msisdn)?;
        Ok(history)
    }

    /// Record the outcome of a provider liveness session.
    pub async fn submit_liveness(&self, liveness: LivenessResult) -> Result<LivenessResponse, FlowError> {
        let history = self.load_history(&liveness.session_id, liveness.msisdn).await?;
        let state = history.state();

        if let Some(response) = sequencer::plan_liveness(state) {
            tracing::info!(session_id = %liveness.session_id, ?state, "liveness already complete");
            return Ok(response);
        }

        let outcome = self.recorder.record_liveness(&liveness).await?;
        let (next, response) = sequencer::after_liveness(state, liveness.status, &outcome);
        tracing::info!(
            session_id = %liveness.session_id,
            status = liveness.status.as_provider(),
            ?next,
            code = response.response_code.code(),
            "liveness step"
        );
        Ok(response)
    }

    /// Classify an uploaded document photo and advance the session.
    pub async fn submit_document(
        &self,
        ctx: &StepContext,
        image: Vec<u8>,
    ) -> Result<FlowResponse, FlowError> {
        let deadline = Deadline::after(self.settings.step_timeout);
        let history = self.load_history(&ctx.session_id, ctx.msisdn).await?;
        let state = history.state();
        if state == SessionState::AwaitingLiveness {
            return Err(FlowError::InvalidSequence(
                "liveness must succeed before document capture".into(),
            ));
        }

        let raw = deadline
            .run(Collaborator::DocumentDetector, self.detector.detect(image.clone()))
            .await?;
        let detection = normalize_primary(&raw)?;
        tracing::debug!(
            session_id = %ctx.session_id,
            label = %detection.raw_label,
            confidence = detection.confidence,
            "document detected"
        );

        let attempt = match sequencer::plan_document(
            state,
            &detection,
            history.detections_of(detection.side),
        )? {
            Plan::Replay(response) => {
                tracing::info!(
                    session_id = %ctx.session_id,
                    label = %detection.raw_label,
                    ?state,
                    "step already passed; replaying current state"
                );
                return Ok(response);
            }
            Plan::Record { attempt } => attempt,
        };

        let suffix = match detection.side {
            Side::Back => BACK_IMAGE_SUFFIX,
            _ => FRONT_IMAGE_SUFFIX,
        };
        let attempt_id = Uuid::new_v4();
        let path = photo_path(ctx.msisdn, &ctx.session_id, suffix, attempt_id, Utc::now());
        let staged = StagedBlob::put(Arc::clone(&self.blobs), path, image, &deadline).await?;

        let result = DetectionResult::new(ctx, detection.clone(), staged.path().to_string());
        deadline.check(Collaborator::DocumentDetector)?;
        let outcome = self.recorder.record_detection(&result, attempt).await?;
        let image_path = staged.commit();

        let transition = sequencer::after_document(state, &detection, &outcome)?;
        tracing::info!(
            session_id = %ctx.session_id,
            label = %detection.raw_label,
            accepted = outcome.status.is_accepted(),
            next = ?transition.next,
            code = transition.response.response_code.code(),
            "document step"
        );

        if !transition.auto_face_compare {
            return Ok(transition.response);
        }
        let front_path = match detection.side {
            Side::Front => Some(image_path.as_str()),
            _ => history.front_image(),
        };
        self.auto_face_compare(ctx, transition, detection.side, front_path, &history, &deadline)
            .await
    }

    /// Face compare right after the document stage, using stored images.
    async fn auto_face_compare(
        &self,
        ctx: &StepContext,
        transition: Transition,
        side: Side,
        front_path: Option<&str>,
        history: &SessionHistory,
        deadline: &Deadline,
    ) -> Result<FlowResponse, FlowError> {
        let (Some(front_path), Some(liveness_path)) = (front_path, history.liveness_image()) else {
            tracing::info!(
                session_id = %ctx.session_id,
                "stored images unavailable; face compare left to the client"
            );
            return Ok(transition.response);
        };

        let images = async {
            let front = deadline
                .run(Collaborator::BlobStore, self.blobs.get(front_path))
                .await?;
            let liveness = deadline
                .run(Collaborator::BlobStore, self.blobs.get(liveness_path))
                .await?;
            self.face_compare
                .compare(ctx, transition.next, front, liveness, deadline)
                .await
        };

        match images.await {
            Ok(compared) if side == Side::Back => Ok(compared.response),
            Ok(compared) => {
                let mut response = transition.response;
                response.data.is_verified = matches!(compared.next, SessionState::Verified(_));
                Ok(response)
            }
            Err(err @ FlowError::CollaboratorUnavailable { .. }) => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    error = %err,
                    "automatic face compare skipped"
                );
                Ok(transition.response)
            }
            Err(err) => Err(err),
        }
    }

    /// Compare a client-supplied document front with a liveness capture.
    pub async fn submit_face_compare(
        &self,
        ctx: &StepContext,
        front_image: Vec<u8>,
        liveness_image: Vec<u8>,
    ) -> Result<FlowResponse, FlowError> {
        let deadline = Deadline::after(self.settings.step_timeout);
        let history = self.load_history(&ctx.session_id, ctx.msisdn).await?;
        let state = history.state();

        if let Plan::Replay(response) = sequencer::plan_face_compare(state)? {
            tracing::info!(session_id = %ctx.session_id, "session already verified");
            return Ok(response);
        }

        let transition = self
            .face_compare
            .compare(ctx, state, front_image, liveness_image, &deadline)
            .await?;
        tracing::info!(
            session_id = %ctx.session_id,
            next = ?transition.next,
            code = transition.response.response_code.code(),
            "face compare step"
        );
        Ok(transition.response)
    }

    pub async fn session(&self, session_id: &str) -> Result<SessionView, FlowError> {
        Ok(SessionView::new(self.history.load(session_id).await?))
    }
}
