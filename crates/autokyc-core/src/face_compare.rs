//! Face Compare Orchestrator: runs the comparator, stores the face crop,
//! records the attempt and hands the verdict to the sequencer.

use crate::collaborators::{photo_path, BlobStore, Deadline, FaceComparator, StagedBlob};
use crate::crop::crop_face;
use crate::error::{Collaborator, FlowError};
use crate::policy::MatchSelection;
use crate::recorder::StepRecorder;
use crate::sequencer::{self, SessionState, Transition};
use crate::types::{FaceBox, FaceCompareResult, StepContext};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub const CROPPED_IMAGE_SUFFIX: &str = "cropped_image";

#[derive(Clone)]
pub struct FaceCompareOrchestrator {
    comparator: Arc<dyn FaceComparator>,
    blobs: Arc<dyn BlobStore>,
    recorder: StepRecorder,
    selection: MatchSelection,
}

impl FaceCompareOrchestrator {
    pub fn new(
        comparator: Arc<dyn FaceComparator>,
        blobs: Arc<dyn BlobStore>,
        recorder: StepRecorder,
        selection: MatchSelection,
    ) -> Self {
        Self {
            comparator,
            blobs,
            recorder,
            selection,
        }
    }

    /// Compare the document face with the liveness face for a session in
    /// `state` (which must be awaiting face compare).
    pub async fn compare(
        &self,
        ctx: &StepContext,
        state: SessionState,
        front_image: Vec<u8>,
        liveness_image: Vec<u8>,
        deadline: &Deadline,
    ) -> Result<Transition, FlowError> {
        let comparison = deadline
            .run(
                Collaborator::FaceComparator,
                self.comparator.compare(front_image.clone(), liveness_image),
            )
            .await?;

        let selected = self.selection.select(&comparison.matches);
        let similarity = selected.map(|m| m.similarity).unwrap_or(0.0);
        if !(0.0..=100.0).contains(&similarity) {
            return Err(FlowError::DetectorContract(format!(
                "similarity {similarity} outside [0, 100]"
            )));
        }
        tracing::info!(
            session_id = %ctx.session_id,
            similarity,
            matches = comparison.matches.len(),
            unmatched = comparison.unmatched_faces.len(),
            "face comparison complete"
        );

        let crop = match comparison.source_face {
            Some(face) if !face.is_empty() => {
                self.store_crop(ctx, &front_image, &face, deadline).await?
            }
            _ => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    "no source face bounding box; skipping crop"
                );
                None
            }
        };

        let result = FaceCompareResult {
            session_id: ctx.session_id.clone(),
            csid: ctx.csid.clone(),
            msisdn: ctx.msisdn,
            similarity,
            matched_face: selected.map(|m| m.bounding_box),
            cropped_image_path: crop.as_ref().map(|c| c.path().to_string()),
            captured_at: Utc::now(),
        };

        deadline.check(Collaborator::FaceComparator)?;
        let outcome = self.recorder.record_face_compare(&result).await?;
        if let Some(crop) = crop {
            crop.commit();
        }
        sequencer::after_face_compare(state, &outcome)
    }

    /// Crop failures are logged and skipped; only storage faults propagate.
    async fn store_crop(
        &self,
        ctx: &StepContext,
        front_image: &[u8],
        face: &FaceBox,
        deadline: &Deadline,
    ) -> Result<Option<StagedBlob>, FlowError> {
        let jpeg = match crop_face(front_image, face) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                tracing::warn!(session_id = %ctx.session_id, error = %err, "face crop failed");
                return Ok(None);
            }
        };
        let path = photo_path(
            ctx.msisdn,
            &ctx.session_id,
            CROPPED_IMAGE_SUFFIX,
            Uuid::new_v4(),
            Utc::now(),
        );
        let staged = StagedBlob::put(Arc::clone(&self.blobs), path, jpeg, deadline).await?;
        Ok(Some(staged))
    }
}
