//! Local face comparison: SCRFD finds faces, ArcFace embeds them.

use crate::face_detector::{FaceDetector, FaceDetectorError};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{FaceDetection, Rect};
use autokyc_core::{FaceBox, FaceComparison, FaceMatch};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("face detection: {0}")]
    Detector(#[from] FaceDetectorError),
    #[error("face recognition: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Express a pixel rectangle as ratios of the image size.
pub fn to_face_box(rect: &Rect, width: u32, height: u32) -> FaceBox {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    let r = rect.clamp_to(w, h);
    FaceBox {
        left: r.x / w,
        top: r.y / h,
        width: r.width / w,
        height: r.height / h,
    }
}

pub struct LocalFaceComparator {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    match_threshold: f32,
}

impl LocalFaceComparator {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            recognizer,
            match_threshold: 0.0,
        }
    }

    /// Target faces scoring below `percent` are reported as unmatched. At
    /// the default of 0 every scored face is a match.
    pub fn with_match_threshold(mut self, percent: f32) -> Self {
        self.match_threshold = percent;
        self
    }

    /// Compare the most prominent face in `source` against every face in `target`.
    pub fn compare(
        &mut self,
        source: &RgbImage,
        target: &RgbImage,
    ) -> Result<FaceComparison, CompareError> {
        let source_faces = self.detector.detect(source)?;
        let target_faces = self.detector.detect(target)?;
        let (tw, th) = target.dimensions();

        let Some(source_face) = best_face(&source_faces) else {
            tracing::debug!(targets = target_faces.len(), "no face in source image");
            return Ok(FaceComparison {
                source_face: None,
                matches: Vec::new(),
                unmatched_faces: target_faces
                    .iter()
                    .map(|f| to_face_box(&f.rect, tw, th))
                    .collect(),
            });
        };

        let reference = self.recognizer.embed(source, source_face)?;
        let mut comparison = FaceComparison {
            source_face: Some(to_face_box(&source_face.rect, source.width(), source.height())),
            ..FaceComparison::default()
        };

        for face in &target_faces {
            let bbox = to_face_box(&face.rect, tw, th);
            let similarity = reference.similarity_percent(&self.recognizer.embed(target, face)?);
            tracing::debug!(similarity, confidence = face.confidence, "target face scored");
            file_face(&mut comparison, bbox, similarity, self.match_threshold);
        }
        Ok(comparison)
    }
}

fn file_face(comparison: &mut FaceComparison, bbox: FaceBox, similarity: f32, threshold: f32) {
    if similarity >= threshold {
        comparison.matches.push(FaceMatch {
            similarity,
            bounding_box: bbox,
        });
    } else {
        comparison.unmatched_faces.push(bbox);
    }
}

/// Highest-confidence face that can be aligned.
fn best_face(faces: &[FaceDetection]) -> Option<&FaceDetection> {
    faces
        .iter()
        .filter(|f| f.landmarks.is_some())
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
