use async_trait::async_trait;
use autokyc_core::collaborators::CollaboratorError;
use autokyc_core::normalizer::RawDetections;
use autokyc_core::{DocumentDetector, FaceComparator, FaceComparison};
use autokyc_vision::{
    CompareError, DocumentDetectorError, FaceDetector, FaceDetectorError, FaceRecognizer,
    LocalFaceComparator, RecognizerError, YoloDocumentDetector,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("document detector error: {0}")]
    Document(#[from] DocumentDetectorError),
    #[error("face detector error: {0}")]
    FaceDetector(#[from] FaceDetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("face compare error: {0}")]
    Compare(#[from] CompareError),
    #[error("undecodable image: {0}")]
    InvalidImage(String),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("cannot start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<EngineError> for CollaboratorError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidImage(reason) => CollaboratorError::InvalidImage(reason),
            other => CollaboratorError::Failed(other.to_string()),
        }
    }
}

/// Models the engine thread serves, reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub document_model: String,
    pub document_classes: Vec<String>,
    pub face_detector_model: String,
    pub face_recognizer_model: String,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<RawDetections, EngineError>>,
    },
    Compare {
        source: Vec<u8>,
        target: Vec<u8>,
        reply: oneshot::Sender<Result<FaceComparison, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    models: Arc<ModelInfo>,
}

impl EngineHandle {
    pub fn models(&self) -> &ModelInfo {
        &self.models
    }

    /// False once the engine thread has gone away.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Classify a document photo.
    pub async fn detect_document(&self, image: Vec<u8>) -> Result<RawDetections, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Compare the face on a document with the faces in a liveness capture.
    pub async fn compare_faces(
        &self,
        source: Vec<u8>,
        target: Vec<u8>,
    ) -> Result<FaceComparison, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Compare {
                source,
                target,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

#[async_trait]
impl DocumentDetector for EngineHandle {
    async fn detect(&self, image: Vec<u8>) -> Result<RawDetections, CollaboratorError> {
        Ok(self.detect_document(image).await?)
    }
}

#[async_trait]
impl FaceComparator for EngineHandle {
    async fn compare(
        &self,
        source: Vec<u8>,
        target: Vec<u8>,
    ) -> Result<FaceComparison, CollaboratorError> {
        Ok(self.compare_faces(source, target).await?)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads all three ONNX models synchronously, then enters a request loop.
/// Fails fast at startup if any model is unavailable.
pub fn spawn_engine(
    document_model: &Path,
    document_classes: Vec<String>,
    scrfd_path: &Path,
    arcface_path: &Path,
    face_match_threshold: f32,
) -> Result<EngineHandle, EngineError> {
    let mut documents = YoloDocumentDetector::load(document_model, document_classes.clone())?;
    let detector = FaceDetector::load(scrfd_path)?;
    let recognizer = FaceRecognizer::load(arcface_path)?;
    let mut faces =
        LocalFaceComparator::new(detector, recognizer).with_match_threshold(face_match_threshold);

    let models = Arc::new(ModelInfo {
        document_model: document_model.display().to_string(),
        document_classes,
        face_detector_model: scrfd_path.display().to_string(),
        face_recognizer_model: arcface_path.display().to_string(),
    });

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("autokyc-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let result = run_detect(&mut documents, &image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Compare {
                        source,
                        target,
                        reply,
                    } => {
                        let result = run_compare(&mut faces, &source, &target);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, models })
}

fn decode(bytes: &[u8], what: &str) -> Result<image::RgbImage, EngineError> {
    autokyc_vision::decode_image(bytes)
        .map_err(|e| EngineError::InvalidImage(format!("{what}: {e}")))
}

fn run_detect(
    detector: &mut YoloDocumentDetector,
    bytes: &[u8],
) -> Result<RawDetections, EngineError> {
    let image = decode(bytes, "document")?;
    let started = std::time::Instant::now();
    let detections = detector.detect(&image)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        boxes = detections.rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "document detection"
    );
    Ok(detections)
}

fn run_compare(
    comparator: &mut LocalFaceComparator,
    source: &[u8],
    target: &[u8],
) -> Result<FaceComparison, EngineError> {
    let source = decode(source, "document front")?;
    let target = decode(target, "liveness image")?;
    let started = std::time::Instant::now();
    let comparison = comparator.compare(&source, &target)?;
    tracing::debug!(
        source_face = comparison.source_face.is_some(),
        matches = comparison.matches.len(),
        unmatched = comparison.unmatched_faces.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "face comparison"
    );
    Ok(comparison)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_image_maps_to_rejection() {
        let err: CollaboratorError = EngineError::InvalidImage("truncated".into()).into();
        assert!(matches!(err, CollaboratorError::InvalidImage(r) if r == "truncated"));
    }

    #[test]
    fn test_engine_faults_map_to_failure() {
        let err: CollaboratorError = EngineError::ChannelClosed.into();
        assert_eq!(err, CollaboratorError::Failed("engine thread exited".into()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode(b"GIF89a-nope", "document"),
            Err(EngineError::InvalidImage(r)) if r.starts_with("document: ")
        ));
    }

    #[test]
    fn test_missing_models_fail_fast() {
        let missing = Path::new("/nonexistent/model.onnx");
        let result = spawn_engine(missing, vec!["NIDF".into()], missing, missing, 0.0);
        assert!(matches!(
            result,
            Err(EngineError::Document(DocumentDetectorError::ModelNotFound(_)))
        ));
    }
}
