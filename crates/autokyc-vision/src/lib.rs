//! autokyc-vision: on-device models behind the verification flow.
//!
//! YOLO classifies and locates identity documents. SCRFD finds faces and
//! ArcFace embeds them for document-to-liveness comparison. All models run
//! on CPU through ONNX Runtime.

pub mod alignment;
pub mod comparator;
pub mod document_detector;
pub mod face_detector;
pub mod letterbox;
pub mod recognizer;
pub mod types;

pub use comparator::{CompareError, LocalFaceComparator};
pub use document_detector::{DocumentDetectorError, YoloDocumentDetector};
pub use face_detector::{FaceDetector, FaceDetectorError};
pub use recognizer::{FaceRecognizer, RecognizerError};
pub use types::{DocumentCandidate, Embedding, FaceDetection, Rect};

/// Decode an uploaded photo (JPEG, PNG, ...) into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<image::RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}
