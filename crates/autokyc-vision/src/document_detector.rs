//! YOLO document detector via ONNX Runtime.
//!
//! Accepts both common ONNX export layouts: YOLOv5 style `[1, N, 5 + C]`
//! (box, objectness, class scores) and YOLOv8 style `[1, 4 + C, N]` (box,
//! class scores, anchors last).

use crate::letterbox::{self, Letterbox, Normalization};
use crate::types::{DocumentCandidate, Rect};
use autokyc_core::normalizer::RawDetections;
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_NORM: Normalization = Normalization {
    mean: 0.0,
    std: 255.0,
    pad: 114.0,
};
const YOLO_CONFIDENCE_THRESHOLD: f32 = 0.25;
const YOLO_IOU_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum DocumentDetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("no document classes configured")]
    NoClasses,
    #[error("unexpected output shape {shape:?} for {classes} classes")]
    OutputShape { shape: Vec<usize>, classes: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the fields of one anchor live in the flat output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `[1, N, 5 + C]`
    Objectness { anchors: usize },
    /// `[1, 4 + C, N]`
    ClassesFirst { anchors: usize },
    /// `[1, N, 4 + C]`
    ClassesLast { anchors: usize },
}

impl Layout {
    fn detect(dims: &[usize], classes: usize) -> Option<Self> {
        let [1, a, b] = *dims else {
            return None;
        };
        if a == 4 + classes && b != 5 + classes {
            Some(Layout::ClassesFirst { anchors: b })
        } else if b == 5 + classes {
            Some(Layout::Objectness { anchors: a })
        } else if b == 4 + classes {
            Some(Layout::ClassesLast { anchors: a })
        } else {
            None
        }
    }

    fn anchors(self) -> usize {
        match self {
            Layout::Objectness { anchors }
            | Layout::ClassesFirst { anchors }
            | Layout::ClassesLast { anchors } => anchors,
        }
    }

    /// Box `[cx, cy, w, h]` and best `(class, confidence)` of one anchor.
    fn read(self, data: &[f32], anchor: usize, classes: usize) -> Option<([f32; 4], usize, f32)> {
        let field = |i: usize| -> Option<f32> {
            match self {
                Layout::Objectness { .. } => data.get(anchor * (5 + classes) + i).copied(),
                Layout::ClassesLast { .. } => data.get(anchor * (4 + classes) + i).copied(),
                Layout::ClassesFirst { anchors } => data.get(i * anchors + anchor).copied(),
            }
        };
        let bbox = [field(0)?, field(1)?, field(2)?, field(3)?];

        let (first_class, objectness) = match self {
            Layout::Objectness { .. } => (5, field(4)?),
            _ => (4, 1.0),
        };
        let mut best = (0usize, f32::MIN);
        for c in 0..classes {
            let score = field(first_class + c)?;
            if score > best.1 {
                best = (c, score);
            }
        }
        Some((bbox, best.0, best.1 * objectness))
    }
}

fn decode(
    data: &[f32],
    dims: &[usize],
    classes: usize,
    lb: &Letterbox,
    image_size: (u32, u32),
) -> Result<Vec<DocumentCandidate>, DocumentDetectorError> {
    let layout = Layout::detect(dims, classes).ok_or_else(|| DocumentDetectorError::OutputShape {
        shape: dims.to_vec(),
        classes,
    })?;

    let (w, h) = (image_size.0 as f32, image_size.1 as f32);
    let mut candidates = Vec::new();
    for anchor in 0..layout.anchors() {
        let Some(([cx, cy, bw, bh], class_id, confidence)) = layout.read(data, anchor, classes)
        else {
            break;
        };
        if confidence < YOLO_CONFIDENCE_THRESHOLD {
            continue;
        }
        let (x1, y1) = lb.to_source(cx - bw / 2.0, cy - bh / 2.0);
        let (x2, y2) = lb.to_source(cx + bw / 2.0, cy + bh / 2.0);
        candidates.push(DocumentCandidate {
            rect: Rect::from_corners(x1, y1, x2, y2).clamp_to(w, h),
            confidence: confidence.min(1.0),
            class_id,
        });
    }

    // Per-class suppression, then best first across classes.
    let mut kept: Vec<DocumentCandidate> = Vec::new();
    let mut class_ids: Vec<usize> = candidates.iter().map(|c| c.class_id).collect();
    class_ids.sort_unstable();
    class_ids.dedup();
    for class_id in class_ids {
        let same: Vec<_> = candidates.iter().filter(|c| c.class_id == class_id).cloned().collect();
        kept.extend(letterbox::nms(same, YOLO_IOU_THRESHOLD));
    }
    kept.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(kept)
}

pub struct YoloDocumentDetector {
    session: Session,
    class_names: Vec<String>,
}

impl YoloDocumentDetector {
    /// `class_names[i]` is the label of class id `i`.
    pub fn load(model_path: &Path, class_names: Vec<String>) -> Result<Self, DocumentDetectorError> {
        if !model_path.exists() {
            return Err(DocumentDetectorError::ModelNotFound(model_path.display().to_string()));
        }
        if class_names.is_empty() {
            return Err(DocumentDetectorError::NoClasses);
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(
            path = %model_path.display(),
            classes = ?class_names,
            "loaded YOLO document model"
        );
        Ok(Self {
            session,
            class_names,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Detections as `[x1, y1, x2, y2, confidence, class_id]` rows, best first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<RawDetections, DocumentDetectorError> {
        let (input, lb) = letterbox::to_tensor(image, YOLO_INPUT_SIZE, YOLO_NORM);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DocumentDetectorError::InferenceFailed(e.to_string()))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let candidates = decode(
            data,
            &dims,
            self.class_names.len(),
            &lb,
            image.dimensions(),
        )?;
        tracing::debug!(count = candidates.len(), "document candidates");

        Ok(RawDetections {
            rows: candidates.iter().map(DocumentCandidate::to_row).collect(),
            class_names: self.class_names.clone(),
        })
    }
}
