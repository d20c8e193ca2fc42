//! SCRFD face detector via ONNX Runtime.
//!
//! Finds faces and their five landmarks in document photos and liveness
//! captures. Three anchor strides are decoded and merged by NMS.

use crate::letterbox::{self, Letterbox, Normalization};
use crate::types::{FaceDetection, Rect};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_NORM: Normalization = Normalization {
    mean: 127.5,
    std: 128.0,
    pad: 127.5,
};
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum FaceDetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, FaceDetectorError> {
        if !model_path.exists() {
            return Err(FaceDetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(FaceDetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), got {}",
                names.len()
            )));
        }
        let stride_outputs = output_layout(&names);
        tracing::info!(path = %model_path.display(), ?stride_outputs, "loaded SCRFD model");

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    /// Faces in `image`, best first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, FaceDetectorError> {
        let (input, lb) = letterbox::to_tensor(image, SCRFD_INPUT_SIZE, SCRFD_NORM);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut faces = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (si, bi, ki) = self.stride_outputs[pos];
            let fail = |what: &str, e: ort::Error| {
                FaceDetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
            };
            let (_, scores) = outputs[si]
                .try_extract_tensor::<f32>()
                .map_err(|e| fail("scores", e))?;
            let (_, boxes) = outputs[bi]
                .try_extract_tensor::<f32>()
                .map_err(|e| fail("boxes", e))?;
            let (_, kps) = outputs[ki]
                .try_extract_tensor::<f32>()
                .map_err(|e| fail("landmarks", e))?;
            faces.extend(decode_stride(scores, boxes, kps, stride, &lb));
        }

        Ok(letterbox::nms(faces, SCRFD_NMS_THRESHOLD))
    }
}

/// Map outputs to strides by name (`score_8`, `bbox_16`, `kps_32`, ...).
/// Exports with numeric names use the positional layout
/// `[scores 8/16/32, boxes 8/16/32, kps 8/16/32]`.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognized; using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode one stride's anchors above the confidence threshold.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    lb: &Letterbox,
) -> Vec<FaceDetection> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let step = stride as f32;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCRFD_CONFIDENCE_THRESHOLD {
                return None;
            }
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let b = boxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = lb.to_source(ax - b[0] * step, ay - b[1] * step);
            let (x2, y2) = lb.to_source(ax + b[2] * step, ay + b[3] * step);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| lb.to_source(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
            });

            Some(FaceDetection {
                rect: Rect::from_corners(x1, y1, x2, y2),
                confidence: score,
                landmarks,
            })
        })
        .collect()
}
