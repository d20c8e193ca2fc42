//! Detection Normalizer: raw detector rows → [`DocumentDetection`].

use crate::error::FlowError;
use crate::types::{DocumentBox, DocumentDetection, DocumentType, Side};
use serde::{Deserialize, Serialize};

/// Fields per raw row: 4 box coordinates, confidence, class id.
pub const RAW_DETECTION_FIELDS: usize = 6;

/// Raw output of the document detector.
///
/// `rows` are `[x1, y1, x2, y2, confidence, class_id]`, best first.
/// `class_names[class_id]` is the detector's label for that class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetections {
    pub rows: Vec<Vec<f32>>,
    pub class_names: Vec<String>,
}

/// Split a label into its type prefix and capture side.
///
/// The side is the trailing `F`/`B`; any other label is all prefix.
pub fn split_label(label: &str) -> (&str, Side) {
    if let Some(prefix) = label.strip_suffix('F') {
        (prefix, Side::Front)
    } else if let Some(prefix) = label.strip_suffix('B') {
        (prefix, Side::Back)
    } else {
        (label, Side::Unspecified)
    }
}

/// Normalize one labelled detection.
///
/// Unknown prefixes yield [`DocumentType::Unknown`]; rejecting those is the
/// sequencer's call. A confidence outside `[0, 1]` breaks the detector
/// contract and is not a user error.
pub fn normalize(
    raw_label: &str,
    raw_confidence: f32,
    raw_box: [f32; 4],
) -> Result<DocumentDetection, FlowError> {
    if !(0.0..=1.0).contains(&raw_confidence) {
        return Err(FlowError::DetectorContract(format!(
            "confidence {raw_confidence} outside [0, 1] for label {raw_label:?}"
        )));
    }
    if raw_box.iter().any(|v| !v.is_finite()) {
        return Err(FlowError::InvalidDetectionData(format!(
            "non-finite bounding box {raw_box:?}"
        )));
    }

    let (prefix, side) = split_label(raw_label);
    let document_type = DocumentType::from_prefix(prefix);
    if !document_type.is_known() {
        tracing::warn!(
            label = raw_label,
            code = DocumentType::UNKNOWN_CODE,
            "detector label has no known document prefix"
        );
    }

    Ok(DocumentDetection {
        document_type,
        side,
        raw_label: raw_label.to_string(),
        bounding_box: DocumentBox {
            x1: raw_box[0],
            y1: raw_box[1],
            x2: raw_box[2],
            y2: raw_box[3],
        },
        confidence: raw_confidence,
    })
}

/// Normalize the best (first) row of a raw detector result.
pub fn normalize_primary(raw: &RawDetections) -> Result<DocumentDetection, FlowError> {
    let row = raw.rows.first().ok_or(FlowError::NoDocumentDetected)?;

    if row.len() < RAW_DETECTION_FIELDS {
        return Err(FlowError::InvalidDetectionData(format!(
            "expected {RAW_DETECTION_FIELDS} fields per detection, got {}",
            row.len()
        )));
    }

    let class_id = row[5];
    if !class_id.is_finite() || class_id < 0.0 || class_id.fract() != 0.0 {
        return Err(FlowError::InvalidDetectionData(format!(
            "class id {class_id} is not an index"
        )));
    }
    let label = raw
        .class_names
        .get(class_id as usize)
        .ok_or_else(|| {
            FlowError::InvalidDetectionData(format!(
                "class id {class_id} outside {} known classes",
                raw.class_names.len()
            ))
        })?;

    normalize(label, row[4], [row[0], row[1], row[2], row[3]])
}
