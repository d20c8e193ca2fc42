use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity document family, as recognised by the document detector.
///
/// Serialized as the numeric code the mobile client and the procedure layer
/// use (`1..=4`, `-1` for [`DocumentType::Unknown`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum DocumentType {
    Citizenship,
    DrivingLicense,
    NationalId,
    Passport,
    /// Sentinel for a label whose prefix is not in the table. Never coerced
    /// to a real type.
    Unknown,
}

impl DocumentType {
    pub const UNKNOWN_CODE: i32 = -1;

    /// Label prefix → type table.
    const PREFIXES: [(&'static str, DocumentType); 4] = [
        ("CS", DocumentType::Citizenship),
        ("DL", DocumentType::DrivingLicense),
        ("NID", DocumentType::NationalId),
        ("PP", DocumentType::Passport),
    ];

    pub fn from_prefix(prefix: &str) -> Self {
        Self::PREFIXES
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, t)| *t)
            .unwrap_or(DocumentType::Unknown)
    }

    pub fn code(self) -> i32 {
        match self {
            DocumentType::Citizenship => 1,
            DocumentType::DrivingLicense => 2,
            DocumentType::NationalId => 3,
            DocumentType::Passport => 4,
            DocumentType::Unknown => Self::UNKNOWN_CODE,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => DocumentType::Citizenship,
            2 => DocumentType::DrivingLicense,
            3 => DocumentType::NationalId,
            4 => DocumentType::Passport,
            _ => DocumentType::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != DocumentType::Unknown
    }
}

impl From<DocumentType> for i32 {
    fn from(t: DocumentType) -> i32 {
        t.code()
    }
}

impl From<i32> for DocumentType {
    fn from(code: i32) -> Self {
        DocumentType::from_code(code)
    }
}

/// Which face of the document was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Front,
    Back,
    /// The label carried no `F`/`B` marker.
    Unspecified,
}

impl Side {
    /// Single-letter marker used in labels and in the procedure layer.
    pub fn marker(self) -> &'static str {
        match self {
            Side::Front => "F",
            Side::Back => "B",
            Side::Unspecified => "",
        }
    }

    pub fn from_marker(marker: &str) -> Self {
        match marker {
            "F" => Side::Front,
            "B" => Side::Back,
            _ => Side::Unspecified,
        }
    }
}

/// Document region in source-image pixels, `(x1, y1)` top-left to `(x2, y2)`
/// bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DocumentBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl DocumentBox {
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match values {
            [x1, y1, x2, y2, ..] => Some(Self {
                x1: *x1,
                y1: *y1,
                x2: *x2,
                y2: *y2,
            }),
            _ => None,
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Face region as fractions of the image size (`0.0..=1.0`), the way face
/// comparison providers report it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Who the step belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContext {
    pub session_id: String,
    pub csid: String,
    pub msisdn: i64,
}

/// Canonical detector output for a single document crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDetection {
    pub document_type: DocumentType,
    pub side: Side,
    pub raw_label: String,
    pub bounding_box: DocumentBox,
    /// Fraction in `[0, 1]`.
    pub confidence: f32,
}

/// A normalized detection bound to a session, ready to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub session_id: String,
    pub csid: String,
    pub msisdn: i64,
    pub document_type: DocumentType,
    pub side: Side,
    pub raw_label: String,
    pub bounding_box: DocumentBox,
    pub confidence: f32,
    pub image_path: String,
    pub captured_at: DateTime<Utc>,
}

impl DetectionResult {
    pub fn new(ctx: &StepContext, detection: DocumentDetection, image_path: String) -> Self {
        Self {
            session_id: ctx.session_id.clone(),
            csid: ctx.csid.clone(),
            msisdn: ctx.msisdn,
            document_type: detection.document_type,
            side: detection.side,
            raw_label: detection.raw_label,
            bounding_box: detection.bounding_box,
            confidence: detection.confidence,
            image_path,
            captured_at: Utc::now(),
        }
    }
}

/// One face in the target image that matched the source face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    /// Percentage in `[0, 100]`.
    pub similarity: f32,
    pub bounding_box: FaceBox,
}

/// Raw result of the face comparator collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceComparison {
    /// Face located in the source (document) image, if any.
    pub source_face: Option<FaceBox>,
    pub matches: Vec<FaceMatch>,
    pub unmatched_faces: Vec<FaceBox>,
}

/// One face-compare attempt, ready to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCompareResult {
    pub session_id: String,
    pub csid: String,
    pub msisdn: i64,
    /// Percentage in `[0, 100]`.
    pub similarity: f32,
    pub matched_face: Option<FaceBox>,
    pub cropped_image_path: Option<String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivenessStatus {
    Succeeded,
    Failed,
}

impl LivenessStatus {
    /// Map a provider status string. Anything but `SUCCEEDED` is a failure
    /// (`FAILED`, `EXPIRED`, `IN_PROGRESS`, ...).
    pub fn from_provider(status: &str) -> Self {
        if status.eq_ignore_ascii_case("SUCCEEDED") {
            LivenessStatus::Succeeded
        } else {
            LivenessStatus::Failed
        }
    }

    pub fn as_provider(self) -> &'static str {
        match self {
            LivenessStatus::Succeeded => "SUCCEEDED",
            LivenessStatus::Failed => "FAILED",
        }
    }
}

/// Frame the liveness provider kept as evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditImage {
    pub bounding_box: Option<FaceBox>,
    pub bucket: Option<String>,
    pub object_name: Option<String>,
}

/// Outcome of the provider-side liveness session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessResult {
    pub session_id: String,
    pub csid: String,
    pub msisdn: i64,
    pub confidence: f32,
    pub bounding_box: Option<FaceBox>,
    pub status: LivenessStatus,
    /// Blob path of the face image later used for face comparison.
    pub reference_image_path: Option<String>,
    pub audit_images: Vec<AuditImage>,
    pub captured_at: DateTime<Utc>,
}

/// Business-rule verdict returned by a recording procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// Sufficient to progress.
    Accepted,
    /// Retry or redirect required.
    Retry,
    /// A value other than 0/1. Treated as not accepted.
    Unknown(i64),
}

impl StepStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => StepStatus::Accepted,
            0 => StepStatus::Retry,
            other => StepStatus::Unknown(other),
        }
    }

    /// Decode the big-endian byte string the procedure layer returns.
    ///
    /// Returns `None` for an empty or over-long (> 8 bytes) value.
    pub fn from_be_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        let code = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        Some(Self::from_code(code as i64))
    }

    pub fn code(self) -> i64 {
        match self {
            StepStatus::Accepted => 1,
            StepStatus::Retry => 0,
            StepStatus::Unknown(code) => code,
        }
    }

    pub fn is_accepted(self) -> bool {
        self == StepStatus::Accepted
    }
}

/// What a recording procedure returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub message: String,
    pub status: StepStatus,
    pub sp_code: i64,
}
