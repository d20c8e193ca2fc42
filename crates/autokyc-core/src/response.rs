//! Client-facing response payloads and the shared response code table.

use crate::types::DocumentType;
use serde::{Deserialize, Serialize};

/// Flow response codes shared by the liveness, document and face-compare
/// steps. These are not HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ResponseCode {
    LivenessSucceeded,
    LivenessFailed,
    /// 100: the document was recorded but not accepted; capture the same side
    /// again. Legacy clients read 100 as "document detected"; this code no
    /// longer carries that meaning, and success is reported as 200 or 300.
    CaptureAgain,
    RedirectToBack,
    DirectToFaceCompare,
    Verified,
    NeedsBack,
    NoDocumentDetected,
    InvalidDetectionData,
    InvalidSequence,
    TypeMismatch,
    UnrecognizedDocument,
    SessionMismatch,
}

impl ResponseCode {
    const TABLE: [(ResponseCode, u16, &'static str); 13] = [
        (ResponseCode::LivenessSucceeded, 10, "Liveness Succeeded"),
        (ResponseCode::LivenessFailed, 11, "Retry Liveness"),
        (ResponseCode::CaptureAgain, 100, "Capture Again"),
        (ResponseCode::RedirectToBack, 200, "Redirect to Back"),
        (ResponseCode::DirectToFaceCompare, 300, "Direct to Face Compare"),
        (ResponseCode::Verified, 400, "Done"),
        (ResponseCode::NeedsBack, 469, "Redirect to Back"),
        (ResponseCode::NoDocumentDetected, 450, "No Document Detected"),
        (ResponseCode::InvalidDetectionData, 451, "Invalid Detection Data"),
        (ResponseCode::InvalidSequence, 452, "Invalid Sequence"),
        (ResponseCode::TypeMismatch, 453, "Document Type Mismatch"),
        (ResponseCode::UnrecognizedDocument, 454, "Unrecognized Document"),
        (ResponseCode::SessionMismatch, 455, "Session Mismatch"),
    ];

    fn entry(self) -> (u16, &'static str) {
        Self::TABLE
            .iter()
            .find(|(c, _, _)| *c == self)
            .map(|(_, n, d)| (*n, *d))
            .unwrap_or((0, ""))
    }

    pub fn code(self) -> u16 {
        self.entry().0
    }

    pub fn description(self) -> &'static str {
        self.entry().1
    }

    pub fn is_rejection(self) -> bool {
        (450..460).contains(&self.code())
    }
}

impl From<ResponseCode> for u16 {
    fn from(code: ResponseCode) -> u16 {
        code.code()
    }
}

impl TryFrom<u16> for ResponseCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        ResponseCode::TABLE
            .iter()
            .find(|(_, n, _)| *n == value)
            .map(|(c, _, _)| *c)
            .ok_or_else(|| format!("unknown response code {value}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowData {
    pub is_document_scan_completed: bool,
    pub is_verified: bool,
    pub is_back_document_need: bool,
    pub document_type: DocumentType,
}

/// Response of the document-detection and face-compare steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowResponse {
    #[serde(rename = "ResponseData")]
    pub data: FlowData,
    pub response_code: ResponseCode,
    pub response_description: String,
}

impl FlowResponse {
    pub fn new(
        code: ResponseCode,
        document_type: DocumentType,
        scan_completed: bool,
        verified: bool,
        back_needed: bool,
    ) -> Self {
        Self {
            data: FlowData {
                is_document_scan_completed: scan_completed,
                is_verified: verified,
                is_back_document_need: back_needed,
                document_type,
            },
            response_code: code,
            response_description: code.description().to_string(),
        }
    }

    pub fn rejected(code: ResponseCode, document_type: DocumentType, detail: String) -> Self {
        let mut response = Self::new(code, document_type, false, false, false);
        response.response_description = format!("{}: {detail}", code.description());
        response
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LivenessData {
    pub is_liveness_completed: bool,
}

/// Response of the liveness step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LivenessResponse {
    #[serde(rename = "ResponseData")]
    pub data: LivenessData,
    pub response_code: ResponseCode,
    pub response_description: String,
}

impl LivenessResponse {
    pub fn new(completed: bool) -> Self {
        let code = if completed {
            ResponseCode::LivenessSucceeded
        } else {
            ResponseCode::LivenessFailed
        };
        Self {
            data: LivenessData {
                is_liveness_completed: completed,
            },
            response_code: code,
            response_description: code.description().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for (_, n, _) in ResponseCode::TABLE {
            assert!(seen.insert(n), "duplicate code {n}");
        }
    }

    #[test]
    fn test_flow_response_wire_shape() {
        let response = FlowResponse::new(
            ResponseCode::RedirectToBack,
            DocumentType::NationalId,
            false,
            false,
            true,
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ResponseCode"], 200);
        assert_eq!(json["ResponseDescription"], "Redirect to Back");
        assert_eq!(json["ResponseData"]["IsBackDocumentNeed"], true);
        assert_eq!(json["ResponseData"]["IsDocumentScanCompleted"], false);
        assert_eq!(json["ResponseData"]["DocumentType"], 3);
    }

    #[test]
    fn test_response_code_parses_back() {
        let code: ResponseCode = serde_json::from_str("469").unwrap();
        assert_eq!(code, ResponseCode::NeedsBack);
        assert!(serde_json::from_str::<ResponseCode>("999").is_err());
    }

    #[test]
    fn test_code_100_asks_for_recapture() {
        assert_eq!(ResponseCode::CaptureAgain.code(), 100);
        assert_eq!(ResponseCode::CaptureAgain.description(), "Capture Again");
        assert!(!ResponseCode::CaptureAgain.is_rejection());
    }

    #[test]
    fn test_rejection_range() {
        assert!(ResponseCode::TypeMismatch.is_rejection());
        assert!(!ResponseCode::NeedsBack.is_rejection());
        assert!(!ResponseCode::Verified.is_rejection());
    }

    #[test]
    fn test_liveness_response() {
        let ok = LivenessResponse::new(true);
        assert_eq!(ok.response_code.code(), 10);
        let json = serde_json::to_value(&LivenessResponse::new(false)).unwrap();
        assert_eq!(json["ResponseCode"], 11);
        assert_eq!(json["ResponseData"]["IsLivenessCompleted"], false);
    }
}
