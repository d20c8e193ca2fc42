use crate::response::{FlowResponse, ResponseCode};
use crate::types::DocumentType;
use thiserror::Error;

/// Which collaborator a fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    DocumentDetector,
    FaceComparator,
    BlobStore,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Collaborator::DocumentDetector => "document detector",
            Collaborator::FaceComparator => "face comparator",
            Collaborator::BlobStore => "blob store",
        })
    }
}

#[derive(Error, Debug)]
pub enum FlowError {
    // --- validation: reported to the client as a rejected step ---
    #[error("no document detected")]
    NoDocumentDetected,
    #[error("invalid detection data: {0}")]
    InvalidDetectionData(String),
    #[error("invalid sequence: {0}")]
    InvalidSequence(String),
    #[error("back document type {back:?} does not match front type {front:?}")]
    TypeMismatch {
        front: DocumentType,
        back: DocumentType,
    },
    #[error("unrecognized document label {0:?}")]
    UnrecognizedDocument(String),
    #[error("session {session_id} belongs to another subscriber")]
    SessionMismatch { session_id: String },

    // --- infrastructure: server faults, nothing is recorded ---
    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: Collaborator,
        reason: String,
    },
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("detector contract violated: {0}")]
    DetectorContract(String),
}

impl FlowError {
    pub fn unavailable(collaborator: Collaborator, reason: impl std::fmt::Display) -> Self {
        FlowError::CollaboratorUnavailable {
            collaborator,
            reason: reason.to_string(),
        }
    }

    /// Whether this is a user-facing rejection rather than a server fault.
    pub fn is_validation(&self) -> bool {
        self.rejection_code().is_some()
    }

    pub fn rejection_code(&self) -> Option<ResponseCode> {
        match self {
            FlowError::NoDocumentDetected => Some(ResponseCode::NoDocumentDetected),
            FlowError::InvalidDetectionData(_) => Some(ResponseCode::InvalidDetectionData),
            FlowError::InvalidSequence(_) => Some(ResponseCode::InvalidSequence),
            FlowError::TypeMismatch { .. } => Some(ResponseCode::TypeMismatch),
            FlowError::UnrecognizedDocument(_) => Some(ResponseCode::UnrecognizedDocument),
            FlowError::SessionMismatch { .. } => Some(ResponseCode::SessionMismatch),
            FlowError::CollaboratorUnavailable { .. }
            | FlowError::PersistenceFailure(_)
            | FlowError::DetectorContract(_) => None,
        }
    }

    /// Structured rejection for validation errors; `None` for server faults.
    pub fn rejection(&self) -> Option<FlowResponse> {
        let code = self.rejection_code()?;
        let document_type = match self {
            FlowError::TypeMismatch { back, .. } => *back,
            _ => DocumentType::Unknown,
        };
        Some(FlowResponse::rejected(code, document_type, self.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_have_rejections() {
        let err = FlowError::TypeMismatch {
            front: DocumentType::NationalId,
            back: DocumentType::Passport,
        };
        let rejection = err.rejection().unwrap();
        assert_eq!(rejection.response_code, ResponseCode::TypeMismatch);
        assert_eq!(rejection.data.document_type, DocumentType::Passport);
        assert!(!rejection.data.is_verified);
    }

    #[test]
    fn test_infrastructure_errors_are_not_rejections() {
        let err = FlowError::PersistenceFailure("no rows".into());
        assert!(!err.is_validation());
        assert!(err.rejection().is_none());

        let err = FlowError::unavailable(Collaborator::FaceComparator, "timed out");
        assert!(err.rejection().is_none());
        assert_eq!(err.to_string(), "face comparator unavailable: timed out");
    }
}
