//! autokyc-core: KYC onboarding flow engine.
//!
//! Turns detector and comparator output into verification steps, records them
//! through the stored-procedure layer and decides what the mobile client has
//! to capture next. Pixel work, storage and transport are collaborators.

pub mod collaborators;
pub mod crop;
pub mod error;
pub mod face_compare;
pub mod history;
pub mod normalizer;
pub mod policy;
pub mod recorder;
pub mod response;
pub mod sequencer;
pub mod service;
pub mod types;

pub use collaborators::{BlobStore, Database, Deadline, DocumentDetector, FaceComparator};
pub use error::FlowError;
pub use history::{HistoryLookup, RecordedStep, SessionHistory};
pub use policy::MatchSelection;
pub use response::{FlowResponse, LivenessResponse, ResponseCode};
pub use sequencer::SessionState;
pub use service::{ServiceSettings, SessionView, VerificationService};
pub use types::{
    DetectionResult, DocumentBox, DocumentType, FaceBox, FaceCompareResult, FaceComparison,
    FaceMatch, LivenessResult, LivenessStatus, Side, StepContext, StepOutcome, StepStatus,
};
