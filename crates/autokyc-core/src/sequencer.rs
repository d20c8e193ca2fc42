//! Flow Sequencer: the per-session verification state machine.
//!
//! Session state is never stored. It is rebuilt for every request by
//! replaying the recorded steps through [`SessionState::advance`], the same
//! function that decides live transitions, so replay and live decisions
//! cannot drift apart.

use crate::error::FlowError;
use crate::policy::requires_back;
use crate::response::{FlowResponse, LivenessResponse, ResponseCode};
use crate::types::{DocumentDetection, DocumentType, LivenessStatus, Side, StepOutcome, StepStatus};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "front")]
pub enum SessionState {
    AwaitingLiveness,
    AwaitingFrontDocument,
    AwaitingBackDocument(DocumentType),
    AwaitingFaceCompare(DocumentType),
    Verified(DocumentType),
}

/// A recorded step, reduced to what drives the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    Liveness {
        status: LivenessStatus,
        outcome: StepStatus,
    },
    Document {
        document_type: DocumentType,
        side: Side,
        outcome: StepStatus,
    },
    FaceCompare {
        outcome: StepStatus,
    },
}

impl SessionState {
    /// Position in the flow; steps ranked behind the state are replays.
    pub fn rank(&self) -> u8 {
        match self {
            SessionState::AwaitingLiveness => 0,
            SessionState::AwaitingFrontDocument => 1,
            SessionState::AwaitingBackDocument(_) => 2,
            SessionState::AwaitingFaceCompare(_) => 3,
            SessionState::Verified(_) => 4,
        }
    }

    pub fn front_type(&self) -> Option<DocumentType> {
        match self {
            SessionState::AwaitingBackDocument(t)
            | SessionState::AwaitingFaceCompare(t)
            | SessionState::Verified(t) => Some(*t),
            SessionState::AwaitingLiveness | SessionState::AwaitingFrontDocument => None,
        }
    }

    pub fn replay<I>(events: I) -> Self
    where
        I: IntoIterator<Item = StepEvent>,
    {
        events
            .into_iter()
            .fold(SessionState::AwaitingLiveness, SessionState::advance)
    }

    /// Apply one recorded step. Steps that do not fit the current state
    /// leave it unchanged.
    pub fn advance(self, event: StepEvent) -> Self {
        match (self, event) {
            (
                SessionState::AwaitingLiveness,
                StepEvent::Liveness {
                    status: LivenessStatus::Succeeded,
                    outcome: StepStatus::Accepted,
                },
            ) => SessionState::AwaitingFrontDocument,

            (
                SessionState::AwaitingFrontDocument,
                StepEvent::Document {
                    document_type,
                    side: Side::Front,
                    outcome: StepStatus::Accepted,
                },
            ) if document_type.is_known() => {
                if requires_back(document_type) {
                    SessionState::AwaitingBackDocument(document_type)
                } else {
                    SessionState::AwaitingFaceCompare(document_type)
                }
            }

            (
                SessionState::AwaitingBackDocument(front),
                StepEvent::Document {
                    document_type,
                    side: Side::Back,
                    outcome: StepStatus::Accepted,
                },
            ) if document_type == front => SessionState::AwaitingFaceCompare(front),

            (SessionState::AwaitingFaceCompare(front), StepEvent::FaceCompare { outcome }) => {
                if outcome.is_accepted() {
                    SessionState::Verified(front)
                } else if requires_back(front) {
                    SessionState::AwaitingBackDocument(front)
                } else {
                    SessionState::AwaitingFaceCompare(front)
                }
            }

            (state, _) => state,
        }
    }

    /// Response describing what the client should do in this state. Used for
    /// idempotent replays of steps the session is already past.
    pub fn response(&self) -> FlowResponse {
        match *self {
            SessionState::AwaitingLiveness | SessionState::AwaitingFrontDocument => {
                FlowResponse::new(ResponseCode::CaptureAgain, DocumentType::Unknown, false, false, false)
            }
            SessionState::AwaitingBackDocument(front) => {
                FlowResponse::new(ResponseCode::RedirectToBack, front, false, false, true)
            }
            SessionState::AwaitingFaceCompare(front) => {
                FlowResponse::new(ResponseCode::DirectToFaceCompare, front, true, false, false)
            }
            SessionState::Verified(front) => {
                FlowResponse::new(ResponseCode::Verified, front, true, true, false)
            }
        }
    }
}

/// Result of a sequencing decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: SessionState,
    pub response: FlowResponse,
    /// Face compare should run now, without another client request.
    pub auto_face_compare: bool,
}

/// What to do with an incoming step before anything is written.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Record the step; `attempt` is passed through to the recorder.
    Record { attempt: u8 },
    /// The session is already past this step. Nothing is recorded.
    Replay(FlowResponse),
}

/// Guard an incoming document detection against the session state.
///
/// `prior_attempts` is how many detections of the same side the session
/// already holds.
pub fn plan_document(
    state: SessionState,
    detection: &DocumentDetection,
    prior_attempts: usize,
) -> Result<Plan, FlowError> {
    let attempt = u8::from(prior_attempts > 0);
    match state {
        SessionState::AwaitingLiveness => Err(FlowError::InvalidSequence(
            "liveness must succeed before document capture".into(),
        )),
        SessionState::AwaitingFrontDocument => {
            if detection.side != Side::Front {
                return Err(FlowError::InvalidSequence(
                    "first document upload must be a front capture".into(),
                ));
            }
            if !detection.document_type.is_known() {
                return Err(FlowError::UnrecognizedDocument(detection.raw_label.clone()));
            }
            Ok(Plan::Record { attempt })
        }
        SessionState::AwaitingBackDocument(front) => {
            if detection.side == Side::Front {
                return Ok(Plan::Replay(state.response()));
            }
            if detection.document_type != front {
                return Err(FlowError::TypeMismatch {
                    front,
                    back: detection.document_type,
                });
            }
            if detection.side != Side::Back {
                return Err(FlowError::InvalidSequence(format!(
                    "capture side of {:?} could not be determined",
                    detection.raw_label
                )));
            }
            Ok(Plan::Record { attempt })
        }
        SessionState::AwaitingFaceCompare(_) | SessionState::Verified(_) => {
            Ok(Plan::Replay(state.response()))
        }
    }
}

/// Decide the transition after a document step was recorded.
pub fn after_document(
    state: SessionState,
    detection: &DocumentDetection,
    outcome: &StepOutcome,
) -> Result<Transition, FlowError> {
    let event = StepEvent::Document {
        document_type: detection.document_type,
        side: detection.side,
        outcome: outcome.status,
    };
    let next = state.advance(event);

    let (response, auto_face_compare) = match (state, detection.side, next) {
        (SessionState::AwaitingFrontDocument, Side::Front, SessionState::AwaitingFrontDocument) => (
            FlowResponse::new(
                ResponseCode::CaptureAgain,
                detection.document_type,
                false,
                false,
                false,
            ),
            false,
        ),
        (SessionState::AwaitingFrontDocument, Side::Front, SessionState::AwaitingBackDocument(_)) => {
            (next.response(), false)
        }
        (SessionState::AwaitingFrontDocument, Side::Front, SessionState::AwaitingFaceCompare(_)) => {
            (next.response(), true)
        }
        (SessionState::AwaitingBackDocument(front), Side::Back, SessionState::AwaitingBackDocument(_)) => {
            (needs_back(front), false)
        }
        (SessionState::AwaitingBackDocument(_), Side::Back, SessionState::AwaitingFaceCompare(_)) => {
            (next.response(), true)
        }
        _ => {
            return Err(FlowError::InvalidSequence(format!(
                "{:?} capture does not apply in state {state:?}",
                detection.side
            )))
        }
    };

    Ok(Transition {
        next,
        response,
        auto_face_compare,
    })
}

/// Guard a face-compare request against the session state.
pub fn plan_face_compare(state: SessionState) -> Result<Plan, FlowError> {
    match state {
        SessionState::AwaitingFaceCompare(_) => Ok(Plan::Record { attempt: 0 }),
        SessionState::Verified(_) => Ok(Plan::Replay(state.response())),
        other => Err(FlowError::InvalidSequence(format!(
            "face compare is not expected in state {other:?}"
        ))),
    }
}

/// Decide the transition after a face-compare step was recorded.
pub fn after_face_compare(
    state: SessionState,
    outcome: &StepOutcome,
) -> Result<Transition, FlowError> {
    let SessionState::AwaitingFaceCompare(front) = state else {
        return Err(FlowError::InvalidSequence(format!(
            "face compare does not apply in state {state:?}"
        )));
    };
    let next = state.advance(StepEvent::FaceCompare {
        outcome: outcome.status,
    });
    let response = match next {
        SessionState::AwaitingBackDocument(_) => needs_back(front),
        other => other.response(),
    };
    Ok(Transition {
        next,
        response,
        auto_face_compare: false,
    })
}

/// Whether a liveness result should be recorded; `None` means the session is
/// already past liveness.
pub fn plan_liveness(state: SessionState) -> Option<LivenessResponse> {
    match state {
        SessionState::AwaitingLiveness => None,
        _ => Some(LivenessResponse::new(true)),
    }
}

/// Decide the state and response after a liveness step was recorded.
pub fn after_liveness(
    state: SessionState,
    status: LivenessStatus,
    outcome: &StepOutcome,
) -> (SessionState, LivenessResponse) {
    let next = state.advance(StepEvent::Liveness {
        status,
        outcome: outcome.status,
    });
    let completed = next.rank() > SessionState::AwaitingLiveness.rank();
    (next, LivenessResponse::new(completed))
}

fn needs_back(front: DocumentType) -> FlowResponse {
    FlowResponse::new(ResponseCode::NeedsBack, front, false, false, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentBox;

    fn detection(label: &str) -> DocumentDetection {
        crate::normalizer::normalize(label, 0.91, [0.0, 0.0, 100.0, 60.0]).unwrap()
    }

    fn outcome(status: StepStatus) -> StepOutcome {
        StepOutcome {
            message: "ok".into(),
            status,
            sp_code: 0,
        }
    }

    fn accepted() -> StepOutcome {
        outcome(StepStatus::Accepted)
    }

    #[test]
    fn test_liveness_success_moves_to_front() {
        let (next, response) = after_liveness(
            SessionState::AwaitingLiveness,
            LivenessStatus::Succeeded,
            &accepted(),
        );
        assert_eq!(next, SessionState::AwaitingFrontDocument);
        assert_eq!(response.response_code, ResponseCode::LivenessSucceeded);
    }

    #[test]
    fn test_liveness_failure_retries() {
        let (next, response) = after_liveness(
            SessionState::AwaitingLiveness,
            LivenessStatus::Failed,
            &accepted(),
        );
        assert_eq!(next, SessionState::AwaitingLiveness);
        assert_eq!(response.response_code, ResponseCode::LivenessFailed);

        // Provider said succeeded but the procedure did not accept it.
        let (next, _) = after_liveness(
            SessionState::AwaitingLiveness,
            LivenessStatus::Succeeded,
            &outcome(StepStatus::Retry),
        );
        assert_eq!(next, SessionState::AwaitingLiveness);
    }

    #[test]
    fn test_document_before_liveness_is_invalid_sequence() {
        let err = plan_document(SessionState::AwaitingLiveness, &detection("NIDF"), 0).unwrap_err();
        assert!(matches!(err, FlowError::InvalidSequence(_)));
    }

    #[test]
    fn test_back_as_first_upload_is_invalid_sequence() {
        let err =
            plan_document(SessionState::AwaitingFrontDocument, &detection("NIDB"), 0).unwrap_err();
        assert!(matches!(err, FlowError::InvalidSequence(_)));
    }

    #[test]
    fn test_unknown_front_is_rejected() {
        let err =
            plan_document(SessionState::AwaitingFrontDocument, &detection("XXF"), 0).unwrap_err();
        assert!(matches!(err, FlowError::UnrecognizedDocument(_)));
    }

    #[test]
    fn test_national_id_front_redirects_to_back() {
        let det = detection("NIDF");
        let plan = plan_document(SessionState::AwaitingFrontDocument, &det, 0).unwrap();
        assert_eq!(plan, Plan::Record { attempt: 0 });

        let t = after_document(SessionState::AwaitingFrontDocument, &det, &accepted()).unwrap();
        assert_eq!(t.next, SessionState::AwaitingBackDocument(DocumentType::NationalId));
        assert!(!t.auto_face_compare);
        assert_eq!(t.response.response_code, ResponseCode::RedirectToBack);
        assert!(t.response.data.is_back_document_need);
        assert_eq!(t.response.data.document_type.code(), 3);
    }

    #[test]
    fn test_driving_licence_front_goes_straight_to_face_compare() {
        let det = detection("DLF");
        let t = after_document(SessionState::AwaitingFrontDocument, &det, &accepted()).unwrap();
        assert_eq!(t.next, SessionState::AwaitingFaceCompare(DocumentType::DrivingLicense));
        assert!(t.auto_face_compare);
        assert_eq!(t.response.response_code, ResponseCode::DirectToFaceCompare);
        assert!(!t.response.data.is_back_document_need);
        assert!(t.response.data.is_document_scan_completed);
    }

    #[test]
    fn test_front_not_accepted_captures_again() {
        let det = detection("NIDF");
        for status in [StepStatus::Retry, StepStatus::Unknown(7)] {
            let t = after_document(SessionState::AwaitingFrontDocument, &det, &outcome(status))
                .unwrap();
            assert_eq!(t.next, SessionState::AwaitingFrontDocument);
            assert_eq!(t.response.response_code, ResponseCode::CaptureAgain);
        }
    }

    #[test]
    fn test_back_type_mismatch() {
        let state = SessionState::AwaitingBackDocument(DocumentType::NationalId);
        let err = plan_document(state, &detection("PPB"), 0).unwrap_err();
        assert!(matches!(
            err,
            FlowError::TypeMismatch {
                front: DocumentType::NationalId,
                back: DocumentType::Passport
            }
        ));
    }

    #[test]
    fn test_matching_back_triggers_face_compare() {
        let state = SessionState::AwaitingBackDocument(DocumentType::NationalId);
        let det = detection("NIDB");
        assert_eq!(plan_document(state, &det, 0).unwrap(), Plan::Record { attempt: 0 });
        let t = after_document(state, &det, &accepted()).unwrap();
        assert_eq!(t.next, SessionState::AwaitingFaceCompare(DocumentType::NationalId));
        assert!(t.auto_face_compare);
    }

    #[test]
    fn test_back_not_accepted_redirects_to_back() {
        let state = SessionState::AwaitingBackDocument(DocumentType::Citizenship);
        let det = detection("CSB");
        assert_eq!(plan_document(state, &det, 1).unwrap(), Plan::Record { attempt: 1 });
        let t = after_document(state, &det, &outcome(StepStatus::Retry)).unwrap();
        assert_eq!(t.next, state);
        assert_eq!(t.response.response_code, ResponseCode::NeedsBack);
    }

    #[test]
    fn test_unmarked_back_is_invalid_sequence() {
        let state = SessionState::AwaitingBackDocument(DocumentType::NationalId);
        let err = plan_document(state, &detection("NID"), 0).unwrap_err();
        assert!(matches!(err, FlowError::InvalidSequence(_)));
    }

    #[test]
    fn test_repeated_front_does_not_move_backward() {
        let state = SessionState::AwaitingBackDocument(DocumentType::NationalId);
        let plan = plan_document(state, &detection("NIDF"), 1).unwrap();
        let Plan::Replay(response) = plan else {
            panic!("expected replay, got {plan:?}");
        };
        assert_eq!(response.response_code, ResponseCode::RedirectToBack);

        let verified = SessionState::Verified(DocumentType::NationalId);
        let Plan::Replay(response) = plan_document(verified, &detection("NIDF"), 1).unwrap() else {
            panic!("expected replay");
        };
        assert_eq!(response.response_code, ResponseCode::Verified);
    }

    #[test]
    fn test_back_for_front_only_document_is_replay() {
        let state = SessionState::AwaitingFaceCompare(DocumentType::DrivingLicense);
        let plan = plan_document(state, &detection("DLB"), 0).unwrap();
        assert!(matches!(plan, Plan::Replay(_)));
    }

    #[test]
    fn test_face_compare_accepted_verifies() {
        let state = SessionState::AwaitingFaceCompare(DocumentType::NationalId);
        let t = after_face_compare(state, &accepted()).unwrap();
        assert_eq!(t.next, SessionState::Verified(DocumentType::NationalId));
        assert_eq!(t.response.response_code, ResponseCode::Verified);
        assert!(t.response.data.is_verified);
    }

    #[test]
    fn test_face_compare_rejected_returns_to_back() {
        let state = SessionState::AwaitingFaceCompare(DocumentType::Passport);
        let t = after_face_compare(state, &outcome(StepStatus::Retry)).unwrap();
        assert_eq!(t.next, SessionState::AwaitingBackDocument(DocumentType::Passport));
        assert_eq!(t.response.response_code, ResponseCode::NeedsBack);
        assert!(t.response.data.is_back_document_need);
    }

    #[test]
    fn test_face_compare_rejected_front_only_retries_compare() {
        let state = SessionState::AwaitingFaceCompare(DocumentType::DrivingLicense);
        let t = after_face_compare(state, &outcome(StepStatus::Unknown(2))).unwrap();
        assert_eq!(t.next, state);
        assert_eq!(t.response.response_code, ResponseCode::DirectToFaceCompare);
        assert!(!t.response.data.is_verified);
    }

    #[test]
    fn test_face_compare_out_of_order() {
        assert!(plan_face_compare(SessionState::AwaitingFrontDocument).is_err());
        assert!(plan_face_compare(SessionState::AwaitingBackDocument(DocumentType::Passport)).is_err());
        assert!(matches!(
            plan_face_compare(SessionState::Verified(DocumentType::Passport)),
            Ok(Plan::Replay(_))
        ));
        assert!(after_face_compare(SessionState::AwaitingLiveness, &accepted()).is_err());
    }

    #[test]
    fn test_replay_full_flow() {
        let events = [
            StepEvent::Liveness { status: LivenessStatus::Failed, outcome: StepStatus::Retry },
            StepEvent::Liveness { status: LivenessStatus::Succeeded, outcome: StepStatus::Accepted },
            StepEvent::Document {
                document_type: DocumentType::NationalId,
                side: Side::Front,
                outcome: StepStatus::Accepted,
            },
            StepEvent::Document {
                document_type: DocumentType::NationalId,
                side: Side::Back,
                outcome: StepStatus::Accepted,
            },
            StepEvent::FaceCompare { outcome: StepStatus::Retry },
        ];
        assert_eq!(
            SessionState::replay(events),
            SessionState::AwaitingBackDocument(DocumentType::NationalId)
        );

        let mut more = events.to_vec();
        more.push(StepEvent::Document {
            document_type: DocumentType::NationalId,
            side: Side::Back,
            outcome: StepStatus::Accepted,
        });
        more.push(StepEvent::FaceCompare { outcome: StepStatus::Accepted });
        assert_eq!(
            SessionState::replay(more),
            SessionState::Verified(DocumentType::NationalId)
        );
    }

    #[test]
    fn test_replay_ignores_out_of_order_steps() {
        let events = [
            StepEvent::Document {
                document_type: DocumentType::NationalId,
                side: Side::Front,
                outcome: StepStatus::Accepted,
            },
            StepEvent::FaceCompare { outcome: StepStatus::Accepted },
        ];
        assert_eq!(SessionState::replay(events), SessionState::AwaitingLiveness);
    }

    #[test]
    fn test_bounding_box_does_not_affect_decision() {
        let mut det = detection("PPF");
        det.bounding_box = DocumentBox { x1: 0.0, y1: 0.0, x2: 0.0, y2: 0.0 };
        let t = after_document(SessionState::AwaitingFrontDocument, &det, &accepted()).unwrap();
        assert_eq!(t.next, SessionState::AwaitingBackDocument(DocumentType::Passport));
    }
}
