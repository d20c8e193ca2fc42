use autokyc_core::collaborators::{Database, SqlValue};
use autokyc_core::recorder::{procedures, StepRecorder};
use autokyc_core::{
    DetectionResult, DocumentBox, DocumentType, HistoryLookup, LivenessResult, LivenessStatus,
    SessionState, Side, StepStatus,
};
use autokyc_store::{Rules, SqliteDatabase};
use chrono::Utc;
use std::sync::Arc;

fn liveness(session: &str) -> LivenessResult {
    LivenessResult {
        session_id: session.into(),
        csid: "cs-1".into(),
        msisdn: 9800000001,
        confidence: 98.2,
        bounding_box: None,
        status: LivenessStatus::Succeeded,
        reference_image_path: Some(format!("2024/Sep/03/{session}_liveness_image.jpg")),
        audit_images: vec![],
        captured_at: Utc::now(),
    }
}

fn detection(session: &str, label: &str, document_type: DocumentType, side: Side) -> DetectionResult {
    DetectionResult {
        session_id: session.into(),
        csid: "cs-1".into(),
        msisdn: 9800000001,
        document_type,
        side,
        raw_label: label.into(),
        bounding_box: DocumentBox { x1: 4.0, y1: 8.0, x2: 400.0, y2: 260.0 },
        confidence: 0.87,
        image_path: format!("2024/Sep/03/{session}_{label}.jpg"),
        captured_at: Utc::now(),
    }
}

#[tokio::test]
async fn recorded_steps_replay_into_state() {
    let dir = tempfile::tempdir().unwrap();
    let db: Arc<dyn Database> = Arc::new(
        SqliteDatabase::open(&dir.path().join("kyc.db"), 2, Rules::default())
            .await
            .unwrap(),
    );
    let recorder = StepRecorder::new(Arc::clone(&db));
    let lookup = HistoryLookup::new(Arc::clone(&db));

    let outcome = recorder.record_liveness(&liveness("s1")).await.unwrap();
    assert_eq!(outcome.status, StepStatus::Accepted);

    let front = detection("s1", "NIDF", DocumentType::NationalId, Side::Front);
    let outcome = recorder.record_detection(&front, 0).await.unwrap();
    assert_eq!(outcome.status, StepStatus::Accepted);

    let history = lookup.load("s1").await.unwrap();
    assert_eq!(history.steps.len(), 2);
    assert_eq!(history.front_image(), Some("2024/Sep/03/s1_NIDF.jpg"));
    assert_eq!(
        history.liveness_image(),
        Some("2024/Sep/03/s1_liveness_image.jpg")
    );
    assert_eq!(
        history.state(),
        SessionState::AwaitingBackDocument(DocumentType::NationalId)
    );
    assert!(lookup.load("other").await.unwrap().is_empty());
}

#[tokio::test]
async fn back_detection_reads_back_with_type_and_side() {
    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::open_in_memory(Rules::default()).await.unwrap());
    let recorder = StepRecorder::new(Arc::clone(&db));
    recorder.record_liveness(&liveness("s4")).await.unwrap();
    let front = detection("s4", "NIDF", DocumentType::NationalId, Side::Front);
    recorder.record_detection(&front, 0).await.unwrap();
    let back = detection("s4", "NIDB", DocumentType::NationalId, Side::Back);
    let outcome = recorder.record_detection(&back, 0).await.unwrap();
    assert_eq!(outcome.status, StepStatus::Accepted);

    let history = HistoryLookup::new(db).load("s4").await.unwrap();
    let recorded = history.steps.last().unwrap();
    assert_eq!(recorded.document_type, Some(DocumentType::NationalId));
    assert_eq!(recorded.side, Some(Side::Back));
    assert_eq!(recorded.raw_label.as_deref(), Some("NIDB"));
    assert_eq!(recorded.image_path.as_deref(), Some("2024/Sep/03/s4_NIDB.jpg"));
    assert_eq!(history.detections_of(Side::Back), 1);
    assert_eq!(
        history.prior_document(),
        Some((DocumentType::NationalId, Side::Front))
    );
}

#[tokio::test]
async fn low_confidence_is_recorded_but_not_accepted() {
    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::open_in_memory(Rules::default()).await.unwrap());
    let recorder = StepRecorder::new(Arc::clone(&db));
    let mut front = detection("s2", "PPF", DocumentType::Passport, Side::Front);
    front.confidence = 0.3;

    let outcome = recorder.record_detection(&front, 0).await.unwrap();
    assert_eq!(outcome.status, StepStatus::Retry);
    assert!(outcome.message.contains("below"));

    let history = HistoryLookup::new(db).load("s2").await.unwrap();
    assert_eq!(
        history.prior_document(),
        Some((DocumentType::Passport, Side::Front))
    );
    assert_eq!(history.front_image(), None);
}

#[tokio::test]
async fn file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("kyc.db");
    {
        let db = SqliteDatabase::open(&path, 1, Rules::default()).await.unwrap();
        StepRecorder::new(Arc::new(db))
            .record_liveness(&liveness("s3"))
            .await
            .unwrap();
    }
    let db = SqliteDatabase::open(&path, 3, Rules::default()).await.unwrap();
    assert!(db.ping().await);
    let rows = db
        .call_procedure(procedures::FETCH_SESSION_STEPS, vec![SqlValue::from("s3")])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn concurrent_sessions_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let db: Arc<dyn Database> = Arc::new(
        SqliteDatabase::open(&dir.path().join("kyc.db"), 4, Rules::default())
            .await
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for i in 0..8 {
        let recorder = StepRecorder::new(Arc::clone(&db));
        tasks.push(tokio::spawn(async move {
            let session = format!("c{i}");
            recorder.record_liveness(&liveness(&session)).await.unwrap();
            let front = detection(&session, "CSF", DocumentType::Citizenship, Side::Front);
            recorder.record_detection(&front, 0).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let lookup = HistoryLookup::new(db);
    for i in 0..8 {
        let history = lookup.load(&format!("c{i}")).await.unwrap();
        assert_eq!(history.steps.len(), 2);
        assert_eq!(
            history.state(),
            SessionState::AwaitingBackDocument(DocumentType::Citizenship)
        );
    }
}

#[tokio::test]
async fn unknown_procedure_is_an_error() {
    let db = SqliteDatabase::open_in_memory(Rules::default()).await.unwrap();
    let err = db.call_procedure("SP_NOPE", vec![]).await.unwrap_err();
    assert_eq!(err.procedure, "SP_NOPE");
}
