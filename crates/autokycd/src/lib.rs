//! autokycd: HTTP front of the KYC onboarding flow.
//!
//! Handlers translate requests into [`VerificationService`] calls; model
//! inference runs on the engine thread behind [`engine::EngineHandle`].

pub mod api;
pub mod config;
pub mod engine;
pub mod error;

use autokyc_core::VerificationService;
use autokyc_store::SqliteDatabase;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: VerificationService,
    pub database: Arc<SqliteDatabase>,
    /// `None` when collaborators are supplied in-process rather than by the engine.
    pub engine: Option<engine::EngineHandle>,
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(api::handle_health))
        .route("/liveness/post-data", post(api::handle_liveness))
        .route("/document-detection/inference", post(api::handle_document))
        .route("/document-detection/inference/front", post(api::handle_document))
        .route("/document-detection/inference/back", post(api::handle_document))
        .route("/face/compare", post(api::handle_face_compare))
        .route("/sessions/:id", get(api::handle_session))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "request",
                    id = %uuid::Uuid::new_v4(),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .with_state(state)
}
