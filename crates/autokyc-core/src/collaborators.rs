//! Interfaces to the external capabilities the flow depends on, plus the
//! per-request deadline that bounds every call to them.

use crate::error::{Collaborator, FlowError};
use crate::normalizer::RawDetections;
use crate::types::FaceComparison;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The submitted image could not be used (undecodable, empty).
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("{0}")]
    Failed(String),
}

/// Classifies a document photo into labelled boxes.
#[async_trait]
pub trait DocumentDetector: Send + Sync {
    async fn detect(&self, image: Vec<u8>) -> Result<RawDetections, CollaboratorError>;
}

/// Compares the face in `source` (document) with faces in `target` (liveness).
///
/// Similarities are percentages in `[0, 100]`.
#[async_trait]
pub trait FaceComparator: Send + Sync {
    async fn compare(
        &self,
        source: Vec<u8>,
        target: Vec<u8>,
    ) -> Result<FaceComparison, CollaboratorError>;
}

/// Binary object storage addressed by relative path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), CollaboratorError>;
    async fn get(&self, path: &str) -> Result<Vec<u8>, CollaboratorError>;
    async fn delete(&self, path: &str) -> Result<(), CollaboratorError>;
}

/// A value passed to or returned from a stored procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Real(v) => Some(*v),
            SqlValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::Real(f64::from(v))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

pub type ProcedureRow = Vec<SqlValue>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("procedure {procedure} failed: {reason}")]
pub struct DatabaseError {
    pub procedure: String,
    pub reason: String,
}

/// Relational store reached only through named stored procedures.
#[async_trait]
pub trait Database: Send + Sync {
    async fn call_procedure(
        &self,
        procedure: &str,
        args: Vec<SqlValue>,
    ) -> Result<Vec<ProcedureRow>, DatabaseError>;
}

/// Point in time after which no collaborator call may start or finish.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Fail if the deadline has passed. Called before recording so an expired
    /// request never writes a step.
    pub fn check(&self, collaborator: Collaborator) -> Result<(), FlowError> {
        if self.is_expired() {
            Err(FlowError::unavailable(collaborator, "deadline exceeded"))
        } else {
            Ok(())
        }
    }

    /// Run a collaborator call bounded by this deadline.
    pub async fn run<T, F>(&self, collaborator: Collaborator, call: F) -> Result<T, FlowError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        match tokio::time::timeout_at(self.at, call).await {
            Err(_) => Err(FlowError::unavailable(collaborator, "deadline exceeded")),
            Ok(Err(CollaboratorError::InvalidImage(reason))) => {
                Err(FlowError::InvalidDetectionData(reason))
            }
            Ok(Err(CollaboratorError::Failed(reason))) => {
                Err(FlowError::unavailable(collaborator, reason))
            }
            Ok(Ok(value)) => Ok(value),
        }
    }
}

/// Blob path for a session image:
/// `<YYYY>/<Mon>/<DD>/<msisdn>_<session>_<suffix>_<attempt>.jpg`.
///
/// `attempt` is unique per upload, so a retry never writes over (or, when
/// its recording fails, deletes) the image of an earlier recorded step. The
/// session id is reduced to `[A-Za-z0-9_-]` so it cannot escape the store
/// root.
pub fn photo_path(
    msisdn: i64,
    session_id: &str,
    suffix: &str,
    attempt: Uuid,
    at: DateTime<Utc>,
) -> String {
    let session: String = session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!(
        "{}/{}_{session}_{suffix}_{}.jpg",
        at.format("%Y/%b/%d"),
        msisdn,
        attempt.simple()
    )
}

/// A blob written during a request that is deleted again unless committed.
///
/// Every exit path that does not end in a recorded step drops the guard,
/// which schedules the delete on the current runtime.
pub struct StagedBlob {
    store: Arc<dyn BlobStore>,
    path: String,
    committed: bool,
}

impl StagedBlob {
    pub async fn put(
        store: Arc<dyn BlobStore>,
        path: String,
        bytes: Vec<u8>,
        deadline: &Deadline,
    ) -> Result<Self, FlowError> {
        deadline
            .run(Collaborator::BlobStore, store.put(&path, bytes))
            .await?;
        Ok(Self {
            store,
            path,
            committed: false,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Keep the blob; returns its path.
    pub fn commit(mut self) -> String {
        self.committed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let store = Arc::clone(&self.store);
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.delete(&path).await {
                        tracing::warn!(path, error = %err, "failed to remove staged blob");
                    } else {
                        tracing::debug!(path, "staged blob removed");
                    }
                });
            }
            Err(_) => tracing::warn!(path, "no runtime to remove staged blob; leaving it"),
        }
    }
}
