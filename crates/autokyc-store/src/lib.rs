//! autokyc-store: persistence for the verification flow.
//!
//! [`SqliteDatabase`] answers the step procedures on a pooled SQLite file;
//! [`FsBlobStore`] keeps the session photos on disk.

pub mod fs_blob;
pub mod pool;
pub mod procedures;
pub mod schema;

pub use fs_blob::FsBlobStore;
pub use pool::ConnectionPool;
pub use procedures::Rules;

use async_trait::async_trait;
use autokyc_core::collaborators::{Database, DatabaseError, ProcedureRow, SqlValue};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database open failed: {0}")]
    Open(String),
}

/// Stored-procedure database on SQLite.
pub struct SqliteDatabase {
    pool: ConnectionPool,
    rules: Rules,
}

impl SqliteDatabase {
    pub async fn open(path: &Path, pool_size: usize, rules: Rules) -> Result<Self, StoreError> {
        Ok(Self {
            pool: ConnectionPool::open(path, pool_size).await?,
            rules,
        })
    }

    pub async fn open_in_memory(rules: Rules) -> Result<Self, StoreError> {
        Ok(Self {
            pool: ConnectionPool::open_in_memory().await?,
            rules,
        })
    }

    /// Cheap liveness check for health reporting.
    pub async fn ping(&self) -> bool {
        self.pool
            .get()
            .call(|c| {
                c.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map_err(tokio_rusqlite::Error::from)
            })
            .await
            .is_ok()
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn call_procedure(
        &self,
        procedure: &str,
        args: Vec<SqlValue>,
    ) -> Result<Vec<ProcedureRow>, DatabaseError> {
        let name = procedure.to_string();
        let rules = self.rules;
        let result = self
            .pool
            .get()
            .call(move |c| Ok(procedures::call(c, &name, &args, rules)))
            .await;

        let reason = match result {
            Ok(Ok(rows)) => return Ok(rows),
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        tracing::error!(procedure, %reason, "procedure failed");
        Err(DatabaseError {
            procedure: procedure.to_string(),
            reason,
        })
    }
}
