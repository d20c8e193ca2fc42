//! Small round-robin pool of `tokio-rusqlite` connections.
//!
//! Each connection owns a background thread; a procedure call holds one for
//! the duration of that call only.

use crate::schema;
use crate::StoreError;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_rusqlite::Connection;

pub struct ConnectionPool {
    conns: Vec<Connection>,
    next: AtomicUsize,
}

impl ConnectionPool {
    /// Open `size` connections to the database file, creating it (and its
    /// schema) if needed.
    pub async fn open(path: &Path, size: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("create {}: {e}", parent.display())))?;
        }

        let mut conns = Vec::with_capacity(size.max(1));
        for i in 0..size.max(1) {
            let conn = Connection::open(path)
                .await
                .map_err(|e| StoreError::Open(format!("open {}: {e}", path.display())))?;
            let first = i == 0;
            conn.call(move |c| {
                schema::configure(c)?;
                if first {
                    schema::ensure_schema(c)?;
                }
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Open(format!("prepare connection: {e}")))?;
            conns.push(conn);
        }

        tracing::info!(path = %path.display(), connections = conns.len(), "database opened");
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    /// Single in-memory connection; used by tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Open(format!("open in-memory: {e}")))?;
        conn.call(|c| {
            schema::ensure_schema(c)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Open(format!("prepare connection: {e}")))?;
        Ok(Self {
            conns: vec![conn],
            next: AtomicUsize::new(0),
        })
    }

    pub fn get(&self) -> &Connection {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        &self.conns[i]
    }
}
