use rusqlite::Connection;

/// One append-only log of verification steps; sessions are read back in
/// `seq` order.
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kyc_steps (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        step_kind TEXT NOT NULL,
        msisdn INTEGER NOT NULL,
        csid TEXT NOT NULL,
        id_type INTEGER,
        predicted_class TEXT,
        photo_path TEXT,
        bounding_box TEXT,
        score REAL,
        liveness_status TEXT,
        attempt INTEGER,
        details TEXT,
        status INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_kyc_steps_session
    ON kyc_steps (session_id, seq);
";

pub fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
