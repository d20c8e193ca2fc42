//! SQLite renditions of the step procedures.
//!
//! Each insert applies its acceptance rule, appends a row to `kyc_steps` and
//! returns `[message, status, sp_code]` with the status as a big-endian byte
//! string.

use autokyc_core::collaborators::{ProcedureRow, SqlValue};
use autokyc_core::recorder::procedures as names;
use autokyc_core::types::{LivenessStatus, StepStatus};
use chrono::Utc;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection};
use thiserror::Error;

/// Acceptance thresholds the procedures enforce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rules {
    /// Fraction in `[0, 1]`.
    pub min_document_confidence: f64,
    /// Percentage in `[0, 100]`.
    pub similarity_threshold: f64,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            min_document_confidence: 0.5,
            similarity_threshold: 80.0,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcedureError {
    #[error("unknown procedure {0}")]
    Unknown(String),
    #[error("argument {index} ({name}): {reason}")]
    Argument {
        index: usize,
        name: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Minimal big-endian encoding of a status code, at least one byte.
pub fn status_bytes(status: StepStatus) -> Vec<u8> {
    let bytes = status.code().to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

fn to_sql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
    }
}

/// Positional argument list with named accessors.
struct Args<'a> {
    values: &'a [SqlValue],
}

impl<'a> Args<'a> {
    fn expect(values: &'a [SqlValue], count: usize) -> Result<Self, ProcedureError> {
        if values.len() != count {
            return Err(ProcedureError::Argument {
                index: values.len(),
                name: "arity",
                reason: format!("expected {count} arguments, got {}", values.len()),
            });
        }
        Ok(Self { values })
    }

    fn value(&self, index: usize) -> Value {
        to_sql(&self.values[index])
    }

    fn i64(&self, index: usize, name: &'static str) -> Result<i64, ProcedureError> {
        self.values[index].as_i64().ok_or_else(|| ProcedureError::Argument {
            index,
            name,
            reason: format!("expected integer, got {:?}", self.values[index]),
        })
    }

    fn f64(&self, index: usize, name: &'static str) -> Result<f64, ProcedureError> {
        self.values[index].as_f64().ok_or_else(|| ProcedureError::Argument {
            index,
            name,
            reason: format!("expected number, got {:?}", self.values[index]),
        })
    }

    fn text(&self, index: usize, name: &'static str) -> Result<&'a str, ProcedureError> {
        self.values[index].as_text().ok_or_else(|| ProcedureError::Argument {
            index,
            name,
            reason: format!("expected text, got {:?}", self.values[index]),
        })
    }
}

fn verdict(message: String, status: StepStatus) -> Vec<ProcedureRow> {
    vec![vec![
        SqlValue::Text(message),
        SqlValue::Blob(status_bytes(status)),
        SqlValue::Integer(0),
    ]]
}

fn status_of(accepted: bool) -> StepStatus {
    if accepted {
        StepStatus::Accepted
    } else {
        StepStatus::Retry
    }
}

/// Run the named procedure on `conn`.
pub fn call(
    conn: &mut Connection,
    procedure: &str,
    args: &[SqlValue],
    rules: Rules,
) -> Result<Vec<ProcedureRow>, ProcedureError> {
    match procedure {
        names::INSERT_DETECTION => insert_detection(conn, args, rules),
        names::INSERT_FACE_COMPARE => insert_face_compare(conn, args, rules),
        names::INSERT_LIVENESS => insert_liveness(conn, args),
        names::FETCH_SESSION_STEPS => fetch_session_steps(conn, args),
        other => Err(ProcedureError::Unknown(other.to_string())),
    }
}

/// `(msisdn, session_id, csid, id_type, predicted_class, photo_path,
/// bounding_box, confidence, details, attempt)`
fn insert_detection(
    conn: &mut Connection,
    args: &[SqlValue],
    rules: Rules,
) -> Result<Vec<ProcedureRow>, ProcedureError> {
    let a = Args::expect(args, 10)?;
    let msisdn = a.i64(0, "msisdn")?;
    let session_id = a.text(1, "session_id")?;
    let id_type = a.i64(3, "id_type")?;
    let label = a.text(4, "predicted_class")?;
    let confidence = a.f64(7, "confidence")?;

    let known = id_type > 0;
    let accepted = known && confidence >= rules.min_document_confidence;
    let status = status_of(accepted);

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO kyc_steps (session_id, step_kind, msisdn, csid, id_type, predicted_class,
             photo_path, bounding_box, score, attempt, details, status, created_at)
         VALUES (?1, 'DOCUMENT', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            session_id,
            msisdn,
            a.value(2),
            id_type,
            label,
            a.value(5),
            a.value(6),
            confidence,
            a.value(9),
            a.value(8),
            status.code(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    tx.commit()?;

    let message = if accepted {
        format!("{label} recorded")
    } else if !known {
        format!("{label} is not a supported document")
    } else {
        format!(
            "{label} confidence {confidence:.2} below {:.2}",
            rules.min_document_confidence
        )
    };
    Ok(verdict(message, status))
}

/// `(msisdn, session_id, csid, similarity, cropped_path, details)`
fn insert_face_compare(
    conn: &mut Connection,
    args: &[SqlValue],
    rules: Rules,
) -> Result<Vec<ProcedureRow>, ProcedureError> {
    let a = Args::expect(args, 6)?;
    let msisdn = a.i64(0, "msisdn")?;
    let session_id = a.text(1, "session_id")?;
    let similarity = a.f64(3, "similarity")?;

    let accepted = similarity >= rules.similarity_threshold;
    let status = status_of(accepted);

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO kyc_steps (session_id, step_kind, msisdn, csid, photo_path, score,
             details, status, created_at)
         VALUES (?1, 'FACECOMPARE', ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            session_id,
            msisdn,
            a.value(2),
            a.value(4),
            similarity,
            a.value(5),
            status.code(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    tx.commit()?;

    let message = if accepted {
        format!("similarity {similarity:.1}% accepted")
    } else {
        format!(
            "similarity {similarity:.1}% below {:.1}%",
            rules.similarity_threshold
        )
    };
    Ok(verdict(message, status))
}

/// `(msisdn, session_id, csid, photo_path, bounding_box, confidence, status,
/// details)`
fn insert_liveness(
    conn: &mut Connection,
    args: &[SqlValue],
) -> Result<Vec<ProcedureRow>, ProcedureError> {
    let a = Args::expect(args, 8)?;
    let msisdn = a.i64(0, "msisdn")?;
    let session_id = a.text(1, "session_id")?;
    let liveness = a.text(6, "status")?;

    let accepted = LivenessStatus::from_provider(liveness) == LivenessStatus::Succeeded;
    let status = status_of(accepted);

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO kyc_steps (session_id, step_kind, msisdn, csid, photo_path, bounding_box,
             score, liveness_status, details, status, created_at)
         VALUES (?1, 'LIVENESS', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            session_id,
            msisdn,
            a.value(2),
            a.value(3),
            a.value(4),
            a.value(5),
            liveness,
            a.value(7),
            status.code(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    tx.commit()?;

    Ok(verdict(format!("liveness {liveness}"), status))
}

/// `(session_id)` → `[kind, msisdn, id_type, predicted_class, photo_path,
/// score, liveness_status, status, created_at]` per step, oldest first.
fn fetch_session_steps(
    conn: &mut Connection,
    args: &[SqlValue],
) -> Result<Vec<ProcedureRow>, ProcedureError> {
    let a = Args::expect(args, 1)?;
    let session_id = a.text(0, "session_id")?;

    let mut stmt = conn.prepare_cached(
        "SELECT step_kind, msisdn, id_type, predicted_class, photo_path, score,
                liveness_status, status, created_at
         FROM kyc_steps WHERE session_id = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        let mut out = Vec::with_capacity(9);
        for i in 0..9 {
            out.push(from_sql(row.get_ref(i)?));
        }
        if let SqlValue::Integer(code) = out[7] {
            out[7] = SqlValue::Blob(status_bytes(StepStatus::from_code(code)));
        }
        Ok(out)
    })?;
    let steps = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::ensure_schema(&conn).unwrap();
        conn
    }

    fn dd_args(session: &str, id_type: i64, label: &str, confidence: f32) -> Vec<SqlValue> {
        vec![
            SqlValue::Integer(9800000001),
            SqlValue::from(session),
            SqlValue::from("cs-1"),
            SqlValue::Integer(id_type),
            SqlValue::from(label),
            SqlValue::from("2024/Sep/03/front.jpg"),
            SqlValue::from("[1.0,2.0,3.0,4.0]"),
            SqlValue::from(confidence),
            SqlValue::from("{}"),
            SqlValue::Integer(0),
        ]
    }

    #[test]
    fn test_status_bytes_big_endian() {
        assert_eq!(status_bytes(StepStatus::Accepted), vec![1]);
        assert_eq!(status_bytes(StepStatus::Retry), vec![0]);
        assert_eq!(status_bytes(StepStatus::Unknown(256)), vec![1, 0]);
        for status in [StepStatus::Accepted, StepStatus::Retry, StepStatus::Unknown(300)] {
            assert_eq!(StepStatus::from_be_bytes(&status_bytes(status)), Some(status));
        }
    }

    #[test]
    fn test_detection_confidence_rule() {
        let mut c = conn();
        let rules = Rules::default();
        let rows = call(&mut c, names::INSERT_DETECTION, &dd_args("s", 3, "NIDF", 0.9), rules)
            .unwrap();
        assert_eq!(rows[0][1], SqlValue::Blob(vec![1]));

        let rows = call(&mut c, names::INSERT_DETECTION, &dd_args("s", 3, "NIDF", 0.2), rules)
            .unwrap();
        assert_eq!(rows[0][1], SqlValue::Blob(vec![0]));
        assert!(rows[0][0].as_text().unwrap().contains("below"));

        let rows = call(&mut c, names::INSERT_DETECTION, &dd_args("s", -1, "XXF", 0.99), rules)
            .unwrap();
        assert_eq!(rows[0][1], SqlValue::Blob(vec![0]));
    }

    #[test]
    fn test_fetch_returns_steps_in_order() {
        let mut c = conn();
        let rules = Rules::default();
        let liveness = vec![
            SqlValue::Integer(9800000001),
            SqlValue::from("s"),
            SqlValue::from("cs-1"),
            SqlValue::from("live.jpg"),
            SqlValue::Null,
            SqlValue::Real(99.0),
            SqlValue::from("SUCCEEDED"),
            SqlValue::from("{}"),
        ];
        call(&mut c, names::INSERT_LIVENESS, &liveness, rules).unwrap();
        call(&mut c, names::INSERT_DETECTION, &dd_args("s", 3, "NIDF", 0.9), rules).unwrap();
        call(&mut c, names::INSERT_DETECTION, &dd_args("other", 4, "PPF", 0.9), rules).unwrap();

        let rows = call(&mut c, names::FETCH_SESSION_STEPS, &[SqlValue::from("s")], rules).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], SqlValue::from("LIVENESS"));
        assert_eq!(rows[0][6], SqlValue::from("SUCCEEDED"));
        assert_eq!(rows[1][0], SqlValue::from("DOCUMENT"));
        assert_eq!(rows[1][2], SqlValue::Integer(3));
        assert_eq!(rows[1][3], SqlValue::from("NIDF"));
        assert_eq!(rows[1][7], SqlValue::Blob(vec![1]));
    }

    #[test]
    fn test_face_compare_threshold() {
        let mut c = conn();
        let rules = Rules { similarity_threshold: 90.0, ..Rules::default() };
        let args = |similarity: f32| {
            vec![
                SqlValue::Integer(1),
                SqlValue::from("s"),
                SqlValue::from("cs"),
                SqlValue::from(similarity),
                SqlValue::Null,
                SqlValue::from("{}"),
            ]
        };
        let rows = call(&mut c, names::INSERT_FACE_COMPARE, &args(85.0), rules).unwrap();
        assert_eq!(rows[0][1], SqlValue::Blob(vec![0]));
        let rows = call(&mut c, names::INSERT_FACE_COMPARE, &args(93.0), rules).unwrap();
        assert_eq!(rows[0][1], SqlValue::Blob(vec![1]));
    }

    #[test]
    fn test_bad_arguments() {
        let mut c = conn();
        let err = call(&mut c, names::INSERT_DETECTION, &[SqlValue::Null], Rules::default())
            .unwrap_err();
        assert!(matches!(err, ProcedureError::Argument { .. }));

        let mut args = dd_args("s", 3, "NIDF", 0.9);
        args[0] = SqlValue::from("not a number");
        let err = call(&mut c, names::INSERT_DETECTION, &args, Rules::default()).unwrap_err();
        assert!(err.to_string().contains("msisdn"));

        assert!(matches!(
            call(&mut c, "SP_DROP_EVERYTHING", &[], Rules::default()),
            Err(ProcedureError::Unknown(_))
        ));
    }
}
