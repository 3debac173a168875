use crate::ipc::error::{ok, IpcError};
use crate::ipc::helpers::{db_conn, optional_str, required_date, required_str};
use crate::ipc::types::{AppState, Request};
use crate::scan::{
    apply_override, evaluate_scan, AttendanceStatus, OverrideRequest, ScanOutcome, ScanRequest,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;

fn observed_timestamp(params: &serde_json::Value) -> Result<DateTime<Utc>, IpcError> {
    match optional_str(params, "timestamp") {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| IpcError::bad_params("timestamp must be RFC 3339")),
    }
}

fn record_json(record: &crate::scan::AttendanceRecord) -> serde_json::Value {
    serde_json::to_value(record).unwrap_or_else(|_| json!({}))
}

fn attendance_scan(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let conn = db_conn(state)?;
    let teacher_id = required_str(params, "teacherId")?;
    let allocation_id = required_str(params, "allocationId")?;
    let payload = required_str(params, "payload")?;
    let observed = observed_timestamp(params)?;

    let scan = ScanRequest {
        teacher_id: &teacher_id,
        allocation_id: &allocation_id,
        payload: &payload,
        observed,
    };
    match evaluate_scan(conn, state.validator.as_ref(), &scan)? {
        ScanOutcome::Marked { record, late } => Ok(json!({
            "code": if late { "LATE" } else { "PRESENT" },
            "message": if late { "marked as late" } else { "attendance marked" },
            "attendance": record_json(&record),
        })),
        ScanOutcome::AlreadyMarked { record } => Ok(json!({
            "code": "ALREADY_MARKED",
            "message": "attendance already marked for this student today",
            "attendance": record_json(&record),
        })),
    }
}

fn attendance_override(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let student_id = required_str(params, "studentId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let subject = required_str(params, "subject")?;
    let date = required_date(params, "date")?;
    let status_raw = required_str(params, "status")?;
    let status = AttendanceStatus::parse(&status_raw)
        .ok_or_else(|| IpcError::bad_params(format!("invalid status: {}", status_raw)))?;
    let reason = required_str(params, "reason")?;

    let record = apply_override(
        conn,
        &OverrideRequest {
            student_id: &student_id,
            teacher_id: &teacher_id,
            subject: &subject,
            date,
            status,
            reason: &reason,
        },
        Utc::now(),
    )?;
    Ok(json!({ "attendance": record_json(&record) }))
}

fn attendance_list_for_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let teacher_id = required_str(params, "teacherId")?;
    let date = match optional_str(params, "date") {
        Some(_) => required_date(params, "date")?,
        None => Utc::now().date_naive(),
    };
    let date = date.format("%Y-%m-%d").to_string();

    let mut stmt = conn.prepare(
        "SELECT a.id, a.student_id, s.name, s.admission_no, a.subject, a.date, a.status,
                a.scan_time, a.is_manual_override, a.override_reason
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE a.teacher_id = ? AND a.date = ?
         ORDER BY a.scan_time",
    )?;
    let records = stmt
        .query_map((&teacher_id, &date), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "admissionNo": r.get::<_, String>(3)?,
                "subject": r.get::<_, String>(4)?,
                "date": r.get::<_, String>(5)?,
                "status": r.get::<_, String>(6)?,
                "scanTime": r.get::<_, String>(7)?,
                "isManualOverride": r.get::<_, i64>(8)? != 0,
                "overrideReason": r.get::<_, Option<String>>(9)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "date": date, "records": records }))
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, IpcError> {
    match req.method.as_str() {
        "attendance.scan" => attendance_scan(state, &req.params),
        "attendance.override" => attendance_override(db_conn(state)?, &req.params),
        "attendance.listForDay" => attendance_list_for_day(db_conn(state)?, &req.params),
        _ => unreachable!("router only sends attendance methods"),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.scan" | "attendance.override" | "attendance.listForDay" => {
            Some(match dispatch(state, req) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        _ => None,
    }
}
