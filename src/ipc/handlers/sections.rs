use crate::ipc::error::{ok, IpcError};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveTime;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn allocation_json(
    id: &str,
    teacher_id: &str,
    subject: &str,
    department: &str,
    section: &str,
    start_time: &str,
    end_time: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "teacherId": teacher_id,
        "subject": subject,
        "department": department,
        "section": section,
        "startTime": start_time,
        "endTime": end_time,
    })
}

fn required_wall_clock(params: &serde_json::Value, key: &str) -> Result<String, IpcError> {
    let raw = required_str(params, key)?;
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .map_err(|_| IpcError::bad_params(format!("{} must be HH:MM", key)))?;
    Ok(raw)
}

fn sections_allocate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let teacher_id = required_str(params, "teacherId")?;
    let subject = required_str(params, "subject")?;
    let department = required_str(params, "department")?;
    let section = required_str(params, "section")?;
    let start_time = required_wall_clock(params, "startTime")?;
    let end_time = required_wall_clock(params, "endTime")?;

    let teacher_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()?;
    if teacher_exists.is_none() {
        return Err(IpcError::new("not_found", "teacher not found"));
    }

    // Overlapping windows within a cohort+subject are allowed; each
    // allocation's window is checked independently at scan time.
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO section_allocations(id, teacher_id, subject, department, section, start_time, end_time)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &teacher_id,
            &subject,
            &department,
            &section,
            &start_time,
            &end_time,
        ),
    )?;
    Ok(json!({
        "allocation": allocation_json(
            &id, &teacher_id, &subject, &department, &section, &start_time, &end_time,
        )
    }))
}

fn sections_list(conn: &Connection) -> Result<serde_json::Value, IpcError> {
    let mut stmt = conn.prepare(
        "SELECT id, teacher_id, subject, department, section, start_time, end_time
         FROM section_allocations ORDER BY department, section, subject",
    )?;
    let allocations = stmt
        .query_map([], |r| {
            Ok(allocation_json(
                &r.get::<_, String>(0)?,
                &r.get::<_, String>(1)?,
                &r.get::<_, String>(2)?,
                &r.get::<_, String>(3)?,
                &r.get::<_, String>(4)?,
                &r.get::<_, String>(5)?,
                &r.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "allocations": allocations }))
}

fn sections_students(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let allocation_id = required_str(params, "allocationId")?;

    let allocation = conn
        .query_row(
            "SELECT id, teacher_id, subject, department, section, start_time, end_time
             FROM section_allocations WHERE id = ?",
            [&allocation_id],
            |r| {
                Ok((
                    allocation_json(
                        &r.get::<_, String>(0)?,
                        &r.get::<_, String>(1)?,
                        &r.get::<_, String>(2)?,
                        &r.get::<_, String>(3)?,
                        &r.get::<_, String>(4)?,
                        &r.get::<_, String>(5)?,
                        &r.get::<_, String>(6)?,
                    ),
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| IpcError::new("not_found", "allocation not found"))?;
    let (alloc_json, department, section) = allocation;

    let mut stmt = conn.prepare(
        "SELECT id, name, admission_no, status FROM students
         WHERE department = ? AND section = ? ORDER BY admission_no",
    )?;
    let students = stmt
        .query_map((&department, &section), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "admissionNo": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({ "allocation": alloc_json, "students": students }))
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, IpcError> {
    let conn = db_conn(state)?;
    match req.method.as_str() {
        "sections.allocate" => sections_allocate(conn, &req.params),
        "sections.list" => sections_list(conn),
        "sections.students" => sections_students(conn, &req.params),
        _ => unreachable!("router only sends section methods"),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sections.allocate" | "sections.list" | "sections.students" => {
            Some(match dispatch(state, req) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        _ => None,
    }
}
