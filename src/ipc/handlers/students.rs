use crate::ipc::error::{ok, IpcError};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::scan::StudentStatus;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

fn student_json(
    id: &str,
    name: &str,
    admission_no: &str,
    email: &str,
    department: &str,
    section: &str,
    semester: &str,
    status: &str,
    qr_secret: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "admissionNo": admission_no,
        "email": email,
        "department": department,
        "section": section,
        "semester": semester,
        "status": status,
        "qrSecret": qr_secret,
    })
}

fn parse_status(params: &serde_json::Value, key: &str) -> Result<Option<StudentStatus>, IpcError> {
    match optional_str(params, key) {
        None => Ok(None),
        Some(raw) => StudentStatus::parse(&raw)
            .map(Some)
            .ok_or_else(|| IpcError::bad_params(format!("invalid status: {}", raw))),
    }
}

/// The secret is issued with the row and never regenerated; the token
/// service binds scanned payloads to it.
fn new_qr_secret() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let frag = uuid::Uuid::new_v4().simple().to_string();
    format!("stu_{}_{}", nanos, &frag[..8])
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let name = required_str(params, "name")?;
    let admission_no = required_str(params, "admissionNo")?;
    let email = required_str(params, "email")?;
    let department = required_str(params, "department")?;
    let section = required_str(params, "section")?;
    let semester = required_str(params, "semester")?;
    let status = parse_status(params, "status")?.unwrap_or(StudentStatus::Active);

    let id = uuid::Uuid::new_v4().to_string();
    let qr_secret = new_qr_secret();
    let inserted = conn.execute(
        "INSERT INTO students(id, name, admission_no, email, department, section, semester, status, qr_secret)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &admission_no,
            &email,
            &department,
            &section,
            &semester,
            status,
            &qr_secret,
        ),
    );
    match inserted {
        Ok(_) => Ok(json!({
            "student": student_json(
                &id, &name, &admission_no, &email, &department, &section,
                &semester, status.as_str(), &qr_secret,
            )
        })),
        Err(e) if is_unique_violation(&e) => Err(IpcError::new(
            "conflict",
            format!("admission number {} already exists", admission_no),
        )),
        Err(e) => Err(e.into()),
    }
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let student_id = required_str(params, "studentId")?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (key, column) in [
        ("name", "name"),
        ("email", "email"),
        ("department", "department"),
        ("section", "section"),
        ("semester", "semester"),
    ] {
        if let Some(v) = optional_str(params, key) {
            sets.push(column);
            values.push(Value::Text(v));
        }
    }
    if let Some(status) = parse_status(params, "status")? {
        sets.push("status");
        values.push(Value::Text(status.as_str().to_string()));
    }
    if sets.is_empty() {
        return Err(IpcError::bad_params("no updatable fields supplied"));
    }

    let assignments = sets
        .iter()
        .map(|c| format!("{} = ?", c))
        .collect::<Vec<_>>()
        .join(", ");
    values.push(Value::Text(student_id.clone()));
    let changed = conn.execute(
        &format!("UPDATE students SET {} WHERE id = ?", assignments),
        params_from_iter(values),
    )?;
    if changed == 0 {
        return Err(IpcError::new("not_found", "student not found"));
    }

    let student = conn
        .query_row(
            "SELECT id, name, admission_no, email, department, section, semester, status, qr_secret
             FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok(student_json(
                    &r.get::<_, String>(0)?,
                    &r.get::<_, String>(1)?,
                    &r.get::<_, String>(2)?,
                    &r.get::<_, String>(3)?,
                    &r.get::<_, String>(4)?,
                    &r.get::<_, String>(5)?,
                    &r.get::<_, String>(6)?,
                    &r.get::<_, String>(7)?,
                    &r.get::<_, String>(8)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| IpcError::new("not_found", "student not found"))?;
    Ok(json!({ "student": student }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let mut sql = String::from(
        "SELECT id, name, admission_no, email, department, section, semester, status, qr_secret
         FROM students WHERE 1=1",
    );
    let mut values: Vec<Value> = Vec::new();
    for (key, column) in [
        ("department", "department"),
        ("section", "section"),
        ("semester", "semester"),
    ] {
        if let Some(v) = optional_str(params, key) {
            sql.push_str(&format!(" AND {} = ?", column));
            values.push(Value::Text(v));
        }
    }
    if let Some(status) = parse_status(params, "status")? {
        sql.push_str(" AND status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(search) = optional_str(params, "search") {
        sql.push_str(" AND (name LIKE ? COLLATE NOCASE OR admission_no LIKE ? COLLATE NOCASE)");
        let pattern = format!("%{}%", search);
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }
    sql.push_str(" ORDER BY admission_no");

    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(params_from_iter(values), |r| {
            Ok(student_json(
                &r.get::<_, String>(0)?,
                &r.get::<_, String>(1)?,
                &r.get::<_, String>(2)?,
                &r.get::<_, String>(3)?,
                &r.get::<_, String>(4)?,
                &r.get::<_, String>(5)?,
                &r.get::<_, String>(6)?,
                &r.get::<_, String>(7)?,
                &r.get::<_, String>(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, IpcError> {
    let conn = db_conn(state)?;
    match req.method.as_str() {
        "students.create" => students_create(conn, &req.params),
        "students.update" => students_update(conn, &req.params),
        "students.list" => students_list(conn, &req.params),
        _ => unreachable!("router only sends student methods"),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" | "students.update" | "students.list" => Some(
            match dispatch(state, req) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            },
        ),
        _ => None,
    }
}
