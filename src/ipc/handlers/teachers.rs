use crate::ipc::error::{ok, IpcError};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn teacher_json(
    id: &str,
    name: &str,
    email: &str,
    subject: &str,
    department: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "email": email,
        "subject": subject,
        "department": department,
    })
}

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, IpcError> {
    let name = required_str(params, "name")?;
    let email = required_str(params, "email")?;
    let subject = required_str(params, "subject")?;
    let department = required_str(params, "department")?;

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, name, email, subject, department) VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &email, &subject, &department),
    )?;
    Ok(json!({
        "teacher": teacher_json(&id, &name, &email, &subject, &department)
    }))
}

fn teachers_list(conn: &Connection) -> Result<serde_json::Value, IpcError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, subject, department FROM teachers ORDER BY name",
    )?;
    let teachers = stmt
        .query_map([], |r| {
            Ok(teacher_json(
                &r.get::<_, String>(0)?,
                &r.get::<_, String>(1)?,
                &r.get::<_, String>(2)?,
                &r.get::<_, String>(3)?,
                &r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "teachers": teachers }))
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, IpcError> {
    let conn = db_conn(state)?;
    match req.method.as_str() {
        "teachers.create" => teachers_create(conn, &req.params),
        "teachers.list" => teachers_list(conn),
        _ => unreachable!("router only sends teacher methods"),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" | "teachers.list" => Some(match dispatch(state, req) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
