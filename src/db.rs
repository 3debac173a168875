use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rollcall.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            subject TEXT NOT NULL,
            department TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            admission_no TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            department TEXT NOT NULL,
            section TEXT NOT NULL,
            semester TEXT NOT NULL,
            status TEXT NOT NULL,
            qr_secret TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_cohort ON students(department, section)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS section_allocations(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            department TEXT NOT NULL,
            section TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_section_allocations_teacher ON section_allocations(teacher_id)",
        [],
    )?;

    // The UNIQUE constraint is the authority for the one-record-per-day rule;
    // concurrent identical scans race here, not in application code.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            scan_time TEXT NOT NULL,
            is_manual_override INTEGER NOT NULL DEFAULT 0,
            override_reason TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            UNIQUE(student_id, teacher_id, subject, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_teacher_date ON attendance(teacher_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_subject_date ON attendance(subject, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    Ok(conn)
}

/// Idempotent admin bootstrap: create the default admin account unless a user
/// with the configured email already exists. Returns true when a row was created.
pub fn ensure_admin(conn: &Connection, email: &str, password: &str) -> anyhow::Result<bool> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM users WHERE email = ?", [email], |r| {
            r.get(0)
        })
        .optional()?;
    if existing.is_some() {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO users(id, name, email, password_hash, role) VALUES(?, ?, ?, ?, ?)",
        (
            uuid::Uuid::new_v4().to_string(),
            "Default Admin",
            email,
            password_digest(password),
            "ADMIN",
        ),
    )?;
    Ok(true)
}

fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}
