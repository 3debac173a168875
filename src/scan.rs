use crate::token::{ScanContext, TokenValidator, TokenVerdict};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, ToSql};
use serde::Serialize;
use thiserror::Error;

/// Scans more than this many minutes after window start are recorded LATE.
/// A scan at exactly start + grace is still PRESENT.
pub const LATE_GRACE_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceStatus {
    #[serde(rename = "PRESENT")]
    Present,
    #[serde(rename = "ABSENT")]
    Absent,
    #[serde(rename = "LATE")]
    Late,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRESENT" => Some(AttendanceStatus::Present),
            "ABSENT" => Some(AttendanceStatus::Absent),
            "LATE" => Some(AttendanceStatus::Late),
            _ => None,
        }
    }
}

impl FromSql for AttendanceStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for AttendanceStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentStatus {
    Active,
    Inactive,
    Debarred,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StudentStatus::Active => "ACTIVE",
            StudentStatus::Inactive => "INACTIVE",
            StudentStatus::Debarred => "DEBARRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(StudentStatus::Active),
            "INACTIVE" => Some(StudentStatus::Inactive),
            "DEBARRED" => Some(StudentStatus::Debarred),
            _ => None,
        }
    }

    pub fn is_blocked(self) -> bool {
        !matches!(self, StudentStatus::Active)
    }
}

impl std::fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_ascii_lowercase())
    }
}

impl FromSql for StudentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for StudentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub teacher_id: String,
    pub subject: String,
    pub date: String,
    pub status: AttendanceStatus,
    pub scan_time: String,
    pub is_manual_override: bool,
    pub override_reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("allocation not found")]
    AllocationNotFound,
    #[error("allocation does not belong to this teacher")]
    Forbidden,
    #[error("scan is outside the allocated time slot")]
    OutOfWindow,
    #[error("invalid or unverifiable token payload")]
    InvalidToken,
    #[error("student not found for token")]
    StudentNotFound,
    #[error("student is {status} and cannot mark attendance")]
    Blocked { status: StudentStatus },
    #[error("student does not belong to this department/section")]
    VisibilityMismatch,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl ScanError {
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::AllocationNotFound | ScanError::StudentNotFound => "not_found",
            ScanError::Forbidden => "forbidden",
            ScanError::OutOfWindow => "out_of_window",
            ScanError::InvalidToken => "invalid_token",
            ScanError::Blocked { .. } => "blocked",
            ScanError::VisibilityMismatch => "visibility_mismatch",
            ScanError::Db(_) => "db_query_failed",
        }
    }
}

/// Terminal result of one scan evaluation. `AlreadyMarked` is a success with
/// an informational code, not an error: the existing record rides along and
/// nothing is mutated.
#[derive(Debug)]
pub enum ScanOutcome {
    Marked { record: AttendanceRecord, late: bool },
    AlreadyMarked { record: AttendanceRecord },
}

#[derive(Debug, Clone, Copy)]
pub struct ScanRequest<'a> {
    pub teacher_id: &'a str,
    pub allocation_id: &'a str,
    pub payload: &'a str,
    pub observed: DateTime<Utc>,
}

#[derive(Debug)]
struct Allocation {
    teacher_id: String,
    subject: String,
    department: String,
    section: String,
    start_time: String,
    end_time: String,
}

#[derive(Debug)]
struct SubjectPerson {
    status: StudentStatus,
    department: String,
    section: String,
}

/// Wall-clock "HH:MM". Malformed stored values degrade to midnight rather
/// than failing the scan; allocation creation validates the format upfront.
fn parse_wall_clock(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").unwrap_or(NaiveTime::MIN)
}

pub(crate) fn window_bounds(
    day: NaiveDate,
    start_time: &str,
    end_time: &str,
) -> (NaiveDateTime, NaiveDateTime) {
    (
        day.and_time(parse_wall_clock(start_time)),
        day.and_time(parse_wall_clock(end_time)),
    )
}

/// End instant itself is inside the window; one unit past it is out.
fn within_window(observed: NaiveDateTime, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    observed >= start && observed <= end
}

fn is_late(observed: NaiveDateTime, start: NaiveDateTime) -> bool {
    observed - start > Duration::minutes(LATE_GRACE_MINUTES)
}

pub fn find_record(
    conn: &Connection,
    student_id: &str,
    teacher_id: &str,
    subject: &str,
    date: &str,
) -> rusqlite::Result<Option<AttendanceRecord>> {
    conn.query_row(
        "SELECT id, student_id, teacher_id, subject, date, status, scan_time,
                is_manual_override, override_reason
         FROM attendance
         WHERE student_id = ? AND teacher_id = ? AND subject = ? AND date = ?",
        (student_id, teacher_id, subject, date),
        |r| {
            Ok(AttendanceRecord {
                id: r.get(0)?,
                student_id: r.get(1)?,
                teacher_id: r.get(2)?,
                subject: r.get(3)?,
                date: r.get(4)?,
                status: r.get(5)?,
                scan_time: r.get(6)?,
                is_manual_override: r.get::<_, i64>(7)? != 0,
                override_reason: r.get(8)?,
            })
        },
    )
    .optional()
}

/// The scan state machine. Every rejection is terminal for this attempt;
/// the caller may simply re-scan.
pub fn evaluate_scan(
    conn: &Connection,
    validator: &dyn TokenValidator,
    req: &ScanRequest,
) -> Result<ScanOutcome, ScanError> {
    // 1. Resolve the allocation and check ownership.
    let alloc: Allocation = conn
        .query_row(
            "SELECT teacher_id, subject, department, section, start_time, end_time
             FROM section_allocations WHERE id = ?",
            [req.allocation_id],
            |r| {
                Ok(Allocation {
                    teacher_id: r.get(0)?,
                    subject: r.get(1)?,
                    department: r.get(2)?,
                    section: r.get(3)?,
                    start_time: r.get(4)?,
                    end_time: r.get(5)?,
                })
            },
        )
        .optional()?
        .ok_or(ScanError::AllocationNotFound)?;
    if alloc.teacher_id != req.teacher_id {
        return Err(ScanError::Forbidden);
    }

    // 2. Today's concrete window from the allocation's wall-clock fields.
    let observed = req.observed.naive_utc();
    let day = observed.date();
    let (start, end) = window_bounds(day, &alloc.start_time, &alloc.end_time);
    if !within_window(observed, start, end) {
        return Err(ScanError::OutOfWindow);
    }

    // 3. Token verification; service failure fails closed.
    let ctx = ScanContext {
        teacher_id: req.teacher_id,
        allocation_id: req.allocation_id,
        observed: req.observed,
    };
    let (student_id, qr_secret) = match validator.validate(req.payload, &ctx) {
        TokenVerdict::Verified {
            student_id,
            qr_secret,
        } => (student_id, qr_secret),
        TokenVerdict::Invalid => return Err(ScanError::InvalidToken),
    };

    // 4. Subject must exist for exactly that (id, secret) pair, be markable,
    //    and belong to the allocation's cohort.
    let person: SubjectPerson = conn
        .query_row(
            "SELECT status, department, section FROM students WHERE id = ? AND qr_secret = ?",
            (&student_id, &qr_secret),
            |r| {
                Ok(SubjectPerson {
                    status: r.get(0)?,
                    department: r.get(1)?,
                    section: r.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or(ScanError::StudentNotFound)?;
    if person.status.is_blocked() {
        return Err(ScanError::Blocked {
            status: person.status,
        });
    }
    if person.department != alloc.department || person.section != alloc.section {
        return Err(ScanError::VisibilityMismatch);
    }

    // 5. Idempotency on the calendar-day key.
    let date = day.format("%Y-%m-%d").to_string();
    if let Some(existing) = find_record(conn, &student_id, req.teacher_id, &alloc.subject, &date)? {
        return Ok(ScanOutcome::AlreadyMarked { record: existing });
    }

    // 6.–7. Lateness, then a single constrained insert.
    let late = is_late(observed, start);
    let status = if late {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    };
    let record = AttendanceRecord {
        id: uuid::Uuid::new_v4().to_string(),
        student_id: student_id.clone(),
        teacher_id: req.teacher_id.to_string(),
        subject: alloc.subject.clone(),
        date: date.clone(),
        status,
        scan_time: req.observed.to_rfc3339(),
        is_manual_override: false,
        override_reason: None,
    };

    let inserted = conn.execute(
        "INSERT INTO attendance(id, student_id, teacher_id, subject, date, status,
                                scan_time, is_manual_override, override_reason)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0, NULL)",
        (
            &record.id,
            &record.student_id,
            &record.teacher_id,
            &record.subject,
            &record.date,
            record.status,
            &record.scan_time,
        ),
    );
    match inserted {
        Ok(_) => Ok(ScanOutcome::Marked { record, late }),
        // A concurrent identical scan won the race; the unique key is the
        // authority, so re-read and report the winner's record.
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let existing = find_record(conn, &student_id, req.teacher_id, &alloc.subject, &date)?
                .ok_or(ScanError::StudentNotFound)?;
            Ok(ScanOutcome::AlreadyMarked { record: existing })
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("student not found")]
    StudentNotFound,
    #[error("teacher not found")]
    TeacherNotFound,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl OverrideError {
    pub fn code(&self) -> &'static str {
        match self {
            OverrideError::StudentNotFound | OverrideError::TeacherNotFound => "not_found",
            OverrideError::Db(_) => "db_update_failed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OverrideRequest<'a> {
    pub student_id: &'a str,
    pub teacher_id: &'a str,
    pub subject: &'a str,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub reason: &'a str,
}

/// Administrative upsert on the per-day key. Bypasses window and duplicate
/// checks on purpose; always tags the record as manually overridden.
pub fn apply_override(
    conn: &Connection,
    req: &OverrideRequest,
    now: DateTime<Utc>,
) -> Result<AttendanceRecord, OverrideError> {
    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [req.student_id], |r| {
            r.get(0)
        })
        .optional()?;
    if student_exists.is_none() {
        return Err(OverrideError::StudentNotFound);
    }
    let teacher_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [req.teacher_id], |r| {
            r.get(0)
        })
        .optional()?;
    if teacher_exists.is_none() {
        return Err(OverrideError::TeacherNotFound);
    }

    let date = req.date.format("%Y-%m-%d").to_string();
    conn.execute(
        "INSERT INTO attendance(id, student_id, teacher_id, subject, date, status,
                                scan_time, is_manual_override, override_reason)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)
         ON CONFLICT(student_id, teacher_id, subject, date) DO UPDATE SET
           status = excluded.status,
           scan_time = excluded.scan_time,
           is_manual_override = 1,
           override_reason = excluded.override_reason",
        (
            uuid::Uuid::new_v4().to_string(),
            req.student_id,
            req.teacher_id,
            req.subject,
            &date,
            req.status,
            now.to_rfc3339(),
            req.reason,
        ),
    )?;

    find_record(conn, req.student_id, req.teacher_id, req.subject, &date)?
        .ok_or(OverrideError::StudentNotFound)
}
