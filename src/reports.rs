use crate::scan::AttendanceStatus;
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_DEFAULTER_THRESHOLD: u32 = 75;

/// Filters shared by both report operations. Date bounds are inclusive
/// calendar days; department/section filter on the joined student's cohort.
#[derive(Debug, Clone, Default)]
pub struct ReportFilters {
    pub department: Option<String>,
    pub section: Option<String>,
    pub subject: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SummaryReport {
    pub total: i64,
    pub counts: StatusCounts,
    pub percentages: StatusPercentages,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    #[serde(rename = "PRESENT")]
    pub present: i64,
    #[serde(rename = "ABSENT")]
    pub absent: i64,
    #[serde(rename = "LATE")]
    pub late: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusPercentages {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaulter {
    pub student: DefaulterStudent,
    pub total: i64,
    pub present: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaulterStudent {
    pub id: String,
    pub name: String,
    pub admission_no: String,
    pub department: String,
    pub section: String,
}

struct JoinedRow {
    status: AttendanceStatus,
    student_id: String,
    student_name: String,
    admission_no: String,
    department: String,
    section: String,
}

/// One record per matching attendance row, already joined to the student so
/// cohort filters apply. SQL is built the same way for both reports.
fn select_joined(conn: &Connection, f: &ReportFilters) -> rusqlite::Result<Vec<JoinedRow>> {
    let mut sql = String::from(
        "SELECT a.status, s.id, s.name, s.admission_no, s.department, s.section
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE 1=1",
    );
    let mut values: Vec<Value> = Vec::new();
    if let Some(subject) = &f.subject {
        sql.push_str(" AND a.subject = ?");
        values.push(Value::Text(subject.clone()));
    }
    if let Some(from) = &f.from {
        sql.push_str(" AND a.date >= ?");
        values.push(Value::Text(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = &f.to {
        sql.push_str(" AND a.date <= ?");
        values.push(Value::Text(to.format("%Y-%m-%d").to_string()));
    }
    if let Some(department) = &f.department {
        sql.push_str(" AND s.department = ?");
        values.push(Value::Text(department.clone()));
    }
    if let Some(section) = &f.section {
        sql.push_str(" AND s.section = ?");
        values.push(Value::Text(section.clone()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| {
            Ok(JoinedRow {
                status: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                admission_no: r.get(3)?,
                department: r.get(4)?,
                section: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn percent(count: i64, total: i64) -> i64 {
    if total == 0 {
        0
    } else {
        (100.0 * count as f64 / total as f64).round() as i64
    }
}

pub fn attendance_summary(
    conn: &Connection,
    filters: &ReportFilters,
) -> rusqlite::Result<SummaryReport> {
    let rows = select_joined(conn, filters)?;
    let total = rows.len() as i64;
    let mut counts = StatusCounts {
        present: 0,
        absent: 0,
        late: 0,
    };
    for row in &rows {
        match row.status {
            AttendanceStatus::Present => counts.present += 1,
            AttendanceStatus::Absent => counts.absent += 1,
            AttendanceStatus::Late => counts.late += 1,
        }
    }
    let percentages = StatusPercentages {
        present: percent(counts.present, total),
        absent: percent(counts.absent, total),
        late: percent(counts.late, total),
    };
    Ok(SummaryReport {
        total,
        counts,
        percentages,
    })
}

/// LATE counts as attendance for the ratio; a student with no matching
/// records has no ratio and is left out entirely.
pub fn defaulters(
    conn: &Connection,
    filters: &ReportFilters,
    threshold: u32,
) -> rusqlite::Result<Vec<Defaulter>> {
    struct Agg {
        student: DefaulterStudent,
        total: i64,
        present: i64,
    }

    let rows = select_joined(conn, filters)?;
    let mut per_student: HashMap<String, Agg> = HashMap::new();
    for row in rows {
        let agg = per_student.entry(row.student_id.clone()).or_insert(Agg {
            student: DefaulterStudent {
                id: row.student_id,
                name: row.student_name,
                admission_no: row.admission_no,
                department: row.department,
                section: row.section,
            },
            total: 0,
            present: 0,
        });
        agg.total += 1;
        if matches!(
            row.status,
            AttendanceStatus::Present | AttendanceStatus::Late
        ) {
            agg.present += 1;
        }
    }

    let mut out: Vec<Defaulter> = per_student
        .into_values()
        .filter_map(|agg| {
            let percentage = percent(agg.present, agg.total);
            (percentage < threshold as i64).then_some(Defaulter {
                student: agg.student,
                total: agg.total,
                present: agg.present,
                percentage,
            })
        })
        .collect();
    out.sort_by(|a, b| {
        a.percentage
            .cmp(&b.percentage)
            .then_with(|| a.student.admission_no.cmp(&b.student.admission_no))
    });
    Ok(out)
}
