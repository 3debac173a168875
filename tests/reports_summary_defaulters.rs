use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .env_remove("ROLLCALL_TOKEN_SERVICE_URL")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Cohorts {
    cs_a1: String,
    cs_a2: String,
    ee_b1: String,
}

/// Students: two in CS/A, one in EE/B. Their per-day statuses over
/// 2025-03-03..07 (subject Databases) are written through the override path
/// so each status is explicit:
///   cs_a1: P P P A A  -> 3/5 = 60%
///   cs_a2: P P P P L  -> 5/5 = 100%
///   ee_b1: P P P L A  -> 4/5 = 80%
fn seed_records(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Cohorts {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        "t1",
        "teachers.create",
        json!({
            "name": "Ada Rowe",
            "email": "a.rowe@college.edu",
            "subject": "Databases",
            "department": "CS",
        }),
    );
    let teacher_id = teacher["teacher"]["id"].as_str().expect("teacher id").to_string();

    let mut make_student =
        |rid: &str, name: &str, admission: &str, department: &str, section: &str| -> String {
            let s = request_ok(
                stdin,
                reader,
                rid,
                "students.create",
                json!({
                    "name": name,
                    "admissionNo": admission,
                    "email": format!("{}@college.edu", admission),
                    "department": department,
                    "section": section,
                    "semester": "4",
                }),
            );
            s["student"]["id"].as_str().expect("student id").to_string()
        };
    let cs_a1 = make_student("s1", "Noor Haddad", "CS-2025-001", "CS", "A");
    let cs_a2 = make_student("s2", "Liam Park", "CS-2025-002", "CS", "A");
    let ee_b1 = make_student("s3", "Mira Voss", "EE-2025-001", "EE", "B");

    let dates = [
        "2025-03-03",
        "2025-03-04",
        "2025-03-05",
        "2025-03-06",
        "2025-03-07",
    ];
    let plan: [(&str, [&str; 5]); 3] = [
        (&cs_a1, ["PRESENT", "PRESENT", "PRESENT", "ABSENT", "ABSENT"]),
        (&cs_a2, ["PRESENT", "PRESENT", "PRESENT", "PRESENT", "LATE"]),
        (&ee_b1, ["PRESENT", "PRESENT", "PRESENT", "LATE", "ABSENT"]),
    ];
    let mut n = 0;
    for (student_id, statuses) in plan {
        for (date, status) in dates.iter().zip(statuses) {
            n += 1;
            let _ = request_ok(
                stdin,
                reader,
                &format!("ov{}", n),
                "attendance.override",
                json!({
                    "studentId": student_id,
                    "teacherId": teacher_id,
                    "subject": "Databases",
                    "date": date,
                    "status": status,
                    "reason": "seeded for reporting",
                }),
            );
        }
    }

    Cohorts { cs_a1, cs_a2, ee_b1 }
}

#[test]
fn summary_counts_and_percentages_per_cohort() {
    let workspace = temp_dir("rollcall-summary");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seed_records(&mut stdin, &mut reader, &workspace);

    // CS/A only: 10 records, 7 PRESENT / 2 ABSENT / 1 LATE. The EE/B
    // student's rows fall inside the date range but out of the cohort.
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "reports.summary",
        json!({
            "department": "CS",
            "section": "A",
            "subject": "Databases",
            "fromDate": "2025-03-03",
            "toDate": "2025-03-07",
        }),
    );
    assert_eq!(summary["total"].as_i64(), Some(10));
    assert_eq!(summary["counts"]["PRESENT"].as_i64(), Some(7));
    assert_eq!(summary["counts"]["ABSENT"].as_i64(), Some(2));
    assert_eq!(summary["counts"]["LATE"].as_i64(), Some(1));
    assert_eq!(summary["percentages"]["present"].as_i64(), Some(70));
    assert_eq!(summary["percentages"]["absent"].as_i64(), Some(20));
    assert_eq!(summary["percentages"]["late"].as_i64(), Some(10));
}

#[test]
fn summary_with_no_matches_is_all_zero() {
    let workspace = temp_dir("rollcall-summary-zero");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seed_records(&mut stdin, &mut reader, &workspace);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "reports.summary",
        json!({ "subject": "Quantum Basket Weaving" }),
    );
    assert_eq!(summary["total"].as_i64(), Some(0));
    assert_eq!(summary["percentages"]["present"].as_i64(), Some(0));
    assert_eq!(summary["percentages"]["absent"].as_i64(), Some(0));
    assert_eq!(summary["percentages"]["late"].as_i64(), Some(0));
}

#[test]
fn defaulters_respect_threshold_and_count_late_as_present() {
    let workspace = temp_dir("rollcall-defaulters");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let c = seed_records(&mut stdin, &mut reader, &workspace);

    // Default threshold 75: only the 60% student falls below.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "reports.defaulters",
        json!({ "subject": "Databases" }),
    );
    assert_eq!(result["threshold"].as_u64(), Some(75));
    let list = result["defaulters"].as_array().expect("defaulter list");
    assert_eq!(list.len(), 1, "{}", result);
    assert_eq!(list[0]["student"]["id"].as_str(), Some(c.cs_a1.as_str()));
    assert_eq!(list[0]["total"].as_i64(), Some(5));
    assert_eq!(list[0]["present"].as_i64(), Some(3));
    assert_eq!(list[0]["percentage"].as_i64(), Some(60));

    // Raising the threshold pulls in the 80% student; the 100% one (whose
    // LATE day counts as attendance) stays out. Ordered worst first.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "reports.defaulters",
        json!({ "subject": "Databases", "threshold": 85 }),
    );
    let list = result["defaulters"].as_array().expect("defaulter list");
    assert_eq!(list.len(), 2, "{}", result);
    assert_eq!(list[0]["student"]["id"].as_str(), Some(c.cs_a1.as_str()));
    assert_eq!(list[0]["percentage"].as_i64(), Some(60));
    assert_eq!(list[1]["student"]["id"].as_str(), Some(c.ee_b1.as_str()));
    assert_eq!(list[1]["percentage"].as_i64(), Some(80));

    // A cohort filter must also exclude the 100% student's rows entirely.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "reports.defaulters",
        json!({ "department": "EE", "section": "B", "threshold": 85 }),
    );
    let list = result["defaulters"].as_array().expect("defaulter list");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["student"]["id"].as_str(), Some(c.ee_b1.as_str()));
    assert!(
        list.iter()
            .all(|d| d["student"]["id"].as_str() != Some(c.cs_a2.as_str())),
        "a student with zero sub-threshold ratios must never appear"
    );
}
