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

fn error_code(value: &serde_json::Value) -> String {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string()
}

struct World {
    teacher_id: String,
    other_teacher_id: String,
    allocation_id: String,
    student_id: String,
    payload: String,
}

fn seed_world(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &std::path::Path) -> World {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut make_teacher = |rid: &str, name: &str, email: &str| -> String {
        let t = request_ok(
            stdin,
            reader,
            rid,
            "teachers.create",
            json!({
                "name": name,
                "email": email,
                "subject": "Databases",
                "department": "CS",
            }),
        );
        t["teacher"]["id"].as_str().expect("teacher id").to_string()
    };
    let teacher_id = make_teacher("t1", "Ada Rowe", "a.rowe@college.edu");
    let other_teacher_id = make_teacher("t2", "Sam Okafor", "s.okafor@college.edu");

    let student = request_ok(
        stdin,
        reader,
        "s1",
        "students.create",
        json!({
            "name": "Noor Haddad",
            "admissionNo": "CS-2025-001",
            "email": "n.haddad@college.edu",
            "department": "CS",
            "section": "A",
            "semester": "4",
        }),
    );
    let student_id = student["student"]["id"].as_str().expect("student id").to_string();
    let qr_secret = student["student"]["qrSecret"].as_str().expect("qr secret");
    let payload = format!("ENC::{}::{}", student_id, qr_secret);

    let allocation = request_ok(
        stdin,
        reader,
        "al1",
        "sections.allocate",
        json!({
            "teacherId": teacher_id,
            "subject": "Databases",
            "department": "CS",
            "section": "A",
            "startTime": "09:00",
            "endTime": "10:00",
        }),
    );
    let allocation_id = allocation["allocation"]["id"]
        .as_str()
        .expect("allocation id")
        .to_string();

    World {
        teacher_id,
        other_teacher_id,
        allocation_id,
        student_id,
        payload,
    }
}

fn scan(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    teacher_id: &str,
    allocation_id: &str,
    payload: &str,
) -> serde_json::Value {
    request(
        stdin,
        reader,
        id,
        "attendance.scan",
        json!({
            "teacherId": teacher_id,
            "allocationId": allocation_id,
            "payload": payload,
            "timestamp": "2025-03-03T09:05:00Z",
        }),
    )
}

#[test]
fn unknown_allocation_is_not_found() {
    let workspace = temp_dir("rollcall-rej-alloc");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let w = seed_world(&mut stdin, &mut reader, &workspace);

    let resp = scan(&mut stdin, &mut reader, "sc", &w.teacher_id, "no-such-allocation", &w.payload);
    assert_eq!(error_code(&resp), "not_found");
}

#[test]
fn foreign_allocation_is_forbidden() {
    let workspace = temp_dir("rollcall-rej-owner");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let w = seed_world(&mut stdin, &mut reader, &workspace);

    let resp = scan(
        &mut stdin,
        &mut reader,
        "sc",
        &w.other_teacher_id,
        &w.allocation_id,
        &w.payload,
    );
    assert_eq!(error_code(&resp), "forbidden");
}

#[test]
fn malformed_payload_is_invalid_token() {
    let workspace = temp_dir("rollcall-rej-token");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let w = seed_world(&mut stdin, &mut reader, &workspace);

    for bad in ["no-tag-here", "ENC::missing-field", "QR::a::b"] {
        let resp = scan(&mut stdin, &mut reader, "sc", &w.teacher_id, &w.allocation_id, bad);
        assert_eq!(error_code(&resp), "invalid_token", "payload {:?}", bad);
    }
}

#[test]
fn wrong_secret_is_not_found() {
    let workspace = temp_dir("rollcall-rej-secret");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let w = seed_world(&mut stdin, &mut reader, &workspace);

    let forged = format!("ENC::{}::wrong-secret", w.student_id);
    let resp = scan(&mut stdin, &mut reader, "sc", &w.teacher_id, &w.allocation_id, &forged);
    assert_eq!(error_code(&resp), "not_found");
}

#[test]
fn inactive_and_debarred_students_are_blocked() {
    let workspace = temp_dir("rollcall-rej-blocked");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let w = seed_world(&mut stdin, &mut reader, &workspace);

    for status in ["INACTIVE", "DEBARRED"] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "up",
            "students.update",
            json!({ "studentId": w.student_id, "status": status }),
        );
        let resp = scan(&mut stdin, &mut reader, "sc", &w.teacher_id, &w.allocation_id, &w.payload);
        assert_eq!(error_code(&resp), "blocked", "status {}", status);
        assert_eq!(
            resp["error"]["details"]["status"].as_str(),
            Some(status),
            "{}",
            resp
        );
    }
}

#[test]
fn cohort_mismatch_is_visibility_mismatch() {
    let workspace = temp_dir("rollcall-rej-cohort");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let w = seed_world(&mut stdin, &mut reader, &workspace);

    // Move the student to another section; the allocation covers CS/A only.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "up",
        "students.update",
        json!({ "studentId": w.student_id, "section": "B" }),
    );
    let resp = scan(&mut stdin, &mut reader, "sc", &w.teacher_id, &w.allocation_id, &w.payload);
    assert_eq!(error_code(&resp), "visibility_mismatch");
}
