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
    let exe = env!("CARGO_BIN_EXE_rasidd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rasidd");
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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

#[test]
fn interactive_save_validates_and_recomputes_totals() {
    let workspace = temp_dir("rasidd-save-flow");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "studentNumber": "2024001",
            "name": "أحمد بن علي",
            "studyLevel": "السنة الأولى",
            "studyMode": "نظامي"
        }),
    );

    // التفسير carries monthly max 12 and exam max 28 at this level.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.save",
        json!({
            "studentNumber": "2024001",
            "subjectName": "التفسير",
            "academicYear": "1446",
            "period": "الفترة الأولى",
            "month1": 10,
            "month2": 11,
            "month3": 9,
            "periodExam": 15
        }),
    );
    assert_eq!(saved.get("workTotal").and_then(|v| v.as_f64()), Some(10.0));
    assert_eq!(saved.get("periodTotal").and_then(|v| v.as_f64()), Some(25.0));
    assert_eq!(saved.get("overwrote").and_then(|v| v.as_bool()), Some(false));

    // Same key again: idempotent upsert, flagged as an overwrite.
    let saved_again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.save",
        json!({
            "studentNumber": "2024001",
            "subjectName": "التفسير",
            "academicYear": "1446",
            "period": "الفترة الأولى",
            "month1": 10,
            "month2": 11,
            "month3": 9,
            "periodExam": 20
        }),
    );
    assert_eq!(
        saved_again.get("periodTotal").and_then(|v| v.as_f64()),
        Some(30.0)
    );
    assert_eq!(
        saved_again.get("overwrote").and_then(|v| v.as_bool()),
        Some(true)
    );

    let rejected = request(
        &mut stdin,
        &mut reader,
        "5",
        "grades.save",
        json!({
            "studentNumber": "2024001",
            "subjectName": "التفسير",
            "academicYear": "1446",
            "period": "الفترة الأولى",
            "month1": 13
        }),
    );
    assert_eq!(error_code(&rejected), "bad_params");
    let message = rejected
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("");
    assert!(message.contains("12"), "message should name the max: {}", message);

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.list",
        json!({ "studentNumber": "2024001", "academicYear": "1446" }),
    );
    let grades = listing.get("grades").and_then(|v| v.as_array()).unwrap();
    assert_eq!(grades.len(), 1);
    assert_eq!(
        grades[0].get("periodTotal").and_then(|v| v.as_f64()),
        Some(30.0)
    );
    let finals = listing
        .get("finalResults")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(finals.len(), 1);
    assert_eq!(
        finals[0].get("status").and_then(|v| v.as_str()),
        Some("غير مكتمل")
    );
}

#[test]
fn restricted_cohorts_are_rejected_with_reasons() {
    let workspace = temp_dir("rasidd-save-restricted");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "studentNumber": "2024002",
            "name": "سالم المنتسب",
            "studyLevel": "السنة الثانية",
            "studyMode": "انتساب",
            "isDiploma": true
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "studentNumber": "2024003",
            "name": "ماهر بن صالح",
            "studyLevel": "السنة الثالثة",
            "studyMode": "نظامي"
        }),
    );

    // Correspondence diploma holders never enter grades.
    let denied = request(
        &mut stdin,
        &mut reader,
        "4",
        "grades.save",
        json!({
            "studentNumber": "2024002",
            "subjectName": "الفقه",
            "academicYear": "1446",
            "period": "الفترة الأولى",
            "month1": 5
        }),
    );
    assert_eq!(error_code(&denied), "restricted");

    // Third-year third-period results come from the central board.
    let denied_period = request(
        &mut stdin,
        &mut reader,
        "5",
        "grades.save",
        json!({
            "studentNumber": "2024003",
            "subjectName": "الفقه",
            "academicYear": "1446",
            "period": "الفترة الثالثة",
            "periodExam": 10
        }),
    );
    assert_eq!(error_code(&denied_period), "restricted");
    let available = denied_period
        .get("error")
        .and_then(|e| e.get("details"))
        .and_then(|d| d.get("availablePeriods"))
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(available.len(), 2);

    // The same student is fine in an earlier period.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.save",
        json!({
            "studentNumber": "2024003",
            "subjectName": "الفقه",
            "academicYear": "1446",
            "period": "الفترة الأولى",
            "month1": 10,
            "periodExam": 20
        }),
    );
}

#[test]
fn registry_and_catalog_surfaces_round_trip() {
    let workspace = temp_dir("rasidd-registry");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "studentNumber": "2024010",
            "name": "فيصل الخريج",
            "studyLevel": "التخرج",
            "studyMode": "نظامي"
        }),
    );
    assert_eq!(
        created
            .pointer("/student/studyLevel")
            .and_then(|v| v.as_str()),
        Some("التخرج")
    );

    let duplicate = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "studentNumber": "2024010",
            "name": "آخر",
            "studyLevel": "السنة الأولى",
            "studyMode": "نظامي"
        }),
    );
    assert_eq!(error_code(&duplicate), "conflict");

    let unknown_level = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "studyLevel": "سنة خامسة" }),
    );
    assert_eq!(error_code(&unknown_level), "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.list",
        json!({ "studyLevel": "التخرج", "studyMode": "نظامي" }),
    );
    let students = listed.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(students.len(), 1);

    // Graduation-level distributions carry the 75% reduction.
    let catalog = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "catalog.list",
        json!({ "studyLevel": "التخرج" }),
    );
    let subjects = catalog.get("subjects").and_then(|v| v.as_array()).unwrap();
    let tafsir = subjects
        .iter()
        .find(|s| s.get("name").and_then(|n| n.as_str()) == Some("التفسير"))
        .expect("التفسير in catalog");
    assert_eq!(
        tafsir
            .pointer("/distribution/monthlyGrade")
            .and_then(|v| v.as_u64()),
        Some(9)
    );
    assert_eq!(
        tafsir
            .pointer("/distribution/thirdPeriodTotal")
            .and_then(|v| v.as_u64()),
        Some(100)
    );
}
