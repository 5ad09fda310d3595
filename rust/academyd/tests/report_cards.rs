use academyd::api::{handle_request, AppState, Request, StateOptions};
use academyd::storage::REPORT_CARDS_BUCKET;
use base64::Engine;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

fn open_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().expect("temp dir");
    let state = AppState::open(
        dir.path(),
        &StateOptions {
            public_url: "http://localhost:8787".to_string(),
            signing_key: b"test-signing-key".to_vec(),
            session_ttl: Duration::from_secs(3600),
            signed_url_ttl: Duration::from_secs(600),
        },
    )
    .expect("open state");
    (dir, state)
}

fn request_ok(state: &mut AppState, req: Request) -> Value {
    let op = req.operation.clone();
    let reply = handle_request(state, req);
    assert!(reply.status < 300, "{} failed: {:?}", op, reply);
    reply.body
}

fn request_err(state: &mut AppState, req: Request, status: u16) -> Value {
    let op = req.operation.clone();
    let reply = handle_request(state, req);
    assert_eq!(reply.status, status, "{} unexpected reply: {:?}", op, reply);
    reply.body
}

/// Academy owner token plus one enrolled student id.
fn setup(state: &mut AppState) -> (String, String) {
    request_ok(
        state,
        Request::post(
            "registerAcademy",
            json!({ "academy_name": "Oak", "email": "a@a.com", "phone": "9876543210", "password": "secret1" }),
        ),
    );
    let token = request_ok(
        state,
        Request::post("login", json!({ "credential": "a@a.com", "password": "secret1" })),
    )["token"]
        .as_str()
        .expect("token")
        .to_string();
    let student = request_ok(
        state,
        Request::post(
            "createStudent",
            json!({
                "first_name": "Kid",
                "date_of_birth": "2015-04-01",
                "registration_no": "R1",
                "class_name": "5",
                "academic_year": "2025",
            }),
        )
        .bearer(&token),
    )["student"]["student_id"]
        .as_str()
        .expect("student_id")
        .to_string();
    (token, student)
}

fn upload(student: &str, file_name: &str, bytes: &[u8], pct: Option<f64>) -> Request {
    Request::post(
        "uploadReportCard",
        json!({
            "student_id": student,
            "file_name": file_name,
            "file_base64": base64::engine::general_purpose::STANDARD.encode(bytes),
            "academic_year": "2025",
            "attendance_percentage": pct,
        }),
    )
}

fn signed_parts(url: &str) -> (String, HashMap<String, String>) {
    let rest = url
        .strip_prefix("http://localhost:8787/storage/")
        .expect("public url prefix");
    let (path, query) = rest.split_once('?').expect("query string");
    let params = query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    (path.to_string(), params)
}

#[test]
fn upload_stores_object_and_returns_verifiable_url() {
    let (_dir, mut state) = open_state();
    let (token, student) = setup(&mut state);
    let pdf = b"%PDF-1.4 report".to_vec();

    let reply = handle_request(
        &mut state,
        upload(&student, "term1.pdf", &pdf, Some(92.5)).bearer(&token),
    );
    assert_eq!(reply.status, 201, "{:?}", reply);
    let record = &reply.body["record"];
    assert_eq!(record["student_id"], student.as_str());
    assert_eq!(record["attendance_percentage"], 92.5);

    let url = record["report_card_url"].as_str().expect("url");
    let (path, params) = signed_parts(url);
    let (bucket, object_path) = path.split_once('/').expect("bucket");
    assert_eq!(bucket, REPORT_CARDS_BUCKET);
    assert!(object_path.ends_with(&format!("{}/term1.pdf", student)));
    assert!(object_path.starts_with("ACAD-"));

    let expires: i64 = params["expires"].parse().expect("expires");
    state
        .storage
        .verify(bucket, object_path, expires, &params["signature"])
        .expect("signature verifies");
    assert!(state
        .storage
        .verify(bucket, object_path, expires + 1, &params["signature"])
        .is_err());

    let stored = state
        .storage
        .get(bucket, object_path)
        .expect("get")
        .expect("object present");
    assert_eq!(stored.bytes, pdf);
    assert_eq!(stored.content_type, "application/pdf");
}

#[test]
fn upload_rejects_bad_input() {
    let (_dir, mut state) = open_state();
    let (token, student) = setup(&mut state);

    let mut bad_b64 = upload(&student, "a.pdf", b"x", None).bearer(&token);
    bad_b64.body["file_base64"] = json!("***not base64***");
    let reply = request_err(&mut state, bad_b64, 400);
    assert_eq!(reply["error"], "file_base64 is not valid base64");

    request_err(
        &mut state,
        upload(&student, "../escape.pdf", b"x", None).bearer(&token),
        400,
    );
    request_err(
        &mut state,
        upload(&student, "a.pdf", b"x", Some(120.0)).bearer(&token),
        400,
    );
    request_err(
        &mut state,
        upload("STU-2025-0000", "a.pdf", b"x", None).bearer(&token),
        404,
    );
    assert_eq!(
        academyd::db::table_count(&state.db, "student_records").unwrap(),
        0
    );
}

#[test]
fn performance_averages_attendance_newest_first() {
    let (_dir, mut state) = open_state();
    let (token, student) = setup(&mut state);

    let empty = request_ok(
        &mut state,
        Request::get("getStudentPerformance")
            .bearer(&token)
            .param("student_id", &student),
    );
    assert_eq!(empty["avgAttendance"], Value::Null);
    assert_eq!(empty["records"], json!([]));

    for (name, pct) in [("t1.pdf", Some(80.0)), ("t2.pdf", None), ("t3.pdf", Some(90.0))] {
        request_ok(&mut state, upload(&student, name, b"pdf", pct).bearer(&token));
    }

    let reply = request_ok(
        &mut state,
        Request::get("getStudentPerformance")
            .bearer(&token)
            .param("student_id", &student),
    );
    assert_eq!(reply["avgAttendance"], 85.0);
    let records = reply["records"].as_array().expect("records");
    assert_eq!(records.len(), 3);
    assert!(records[0]["report_card_url"]
        .as_str()
        .unwrap_or("")
        .contains("t3.pdf"));

    request_err(&mut state, Request::get("getStudentPerformance").bearer(&token), 400);
}
