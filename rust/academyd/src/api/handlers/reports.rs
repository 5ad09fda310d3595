use super::students::find_student;
use super::{authorize, parse_body, respond, STATUS_CREATED, STATUS_OK};
use crate::api::types::{AppState, Reply, Request};
use crate::db::now_rfc3339;
use crate::error::{ServiceError, ServiceResult};
use crate::identity::{caller_academy, Capability};
use crate::storage::REPORT_CARDS_BUCKET;
use crate::validate::{is_safe_file_name, present};
use base64::Engine;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/pdf";

const RECORD_COLUMNS: &str = "r.id, s.student_id, r.teacher_id, r.academic_year, r.subject, r.grade,
    r.attendance_percentage, r.behavior_notes, r.report_card_url, r.created_at";

fn record_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "student_id": r.get::<_, String>(1)?,
        "teacher_id": r.get::<_, String>(2)?,
        "academic_year": r.get::<_, Option<String>>(3)?,
        "subject": r.get::<_, Option<String>>(4)?,
        "grade": r.get::<_, Option<String>>(5)?,
        "attendance_percentage": r.get::<_, Option<f64>>(6)?,
        "behavior_notes": r.get::<_, Option<String>>(7)?,
        "report_card_url": r.get::<_, Option<String>>(8)?,
        "created_at": r.get::<_, String>(9)?,
    }))
}

fn load_record(conn: &Connection, id: &str) -> ServiceResult<Value> {
    let sql = format!(
        "SELECT {} FROM student_records r JOIN students s ON s.id = r.student_id WHERE r.id = ?",
        RECORD_COLUMNS
    );
    Ok(conn.query_row(&sql, [id], record_json)?)
}

#[derive(Debug, Deserialize)]
struct UploadReportCardBody {
    student_id: Option<String>,
    file_name: Option<String>,
    file_base64: Option<String>,
    content_type: Option<String>,
    academic_year: Option<String>,
    subject: Option<String>,
    grade: Option<String>,
    attendance_percentage: Option<f64>,
    behavior_notes: Option<String>,
}

fn upload_report_card(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::UploadReportCards,
        "Access denied: Only teacher/admin/academy can upload report cards",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let body: UploadReportCardBody = parse_body(req)?;
    let (Some(student_id), Some(file_name), Some(file_base64)) = (
        present(&body.student_id),
        present(&body.file_name),
        present(&body.file_base64),
    ) else {
        return Err(ServiceError::invalid("Missing required fields"));
    };
    if !is_safe_file_name(file_name) {
        return Err(ServiceError::invalid("Invalid file name"));
    }
    if let Some(pct) = body.attendance_percentage {
        if !(0.0..=100.0).contains(&pct) {
            return Err(ServiceError::invalid(
                "attendance_percentage must be between 0 and 100",
            ));
        }
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(file_base64)
        .map_err(|_| ServiceError::invalid("file_base64 is not valid base64"))?;
    let student = find_student(&state.db, &academy.id, student_id)?;

    let content_type = present(&body.content_type).unwrap_or(DEFAULT_CONTENT_TYPE);
    let path = format!("{}/{}/{}", academy.external_id, student.student_id, file_name);
    state
        .storage
        .put(REPORT_CARDS_BUCKET, &path, &bytes, content_type)?;
    let url = state
        .storage
        .signed_url(REPORT_CARDS_BUCKET, &path, state.signed_url_ttl)?;

    let id = Uuid::new_v4().to_string();
    state.db.execute(
        "INSERT INTO student_records(
            id, student_id, teacher_id, academic_year, subject, grade,
            attendance_percentage, behavior_notes, report_card_url, report_card_path, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            student.id,
            caller.user_id,
            present(&body.academic_year),
            present(&body.subject),
            present(&body.grade),
            body.attendance_percentage,
            present(&body.behavior_notes),
            url,
            path,
            now_rfc3339(),
        ],
    )?;
    info!(
        student_id = %student.student_id,
        path = %path,
        size = bytes.len(),
        "report card uploaded"
    );

    Ok(json!({
        "message": "Report card uploaded successfully",
        "record": load_record(&state.db, &id)?,
    }))
}

fn get_student_performance(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::ViewPerformance,
        "You don't have permission to view student performance",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let Some(student_id) = req.query_str("student_id") else {
        return Err(ServiceError::invalid("Missing student_id query param"));
    };
    let student = find_student(&state.db, &academy.id, student_id)?;

    let sql = format!(
        "SELECT {} FROM student_records r JOIN students s ON s.id = r.student_id
         WHERE r.student_id = ?
         ORDER BY r.created_at DESC, r.rowid DESC",
        RECORD_COLUMNS
    );
    let mut stmt = state.db.prepare(&sql)?;
    let records = stmt
        .query_map([&student.id], record_json)?
        .collect::<Result<Vec<_>, _>>()?;

    let values: Vec<f64> = records
        .iter()
        .filter_map(|r| r.get("attendance_percentage").and_then(Value::as_f64))
        .collect();
    let avg_attendance = if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    };

    Ok(json!({
        "student_id": student.student_id,
        "avgAttendance": avg_attendance,
        "records": records,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.operation.as_str() {
        "uploadReportCard" => Some(respond(req, "POST", STATUS_CREATED, || {
            upload_report_card(state, req)
        })),
        "getStudentPerformance" => Some(respond(req, "GET", STATUS_OK, || {
            get_student_performance(state, req)
        })),
        _ => None,
    }
}
