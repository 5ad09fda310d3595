use super::students::find_student;
use super::{authorize, parse_body, respond, STATUS_OK};
use crate::api::types::{AppState, Reply, Request};
use crate::attendance::{self, AttendanceEvent, AttendanceStatus, AttendanceType, RecordedEvent};
use crate::error::{ServiceError, ServiceResult};
use crate::identity::{caller_academy, Capability};
use crate::notify;
use crate::validate::present;
use chrono::NaiveDate;
use rusqlite::TransactionBehavior;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct AttendanceRecordInput {
    student_id: Option<String>,
    status: Option<String>,
    #[serde(default)]
    is_late: bool,
}

#[derive(Debug, Deserialize)]
struct MarkAttendanceBody {
    class_name: Option<String>,
    class_section: Option<String>,
    records: Option<Vec<AttendanceRecordInput>>,
}

struct Recorded {
    internal_id: String,
    student_id: String,
    status: AttendanceStatus,
    is_late: bool,
    event: RecordedEvent,
}

fn mark_attendance(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::MarkAttendance,
        "Only teachers can mark attendance",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let body: MarkAttendanceBody = parse_body(req)?;
    let (Some(class_name), Some(class_section), Some(records)) = (
        present(&body.class_name),
        present(&body.class_section),
        body.records.as_ref(),
    ) else {
        return Err(ServiceError::invalid("Invalid attendance payload"));
    };

    let mut parsed = Vec::with_capacity(records.len());
    for record in records {
        let Some(student_id) = present(&record.student_id) else {
            return Err(ServiceError::invalid("Invalid attendance payload"));
        };
        let raw_status = record.status.as_deref().unwrap_or("");
        let Some(status) = AttendanceStatus::parse(raw_status) else {
            return Err(ServiceError::invalid(format!(
                "Invalid attendance status: {}",
                raw_status
            )));
        };
        parsed.push((student_id, status, record.is_late));
    }

    let date = attendance::today();
    let tx = state
        .db
        .transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut recorded = Vec::with_capacity(parsed.len());
    for (student_id, status, is_late) in parsed {
        let student = find_student(&tx, &academy.id, student_id)?;
        let event = attendance::record_event(
            &tx,
            &AttendanceEvent {
                academy_id: &academy.id,
                class_name,
                class_section,
                student_id: &student.id,
                status,
                is_late,
                date: &date,
            },
        )?;
        recorded.push(Recorded {
            internal_id: student.id,
            student_id: student.student_id,
            status,
            is_late,
            event,
        });
    }
    tx.commit()?;
    info!(
        academy_id = %academy.external_id,
        class_name,
        class_section,
        count = recorded.len(),
        "attendance batch committed"
    );

    // Attendance is durable from here on; notification failures only lose the notification.
    let mut results = Vec::with_capacity(recorded.len());
    for r in recorded {
        let message = notify::message_for(r.event.attendance_type, r.status, r.is_late);
        let notified = match notify::dispatch(&state.db, &academy.id, &r.internal_id, message) {
            Ok(id) => id.is_some(),
            Err(e) => {
                warn!(student_id = %r.student_id, error = %e, "notification dispatch failed");
                false
            }
        };
        results.push(json!({
            "student_id": r.student_id,
            "position": r.event.position,
            "attendance_type": r.event.attendance_type,
            "status": r.status,
            "is_late": r.is_late,
            "notified": notified,
        }));
    }

    Ok(json!({
        "message": "Attendance marked successfully",
        "date": date,
        "recorded": results,
    }))
}

#[derive(Debug, Deserialize)]
struct SendNotificationsBody {
    class_name: Option<String>,
    class_section: Option<String>,
    attendance_type: Option<String>,
    date: Option<String>,
}

fn send_attendance_notifications(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::SendNotifications,
        "You don't have permission to send notifications",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let body: SendNotificationsBody = parse_body(req)?;
    let (Some(class_name), Some(class_section), Some(raw_type)) = (
        present(&body.class_name),
        present(&body.class_section),
        present(&body.attendance_type),
    ) else {
        return Err(ServiceError::invalid(
            "Missing required fields: class_name, class_section, attendance_type",
        ));
    };
    let Some(attendance_type) = AttendanceType::parse(raw_type) else {
        return Err(ServiceError::invalid(
            "attendance_type must be ARRIVAL or DEPARTURE",
        ));
    };
    let date = match present(&body.date) {
        Some(d) => {
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|_| ServiceError::invalid("date must be YYYY-MM-DD"))?;
            d.to_string()
        }
        None => attendance::today(),
    };

    let tx = state.db.transaction()?;
    let slot = {
        let mut stmt = tx.prepare(
            "SELECT student_id, status, is_late
             FROM student_attendance
             WHERE academy_id = ? AND class_name = ? AND class_section = ?
               AND attendance_date = ? AND position = ?
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![
                    academy.id,
                    class_name,
                    class_section,
                    date,
                    attendance_type.position()
                ],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, i64>(2)? != 0,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut sent = 0usize;
    for (student_id, raw_status, is_late) in slot {
        let status = AttendanceStatus::parse(&raw_status).ok_or_else(|| {
            ServiceError::Internal(format!("unknown stored status {:?}", raw_status))
        })?;
        let message = notify::message_for(attendance_type, status, is_late);
        if notify::dispatch(&tx, &academy.id, &student_id, message)?.is_some() {
            sent += 1;
        }
    }
    tx.commit()?;
    info!(
        academy_id = %academy.external_id,
        class_name,
        class_section,
        attendance_type = attendance_type.as_str(),
        sent,
        "attendance notifications sent"
    );

    Ok(json!({ "message": "Notifications sent", "sent": sent }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.operation.as_str() {
        "markAttendance" => Some(respond(req, "POST", STATUS_OK, || {
            mark_attendance(state, req)
        })),
        "sendAttendanceNotifications" => Some(respond(req, "POST", STATUS_OK, || {
            send_attendance_notifications(state, req)
        })),
        _ => None,
    }
}
