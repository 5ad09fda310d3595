//! Parent notifications derived from attendance events.

use crate::attendance::{AttendanceStatus, AttendanceType};
use crate::db::now_rfc3339;
use crate::error::ServiceResult;
use crate::relations::parent_of_student;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

pub const NOTIFICATION_TYPE_ATTENDANCE: &str = "ATTENDANCE";

pub const MSG_ARRIVED: &str = "Your child has safely reached the academy.";
pub const MSG_ABSENT_ARRIVAL: &str = "Your child is not at school today. Please contact the academy.";
pub const MSG_DEPARTED: &str = "Your child has safely left the academy.";
pub const MSG_ABSENT_DEPARTURE: &str =
    "Your child is not currently at the academy. Please contact immediately.";
pub const MSG_LATE: &str = "Your child reached the academy late today.";

/// Late overrides the slot/status table.
pub fn message_for(
    attendance_type: AttendanceType,
    status: AttendanceStatus,
    is_late: bool,
) -> &'static str {
    if is_late {
        return MSG_LATE;
    }
    match (attendance_type, status) {
        (AttendanceType::Arrival, AttendanceStatus::Present) => MSG_ARRIVED,
        (AttendanceType::Arrival, AttendanceStatus::Absent) => MSG_ABSENT_ARRIVAL,
        (AttendanceType::Departure, AttendanceStatus::Present) => MSG_DEPARTED,
        (AttendanceType::Departure, AttendanceStatus::Absent) => MSG_ABSENT_DEPARTURE,
    }
}

/// Appends one notification for the student's mapped parent. Returns the new
/// notification id, or `None` when the student has no parent.
pub fn dispatch(
    conn: &Connection,
    academy_id: &str,
    student_id: &str,
    message: &str,
) -> ServiceResult<Option<String>> {
    let Some(parent_id) = parent_of_student(conn, student_id)? else {
        debug!(student_id, "no parent mapped, notification skipped");
        return Ok(None);
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notifications(id, academy_id, parent_id, student_id, message, type, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            academy_id,
            &parent_id,
            student_id,
            message,
            NOTIFICATION_TYPE_ATTENDANCE,
            now_rfc3339(),
        ),
    )?;
    info!(student_id, parent_id = %parent_id, "notification written");
    Ok(Some(id))
}
