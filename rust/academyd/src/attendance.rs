//! Per-student, per-day attendance state.
//!
//! Each (student, date) pair moves through `Unmarked -> Arrived -> Departed`.
//! The state lives in `attendance_days` and is advanced with a compare-and-set
//! so two writers that read the same prior state cannot both advance it; the
//! loser gets `Conflict`. `student_attendance` rows carry the position (1 for
//! arrival, 2 for departure) and are unique per (student, date, position), so
//! the record count always equals the state's ordinal.

use crate::db::now_rfc3339;
use crate::error::{ServiceError, ServiceResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

pub const ALREADY_MARKED: &str = "Attendance already marked twice for today";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn parse(raw: &str) -> Option<AttendanceStatus> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRESENT" => Some(AttendanceStatus::Present),
            "ABSENT" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttendanceType {
    Arrival,
    Departure,
}

impl AttendanceType {
    pub fn parse(raw: &str) -> Option<AttendanceType> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ARRIVAL" => Some(AttendanceType::Arrival),
            "DEPARTURE" => Some(AttendanceType::Departure),
            _ => None,
        }
    }

    pub fn position(self) -> i64 {
        match self {
            AttendanceType::Arrival => 1,
            AttendanceType::Departure => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceType::Arrival => "ARRIVAL",
            AttendanceType::Departure => "DEPARTURE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    Unmarked,
    Arrived,
    Departed,
}

impl DayState {
    pub fn as_str(self) -> &'static str {
        match self {
            DayState::Unmarked => "UNMARKED",
            DayState::Arrived => "ARRIVED",
            DayState::Departed => "DEPARTED",
        }
    }

    fn parse(raw: &str) -> Option<DayState> {
        match raw {
            "UNMARKED" => Some(DayState::Unmarked),
            "ARRIVED" => Some(DayState::Arrived),
            "DEPARTED" => Some(DayState::Departed),
            _ => None,
        }
    }

    /// The transition consumed by the next event; `None` once terminal.
    pub fn next(self) -> Option<(DayState, AttendanceType)> {
        match self {
            DayState::Unmarked => Some((DayState::Arrived, AttendanceType::Arrival)),
            DayState::Arrived => Some((DayState::Departed, AttendanceType::Departure)),
            DayState::Departed => None,
        }
    }
}

/// One submitted status for one student. `student_id` and `academy_id` are
/// internal ids.
#[derive(Debug, Clone)]
pub struct AttendanceEvent<'a> {
    pub academy_id: &'a str,
    pub class_name: &'a str,
    pub class_section: &'a str,
    pub student_id: &'a str,
    pub status: AttendanceStatus,
    pub is_late: bool,
    pub date: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub record_id: String,
    pub position: i64,
    pub attendance_type: AttendanceType,
}

/// Current UTC calendar date as `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

pub fn day_state(conn: &Connection, student_id: &str, date: &str) -> ServiceResult<DayState> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT state FROM attendance_days WHERE student_id = ? AND attendance_date = ?",
            [student_id, date],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(DayState::Unmarked),
        Some(s) => DayState::parse(&s).ok_or_else(|| {
            ServiceError::Internal(format!("unknown attendance state {:?}", s))
        }),
    }
}

fn advance(
    conn: &Connection,
    student_id: &str,
    date: &str,
    from: DayState,
    to: DayState,
) -> ServiceResult<()> {
    let changed = if from == DayState::Unmarked {
        conn.execute(
            "INSERT INTO attendance_days(student_id, attendance_date, state, updated_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, attendance_date) DO NOTHING",
            (student_id, date, to.as_str(), now_rfc3339()),
        )?
    } else {
        conn.execute(
            "UPDATE attendance_days SET state = ?, updated_at = ?
             WHERE student_id = ? AND attendance_date = ? AND state = ?",
            (to.as_str(), now_rfc3339(), student_id, date, from.as_str()),
        )?
    };
    if changed == 0 {
        return Err(ServiceError::conflict(
            "Attendance for this student changed concurrently; retry",
        ));
    }
    Ok(())
}

/// Records the next event of the day for one student. Fails with `Conflict`
/// and writes nothing once two events exist.
pub fn record_event(conn: &Connection, event: &AttendanceEvent<'_>) -> ServiceResult<RecordedEvent> {
    let state = day_state(conn, event.student_id, event.date)?;
    let Some((next, attendance_type)) = state.next() else {
        return Err(ServiceError::conflict(ALREADY_MARKED));
    };
    advance(conn, event.student_id, event.date, state, next)?;

    let record_id = Uuid::new_v4().to_string();
    let position = attendance_type.position();
    let inserted = conn.execute(
        "INSERT INTO student_attendance(
            id, academy_id, class_name, class_section, student_id, status,
            attendance_date, position, is_late, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            record_id,
            event.academy_id,
            event.class_name,
            event.class_section,
            event.student_id,
            event.status.as_str(),
            event.date,
            position,
            i64::from(event.is_late),
            now_rfc3339(),
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if crate::error::is_unique_violation(&e) => {
            return Err(ServiceError::conflict(ALREADY_MARKED));
        }
        Err(e) => return Err(e.into()),
    }

    info!(
        student_id = event.student_id,
        date = event.date,
        position,
        status = event.status.as_str(),
        "attendance recorded"
    );
    Ok(RecordedEvent {
        record_id,
        position,
        attendance_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_count(conn: &Connection, student_id: &str, date: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM student_attendance WHERE student_id = ? AND attendance_date = ?",
            [student_id, date],
            |r| r.get(0),
        )
        .expect("count")
    }

    fn store() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().expect("temp dir");
        let conn = crate::db::open_db(dir.path()).expect("open db");
        conn.execute(
            "INSERT INTO academies(id, academy_id, academy_name, owner_user_id, created_at)
             VALUES('a1', 'ACAD-2025-001', 'Oak', 'owner', '')",
            [],
        )
        .expect("academy");
        conn.execute(
            "INSERT INTO students(id, academy_id, student_id, registration_no, first_name, date_of_birth, class_name, academic_year, created_at)
             VALUES('s1', 'a1', 'STU-2025-1000', 'R1', 'Ann', '2015-01-01', '5', '2025', '')",
            [],
        )
        .expect("student");
        (dir, conn)
    }

    fn event(status: AttendanceStatus) -> AttendanceEvent<'static> {
        AttendanceEvent {
            academy_id: "a1",
            class_name: "5",
            class_section: "A",
            student_id: "s1",
            status,
            is_late: false,
            date: "2025-06-02",
        }
    }

    #[test]
    fn transitions_end_at_departed() {
        assert_eq!(
            DayState::Unmarked.next(),
            Some((DayState::Arrived, AttendanceType::Arrival))
        );
        assert_eq!(
            DayState::Arrived.next(),
            Some((DayState::Departed, AttendanceType::Departure))
        );
        assert_eq!(DayState::Departed.next(), None);
    }

    #[test]
    fn status_parsing_ignores_case() {
        assert_eq!(AttendanceStatus::parse("present"), Some(AttendanceStatus::Present));
        assert_eq!(AttendanceStatus::parse(" ABSENT "), Some(AttendanceStatus::Absent));
        assert_eq!(AttendanceStatus::parse("LATE"), None);
    }

    #[test]
    fn two_events_then_already_marked() {
        let (_dir, conn) = store();
        let first = record_event(&conn, &event(AttendanceStatus::Present)).unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(first.attendance_type, AttendanceType::Arrival);

        let second = record_event(&conn, &event(AttendanceStatus::Absent)).unwrap();
        assert_eq!(second.position, 2);
        assert_eq!(second.attendance_type, AttendanceType::Departure);

        let third = record_event(&conn, &event(AttendanceStatus::Present));
        match third {
            Err(ServiceError::Conflict(m)) => assert_eq!(m, ALREADY_MARKED),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(record_count(&conn, "s1", "2025-06-02"), 2);
        assert_eq!(day_state(&conn, "s1", "2025-06-02").unwrap(), DayState::Departed);
    }

    #[test]
    fn days_are_independent() {
        let (_dir, conn) = store();
        record_event(&conn, &event(AttendanceStatus::Present)).unwrap();
        let next_day = AttendanceEvent {
            date: "2025-06-03",
            ..event(AttendanceStatus::Present)
        };
        assert_eq!(record_event(&conn, &next_day).unwrap().position, 1);
    }

    #[test]
    fn stale_prior_state_loses_the_race() {
        let (_dir, conn) = store();
        // Both writers observed Unmarked; only the first may advance.
        advance(&conn, "s1", "2025-06-02", DayState::Unmarked, DayState::Arrived).unwrap();
        let lost = advance(&conn, "s1", "2025-06-02", DayState::Unmarked, DayState::Arrived);
        assert!(matches!(lost, Err(ServiceError::Conflict(_))));
    }
}
