use super::{authorize, parse_body, respond, STATUS_CREATED, STATUS_OK};
use crate::api::types::{AppState, Reply, Request};
use crate::db::now_rfc3339;
use crate::error::{is_unique_violation, ServiceError, ServiceResult};
use crate::identity::{caller_academy, AcademyRef, Capability};
use crate::ids;
use crate::relations::{self, ParentInput};
use crate::validate::present;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// Student row as stored. `id` is internal and never leaves the service.
#[derive(Debug, Clone)]
pub(crate) struct StudentRow {
    pub id: String,
    pub student_id: String,
    pub registration_no: String,
    pub aadhar_no: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub date_of_birth: String,
    pub roll_no: Option<String>,
    pub class_name: String,
    pub class_section: Option<String>,
    pub academic_year: String,
    pub is_active: bool,
    pub created_at: String,
}

const STUDENT_COLUMNS: &str = "id, student_id, registration_no, aadhar_no, first_name, last_name,
    date_of_birth, roll_no, class_name, class_section, academic_year, is_active, created_at";

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        registration_no: r.get(2)?,
        aadhar_no: r.get(3)?,
        first_name: r.get(4)?,
        last_name: r.get(5)?,
        date_of_birth: r.get(6)?,
        roll_no: r.get(7)?,
        class_name: r.get(8)?,
        class_section: r.get(9)?,
        academic_year: r.get(10)?,
        is_active: r.get::<_, i64>(11)? != 0,
        created_at: r.get(12)?,
    })
}

impl StudentRow {
    pub fn to_json(&self, academy: &AcademyRef) -> Value {
        json!({
            "student_id": self.student_id,
            "academy_id": academy.external_id,
            "registration_no": self.registration_no,
            "aadhar_no": self.aadhar_no,
            "first_name": self.first_name,
            "last_name": self.last_name,
            "date_of_birth": self.date_of_birth,
            "roll_no": self.roll_no,
            "class_name": self.class_name,
            "class_section": self.class_section,
            "academic_year": self.academic_year,
            "is_active": self.is_active,
            "created_at": self.created_at,
        })
    }
}

/// Student of `academy_id` by external id.
pub(crate) fn find_student(
    conn: &Connection,
    academy_id: &str,
    student_id: &str,
) -> ServiceResult<StudentRow> {
    let sql = format!(
        "SELECT {} FROM students WHERE academy_id = ? AND student_id = ?",
        STUDENT_COLUMNS
    );
    conn.query_row(&sql, [academy_id, student_id], student_row)
        .optional()?
        .ok_or_else(|| ServiceError::not_found(format!("Student not found: {}", student_id)))
}

fn column_taken(conn: &Connection, column: &str, value: &str) -> ServiceResult<bool> {
    let sql = format!("SELECT 1 FROM students WHERE {} = ?", column);
    Ok(conn
        .query_row(&sql, [value], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

#[derive(Debug, Default, Deserialize)]
struct UpdatedParent {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    relationship: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateStudentBody {
    first_name: Option<String>,
    last_name: Option<String>,
    date_of_birth: Option<String>,
    registration_no: Option<String>,
    aadhar_no: Option<String>,
    roll_no: Option<String>,
    class_name: Option<String>,
    class_section: Option<String>,
    academic_year: Option<String>,
    parent_id: Option<String>,
    updated_parent: Option<UpdatedParent>,
    #[serde(default)]
    new_parents: Vec<ParentInput>,
}

fn create_student(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::ManageStudents,
        "You do not have permission to create students",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let body: CreateStudentBody = parse_body(req)?;
    let (
        Some(first_name),
        Some(date_of_birth),
        Some(registration_no),
        Some(class_name),
        Some(academic_year),
    ) = (
        present(&body.first_name),
        present(&body.date_of_birth),
        present(&body.registration_no),
        present(&body.class_name),
        present(&body.academic_year),
    )
    else {
        return Err(ServiceError::invalid("Missing required student fields"));
    };
    if NaiveDate::parse_from_str(date_of_birth, "%Y-%m-%d").is_err() {
        return Err(ServiceError::invalid("date_of_birth must be YYYY-MM-DD"));
    }
    let aadhar_no = present(&body.aadhar_no);
    let parent_id = present(&body.parent_id);

    relations::check_parent_count(parent_id.is_some(), body.new_parents.len())?;

    if column_taken(&state.db, "registration_no", registration_no)? {
        return Err(ServiceError::conflict(
            "Student with this registration number already exists",
        ));
    }
    if let Some(aadhar_no) = aadhar_no {
        if column_taken(&state.db, "aadhar_no", aadhar_no)? {
            return Err(ServiceError::conflict(
                "Student with this Aadhar number already exists",
            ));
        }
    }

    let student_id =
        ids::student_external_id(&state.db, &ids::current_year(), &mut rand::thread_rng())?;

    if let Some(parent_id) = parent_id {
        if !relations::parent_exists(&state.db, parent_id)? {
            return Err(ServiceError::not_found("Parent not found"));
        }
    }
    let new_parent = body.new_parents.first();
    let contact = match new_parent {
        Some(input) => Some(relations::resolve_parent_identity(
            state.identity.as_ref(),
            &academy.external_id,
            input,
        )?),
        None => None,
    };
    let updated = body.updated_parent.unwrap_or_default();

    let internal_id = Uuid::new_v4().to_string();
    let tx = state.db.transaction()?;
    let inserted = tx.execute(
        "INSERT INTO students(
            id, academy_id, student_id, registration_no, aadhar_no, first_name, last_name,
            date_of_birth, roll_no, class_name, class_section, academic_year, is_active, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        rusqlite::params![
            internal_id,
            academy.id,
            student_id,
            registration_no,
            aadhar_no,
            first_name,
            present(&body.last_name),
            date_of_birth,
            present(&body.roll_no),
            class_name,
            present(&body.class_section),
            academic_year,
            now_rfc3339(),
        ],
    );
    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            return Err(ServiceError::conflict(
                "Student with this registration number or Aadhar number already exists",
            ));
        }
        return Err(e.into());
    }

    let final_parent = if let Some(parent_id) = parent_id {
        if let Some(address) = present(&updated.address) {
            relations::update_parent_address(&tx, parent_id, address)?;
        }
        relations::ensure_parent_academy(&tx, parent_id, &academy.id)?;
        Some(parent_id.to_string())
    } else if let (Some(contact), Some(input)) = (contact.as_ref(), new_parent) {
        Some(relations::attach_parent(
            &tx,
            &academy.id,
            contact,
            present(&input.address),
        )?)
    } else {
        None
    };

    if let Some(parent) = final_parent.as_deref() {
        let relationship = present(&updated.relationship)
            .or_else(|| new_parent.and_then(|p| present(&p.relationship)));
        relations::link_student(&tx, parent, &internal_id, relationship)?;
    }

    let student = find_student(&tx, &academy.id, &student_id)?;
    tx.commit()?;
    info!(
        academy_id = %academy.external_id,
        student_id = %student_id,
        parent_id = final_parent.as_deref().unwrap_or(""),
        "student created"
    );

    Ok(json!({
        "message": "Student created successfully",
        "student": student.to_json(&academy),
        "parent_id": final_parent,
    }))
}

fn fetch_teacher_students(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::ViewOwnRoster,
        "Only teachers can fetch students",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let mut sql = format!("SELECT {} FROM students WHERE academy_id = ?", STUDENT_COLUMNS);
    let mut params: Vec<&str> = vec![academy.id.as_str()];
    for column in ["class_name", "class_section", "academic_year"] {
        if let Some(value) = req.query_str(column) {
            sql.push_str(&format!(" AND {} = ?", column));
            params.push(value);
        }
    }
    sql.push_str(" ORDER BY roll_no IS NULL, CAST(roll_no AS INTEGER), roll_no, student_id");

    let mut stmt = state.db.prepare(&sql)?;
    let students = stmt
        .query_map(rusqlite::params_from_iter(params), student_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let students: Vec<Value> = students.iter().map(|s| s.to_json(&academy)).collect();
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.operation.as_str() {
        "createStudent" => Some(respond(req, "POST", STATUS_CREATED, || {
            create_student(state, req)
        })),
        "fetchTeacherStudents" => Some(respond(req, "GET", STATUS_OK, || {
            fetch_teacher_students(state, req)
        })),
        _ => None,
    }
}
