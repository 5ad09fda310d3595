use super::{authorize, parse_body, respond, STATUS_CREATED, STATUS_OK};
use crate::api::types::{AppState, Reply, Request};
use crate::db::now_rfc3339;
use crate::error::{is_unique_violation, ServiceError, ServiceResult};
use crate::identity::{caller_academy, AcademyRef, Capability};
use crate::validate::present;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct CreateClassBody {
    class_name: Option<String>,
    section: Option<String>,
    academic_year: Option<String>,
}

fn class_json(academy: &AcademyRef, r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let section: String = r.get(2)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "academy_id": academy.external_id,
        "class_name": r.get::<_, String>(1)?,
        "section": if section.is_empty() { None } else { Some(section) },
        "academic_year": r.get::<_, String>(3)?,
        "created_at": r.get::<_, String>(4)?,
    }))
}

fn load_class(conn: &Connection, academy: &AcademyRef, id: &str) -> ServiceResult<Value> {
    Ok(conn.query_row(
        "SELECT id, class_name, section, academic_year, created_at
         FROM class_sections WHERE id = ?",
        [id],
        |r| class_json(academy, r),
    )?)
}

fn create_class(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::ManageClasses,
        "You don't have permission to create classes",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let body: CreateClassBody = parse_body(req)?;
    let (Some(class_name), Some(academic_year)) =
        (present(&body.class_name), present(&body.academic_year))
    else {
        return Err(ServiceError::invalid(
            "Missing required fields: class_name, academic_year",
        ));
    };
    let section = present(&body.section).unwrap_or("");

    let id = Uuid::new_v4().to_string();
    let inserted = state.db.execute(
        "INSERT INTO class_sections(id, academy_id, class_name, section, academic_year, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &academy.id, class_name, section, academic_year, now_rfc3339()),
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(ServiceError::conflict(
                "This class section already exists for the given academic year",
            ));
        }
        Err(e) => return Err(e.into()),
    }
    info!(academy_id = %academy.external_id, class_name, section, "class created");

    Ok(json!({
        "message": "Class created successfully",
        "class": load_class(&state.db, &academy, &id)?,
    }))
}

fn fetch_classes(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::ViewClasses,
        "You don't have permission to view classes",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let mut stmt = state.db.prepare(
        "SELECT id, class_name, section, academic_year, created_at
         FROM class_sections
         WHERE academy_id = ?
         ORDER BY class_name, section",
    )?;
    let classes = stmt
        .query_map([&academy.id], |r| class_json(&academy, r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": classes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.operation.as_str() {
        "createClass" => Some(respond(req, "POST", STATUS_CREATED, || {
            create_class(state, req)
        })),
        "fetchClasses" => Some(respond(req, "GET", STATUS_OK, || fetch_classes(state, req))),
        _ => None,
    }
}
