use super::{authorize, parse_body, respond, STATUS_CREATED};
use crate::api::types::{AppState, Reply, Request};
use crate::db::now_rfc3339;
use crate::error::{ServiceError, ServiceResult};
use crate::identity::{caller_academy, Capability};
use crate::validate::present;
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct AssignHomeworkBody {
    class_section_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    due_date: Option<String>,
}

fn assign_homework(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::AssignHomework,
        "You don't have permission to assign homework",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let body: AssignHomeworkBody = parse_body(req)?;
    let (Some(class_section_id), Some(title)) =
        (present(&body.class_section_id), present(&body.title))
    else {
        return Err(ServiceError::invalid(
            "Missing required fields: class_section_id, title",
        ));
    };
    let due_date = match present(&body.due_date) {
        Some(d) => Some(
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|_| ServiceError::invalid("due_date must be YYYY-MM-DD"))?,
        ),
        None => None,
    };

    let section: Option<i64> = state
        .db
        .query_row(
            "SELECT 1 FROM class_sections WHERE id = ? AND academy_id = ?",
            [class_section_id, academy.id.as_str()],
            |r| r.get(0),
        )
        .optional()?;
    if section.is_none() {
        return Err(ServiceError::not_found("Class section not found"));
    }

    let id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    let due = due_date.map(|d| d.format("%Y-%m-%d").to_string());
    let description = present(&body.description);
    state.db.execute(
        "INSERT INTO assignments(id, academy_id, class_section_id, teacher_id, title, description, due_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            academy.id,
            class_section_id,
            caller.user_id,
            title,
            description,
            due,
            created_at,
        ],
    )?;
    info!(academy_id = %academy.external_id, class_section_id, "homework assigned");

    Ok(json!({
        "message": "Assignment created",
        "assignment": {
            "id": id,
            "academy_id": academy.external_id,
            "class_section_id": class_section_id,
            "teacher_id": caller.user_id,
            "title": title,
            "description": description,
            "due_date": due,
            "created_at": created_at,
        },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.operation.as_str() {
        "assignHomework" => Some(respond(req, "POST", STATUS_CREATED, || {
            assign_homework(state, req)
        })),
        _ => None,
    }
}
