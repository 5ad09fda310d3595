use super::{authorize, respond, STATUS_OK};
use crate::api::types::{AppState, Reply, Request};
use crate::error::ServiceResult;
use crate::identity::{caller_academy, Capability};
use crate::validate::phone_digits;
use serde_json::{json, Value};

pub const SEARCH_LIMIT: i64 = 10;
pub const SEARCH_MIN_DIGITS: usize = 3;

struct ParentRow {
    id: String,
    auth_user_id: String,
    display_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
}

fn fetch_parents(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(state, req, Capability::ViewParents, "Unauthorized access")?;
    let academy = caller_academy(&state.db, &caller)?;

    let mut stmt = state.db.prepare(
        "SELECT p.id, p.auth_user_id, p.display_name, p.email, p.phone, p.address
         FROM parent_academy_map pam
         JOIN parents p ON p.id = pam.parent_id
         WHERE pam.academy_id = ?
         ORDER BY pam.created_at, p.id",
    )?;
    let rows = stmt
        .query_map([&academy.id], |r| {
            Ok(ParentRow {
                id: r.get(0)?,
                auth_user_id: r.get(1)?,
                display_name: r.get(2)?,
                email: r.get(3)?,
                phone: r.get(4)?,
                address: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut links = state.db.prepare(
        "SELECT s.student_id, m.relationship
         FROM parent_student_map m
         JOIN students s ON s.id = m.student_id
         WHERE m.parent_id = ?",
    )?;

    let mut parents = Vec::with_capacity(rows.len());
    for row in rows {
        // Identity data wins; the row snapshot covers parents the provider no longer knows.
        let auth = state.identity.get_user(&row.auth_user_id)?;
        let (display_name, phone, email) = match auth {
            Some(u) => (
                u.display_name.or(row.display_name),
                u.phone.or(row.phone),
                u.email.or(row.email),
            ),
            None => (row.display_name, row.phone, row.email),
        };
        let students = links
            .query_map([&row.id], |r| {
                Ok(json!({
                    "student_id": r.get::<_, String>(0)?,
                    "relationship": r.get::<_, String>(1)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        parents.push(json!({
            "id": row.id,
            "display_name": display_name.unwrap_or_default(),
            "phone": phone.unwrap_or_default(),
            "email": email.unwrap_or_default(),
            "address": row.address,
            "parent_student_map": students,
        }));
    }
    Ok(json!({ "parents": parents }))
}

fn search_parents(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(state, req, Capability::ViewParents, "Unauthorized access")?;
    let academy = caller_academy(&state.db, &caller)?;

    let digits = phone_digits(req.query_str("phone").unwrap_or(""));
    if digits.len() < SEARCH_MIN_DIGITS {
        return Ok(json!({ "parents": [], "count": 0 }));
    }

    let mut stmt = state.db.prepare(
        "SELECT p.id, p.display_name, p.phone, p.email, p.address,
                (SELECT relationship FROM parent_student_map m WHERE m.parent_id = p.id LIMIT 1)
         FROM parents p
         JOIN parent_academy_map pam ON pam.parent_id = p.id
         WHERE pam.academy_id = ? AND p.phone_digits LIKE '%' || ? || '%'
         ORDER BY p.display_name, p.id
         LIMIT ?",
    )?;
    let parents = stmt
        .query_map(rusqlite::params![academy.id, digits, SEARCH_LIMIT], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "display_name": r.get::<_, Option<String>>(1)?,
                "phone": r.get::<_, Option<String>>(2)?,
                "email": r.get::<_, Option<String>>(3)?,
                "address": r.get::<_, Option<String>>(4)?,
                "relationship": r.get::<_, Option<String>>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let count = parents.len();
    Ok(json!({ "parents": parents, "count": count }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.operation.as_str() {
        "fetchParents" => Some(respond(req, "GET", STATUS_OK, || fetch_parents(state, req))),
        "search-parents" => Some(respond(req, "GET", STATUS_OK, || search_parents(state, req))),
        _ => None,
    }
}
