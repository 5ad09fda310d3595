use super::{parse_body, respond, STATUS_CREATED, STATUS_OK};
use crate::api::types::{AppState, Reply, Request};
use crate::db::now_rfc3339;
use crate::error::{ServiceError, ServiceResult};
use crate::identity::{IdentityRecord, NewIdentity, Role};
use crate::ids;
use crate::validate::{is_valid_email, is_valid_phone, present, MIN_PASSWORD_LEN};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct RegisterAcademyBody {
    academy_name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    pincode: Option<String>,
    website: Option<String>,
    logo_url: Option<String>,
}

fn register_academy(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let body: RegisterAcademyBody = parse_body(req)?;
    let (Some(academy_name), Some(email), Some(password)) = (
        present(&body.academy_name),
        present(&body.email),
        body.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ServiceError::invalid(
            "Missing required fields: academy_name, email, password",
        ));
    };
    let phone = present(&body.phone).unwrap_or("");
    if !is_valid_phone(phone) {
        return Err(ServiceError::invalid("Invalid phone number format"));
    }
    if !is_valid_email(email) {
        return Err(ServiceError::invalid("Invalid email format"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    // Academy row first; the transaction drops it if the owner identity fails.
    let academy_id = ids::academy_external_id();
    let internal_id = Uuid::new_v4().to_string();
    let tx = state.db.transaction()?;
    tx.execute(
        "INSERT INTO academies(
            id, academy_id, academy_name, address, city, state, country,
            pincode, website, logo_url, is_active, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        rusqlite::params![
            internal_id,
            academy_id,
            academy_name,
            body.address,
            body.city,
            body.state,
            body.country,
            body.pincode,
            body.website,
            body.logo_url,
            now_rfc3339(),
        ],
    )?;
    let owner = state.identity.create_user(&NewIdentity {
        email: Some(email.to_string()),
        phone: Some(phone.to_string()),
        password: Some(password.to_string()),
        role: Some(Role::Academy),
        academy_ref: Some(academy_id.clone()),
        display_name: Some(academy_name.to_string()),
    })?;
    tx.execute(
        "UPDATE academies SET owner_user_id = ? WHERE id = ?",
        (&owner.id, &internal_id),
    )?;
    tx.commit()?;
    info!(academy_id = %academy_id, owner = %owner.id, "academy registered");

    Ok(json!({
        "message": "Academy registered successfully",
        "academy_id": academy_id,
        "email": email,
        "role": Role::Academy.as_str(),
    }))
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    credential: Option<String>,
    password: Option<String>,
}

/// Email credentials match by email only. Phone credentials prefer a staff or
/// parent account over an academy account sharing the same number.
fn find_login_user(state: &AppState, credential: &str) -> ServiceResult<Option<IdentityRecord>> {
    if credential.contains('@') {
        return state.identity.find_by_email(credential);
    }
    let mut matches = state.identity.find_by_phone(credential)?;
    if let Some(pos) = matches.iter().position(|u| u.role != Role::Academy) {
        return Ok(Some(matches.swap_remove(pos)));
    }
    Ok(matches.into_iter().next())
}

fn login(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let body: LoginBody = parse_body(req)?;
    let (Some(credential), Some(password)) = (
        present(&body.credential),
        body.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ServiceError::invalid("Missing credential or password"));
    };

    let Some(user) = find_login_user(state, credential)? else {
        return Err(ServiceError::not_found("User not found"));
    };
    let session = state.identity.sign_in(&user.id, password)?;
    info!(user_id = %user.id, role = user.role.as_str(), "login");

    Ok(json!({
        "user": {
            "id": session.user.id,
            "role": session.user.role.as_str(),
            "display_name": session.user.display_name,
            "email": session.user.email,
            "phone": session.user.phone,
            "academy_id": session.user.academy_ref,
        },
        "token": session.access_token,
        "expires_at": session.expires_at,
        "role": session.user.role.as_str(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.operation.as_str() {
        "registerAcademy" => Some(respond(req, "POST", STATUS_CREATED, || {
            register_academy(state, req)
        })),
        "login" => Some(respond(req, "POST", STATUS_OK, || login(state, req))),
        _ => None,
    }
}
