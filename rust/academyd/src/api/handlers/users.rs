use super::{authorize, parse_body, respond, STATUS_CREATED};
use crate::api::types::{AppState, Reply, Request};
use crate::db::now_rfc3339;
use crate::error::{ServiceError, ServiceResult};
use crate::identity::{caller_academy, Capability, NewIdentity, Role};
use crate::ids::{self, IdColumn, TEACHER_PREFIX};
use crate::validate::{is_valid_email, is_valid_phone, present, MIN_PASSWORD_LEN};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize)]
struct CreateUserBody {
    role: Option<String>,
    display_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    password: Option<String>,
}

fn create_user(state: &mut AppState, req: &Request) -> ServiceResult<Value> {
    let caller = authorize(
        state,
        req,
        Capability::CreateStaff,
        "You don't have permission to create users",
    )?;
    let academy = caller_academy(&state.db, &caller)?;

    let body: CreateUserBody = parse_body(req)?;
    let email = present(&body.email);
    let phone = present(&body.phone);
    let (Some(raw_role), Some(password)) = (
        present(&body.role),
        body.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ServiceError::invalid(
            "role, password and email or phone are required",
        ));
    };
    if email.is_none() && phone.is_none() {
        return Err(ServiceError::invalid(
            "role, password and email or phone are required",
        ));
    }

    let role = match Role::parse(raw_role) {
        Some(r @ (Role::Admin | Role::Teacher)) => r,
        _ => return Err(ServiceError::invalid("Only Admin or Teacher can be created")),
    };
    if caller.role == Role::Admin && role != Role::Teacher {
        return Err(ServiceError::Forbidden("Admin can only create Teacher".to_string()));
    }
    if let Some(email) = email {
        if !is_valid_email(email) {
            return Err(ServiceError::invalid("Invalid email format"));
        }
    }
    if let Some(phone) = phone {
        if !is_valid_phone(phone) {
            return Err(ServiceError::invalid("Invalid phone number format"));
        }
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let display_name = present(&body.display_name)
        .or(email)
        .or(phone)
        .map(str::to_string);
    let user = state.identity.create_user(&NewIdentity {
        email: email.map(str::to_string),
        phone: phone.map(str::to_string),
        password: Some(password.to_string()),
        role: Some(role),
        academy_ref: Some(academy.external_id.clone()),
        display_name: display_name.clone(),
    })?;

    let mut teacher_code = None;
    if role == Role::Teacher {
        let tx = state.db.transaction()?;
        let code = ids::insert_with_sequential_id(
            &tx,
            TEACHER_PREFIX,
            &ids::current_year(),
            IdColumn::TeacherCode,
            |code| {
                tx.execute(
                    "INSERT INTO teachers(id, teacher_code, created_at) VALUES(?, ?, ?)",
                    (&user.id, code, now_rfc3339()),
                )
                .map(|_| ())
            },
        )?;
        tx.execute(
            "INSERT INTO teacher_academy_map(teacher_id, academy_id) VALUES(?, ?)",
            (&user.id, &academy.id),
        )?;
        tx.commit()?;
        teacher_code = Some(code);
    }
    info!(
        user_id = %user.id,
        role = role.as_str(),
        academy_id = %academy.external_id,
        "staff user created"
    );

    Ok(json!({
        "message": format!("{} created successfully", role.as_str()),
        "user": {
            "id": user.id,
            "email": user.email,
            "phone": user.phone,
            "role": role.as_str(),
            "display_name": display_name,
            "teacher_code": teacher_code,
        },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.operation.as_str() {
        "createUser" => Some(respond(req, "POST", STATUS_CREATED, || {
            create_user(state, req)
        })),
        _ => None,
    }
}
