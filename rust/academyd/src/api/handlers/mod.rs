pub mod academies;
pub mod attendance;
pub mod classes;
pub mod core;
pub mod homework;
pub mod parents;
pub mod reports;
pub mod students;
pub mod users;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::error::{err, ok};
use super::types::{AppState, Reply, Request};
use crate::error::{ServiceError, ServiceResult};
use crate::identity::{resolve_caller, Capability, Caller};

pub(crate) const STATUS_OK: u16 = 200;
pub(crate) const STATUS_CREATED: u16 = 201;

/// Checks the method, runs the operation, and wraps the outcome in an envelope.
pub(crate) fn respond<F>(req: &Request, method: &str, status: u16, run: F) -> Reply
where
    F: FnOnce() -> ServiceResult<Value>,
{
    if !req.method.eq_ignore_ascii_case(method) {
        return err(&ServiceError::MethodNotAllowed(format!(
            "Only {} allowed",
            method
        )));
    }
    match run() {
        Ok(payload) => ok(status, payload),
        Err(e) => {
            if e.status() >= 500 {
                warn!(operation = %req.operation, code = e.code(), error = %e, "operation failed");
            }
            err(&e)
        }
    }
}

pub(crate) fn parse_body<T: DeserializeOwned>(req: &Request) -> ServiceResult<T> {
    let body = if req.body.is_null() {
        Value::Object(Default::default())
    } else {
        req.body.clone()
    };
    Ok(serde_json::from_value(body)?)
}

/// Resolves the bearer credential and checks it grants `capability`.
pub(crate) fn authorize(
    state: &AppState,
    req: &Request,
    capability: Capability,
    denied: &str,
) -> ServiceResult<Caller> {
    let caller = resolve_caller(state.identity.as_ref(), req.authorization.as_deref())?;
    caller.require(capability, denied)?;
    Ok(caller)
}
