use super::{respond, STATUS_OK};
use crate::api::types::{AppState, Reply, Request};
use serde_json::json;

fn handle_health(req: &Request) -> Reply {
    respond(req, "GET", STATUS_OK, || {
        Ok(json!({ "version": env!("CARGO_PKG_VERSION") }))
    })
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.operation.as_str() {
        "health" => Some(handle_health(req)),
        _ => None,
    }
}
