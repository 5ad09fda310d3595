use serde_json::{json, Value};

use super::types::Reply;
use crate::error::ServiceError;

/// `{success: true, ...payload}`. Non-object payloads land under `data`.
pub fn ok(status: u16, payload: Value) -> Reply {
    let body = match payload {
        Value::Object(mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        Value::Null => json!({ "success": true }),
        other => json!({ "success": true, "data": other }),
    };
    Reply { status, body }
}

pub fn err(e: &ServiceError) -> Reply {
    Reply {
        status: e.status(),
        body: json!({
            "success": false,
            "error": e.to_string(),
            "code": e.code(),
        }),
    }
}
