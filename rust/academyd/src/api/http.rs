//! HTTP transport: every `/<operation>` path goes through [`handle_request`];
//! `/storage/{bucket}/{*path}` serves signed object downloads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::err;
use super::router::handle_request;
use super::types::{AppState, Reply, Request};
use crate::error::{ServiceError, ServiceResult};
use crate::storage::StoredObject;

pub type SharedState = Arc<Mutex<AppState>>;

/// `body_limit` caps request bodies in bytes; larger ones get a 413 envelope.
pub fn app(state: SharedState, body_limit: usize) -> Router {
    Router::new()
        .route("/storage/{bucket}/{*path}", get(fetch_object))
        .fallback(dispatch)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body)).into_response()
    }
}

/// Runs `work` against the locked state on the blocking pool.
async fn with_state<T, F>(state: SharedState, work: F) -> ServiceResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut AppState) -> ServiceResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = state
            .lock()
            .map_err(|_| ServiceError::Internal("state lock poisoned".to_string()))?;
        work(&mut *guard)
    })
    .await
    .map_err(|e| ServiceError::Internal(format!("request task failed: {}", e)))?
}

fn body_rejection(rejection: BytesRejection) -> ServiceError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge("Request body too large".to_string())
    } else {
        ServiceError::invalid(rejection.body_text())
    }
}

fn parse_json_body(body: &Bytes) -> ServiceResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}

async fn dispatch(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    let body = match body.map_err(body_rejection).and_then(|b| parse_json_body(&b)) {
        Ok(v) => v,
        Err(e) => return err(&e).into_response(),
    };
    let req = Request {
        method: method.as_str().to_string(),
        operation: uri.path().trim_matches('/').to_string(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        query,
        body,
    };
    match with_state(state, move |s| Ok(handle_request(s, req))).await {
        Ok(reply) => reply.into_response(),
        Err(e) => err(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SignedQuery {
    expires: Option<i64>,
    signature: Option<String>,
}

async fn fetch_object(
    State(state): State<SharedState>,
    Path((bucket, path)): Path<(String, String)>,
    Query(signed): Query<SignedQuery>,
) -> Response {
    let (Some(expires), Some(signature)) = (signed.expires, signed.signature) else {
        return err(&ServiceError::Forbidden("missing signature".to_string())).into_response();
    };
    let fetched = with_state(state, move |s| {
        s.storage.verify(&bucket, &path, expires, &signature)?;
        s.storage
            .get(&bucket, &path)?
            .ok_or_else(|| ServiceError::not_found("Object not found"))
    })
    .await;
    match fetched {
        Ok(StoredObject {
            bytes,
            content_type,
        }) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(e) => err(&e).into_response(),
    }
}
