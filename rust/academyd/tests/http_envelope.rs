use std::sync::{Arc, Mutex};
use std::time::Duration;

use academyd::api::http::app;
use academyd::api::{handle_request, AppState, Request, StateOptions};
use academyd::config::DEFAULT_MAX_BODY_BYTES;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request as HttpRequest, StatusCode};
use axum::Router;
use base64::Engine;
use serde_json::{json, Value};
use tower::ServiceExt;

fn open_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().expect("temp dir");
    let state = AppState::open(
        dir.path(),
        &StateOptions {
            public_url: "http://localhost:8787".to_string(),
            signing_key: b"test-signing-key".to_vec(),
            session_ttl: Duration::from_secs(3600),
            signed_url_ttl: Duration::from_secs(600),
        },
    )
    .expect("open state");
    (dir, state)
}

fn router(state: AppState) -> Router {
    app(Arc::new(Mutex::new(state)), DEFAULT_MAX_BODY_BYTES)
}

async fn send(app: Router, req: HttpRequest<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let res = app.oneshot(req).await.expect("response");
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
    (status, headers, bytes.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("json body")
}

#[tokio::test]
async fn health_over_http_with_cors() {
    let (_dir, state) = open_state();
    let req = HttpRequest::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://example.test")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(router(state), req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    let body = json_body(&body);
    assert_eq!(body["success"], true);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn bare_options_is_ok() {
    let (_dir, state) = open_state();
    let req = HttpRequest::builder()
        .method(Method::OPTIONS)
        .uri("/markAttendance")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(router(state), req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn error_envelopes_carry_status_and_code() {
    let (_dir, state) = open_state();
    let app = router(state);

    let req = HttpRequest::builder()
        .method(Method::GET)
        .uri("/registerAcademy")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json_body(&body)["error"], "Only POST allowed");

    let req = HttpRequest::builder()
        .uri("/nope")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["success"], false);

    let req = HttpRequest::builder()
        .method(Method::POST)
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], "invalid_input");
}

#[tokio::test]
async fn post_with_bearer_and_query_params() {
    let (_dir, mut state) = open_state();
    handle_request(
        &mut state,
        Request::post(
            "registerAcademy",
            json!({ "academy_name": "Oak", "email": "a@a.com", "phone": "9876543210", "password": "secret1" }),
        ),
    );
    let app = router(state);

    let req = HttpRequest::builder()
        .method(Method::POST)
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "credential": "a@a.com", "password": "secret1" }).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    let token = json_body(&body)["token"].as_str().expect("token").to_string();

    let req = HttpRequest::builder()
        .uri("/search-parents?phone=12")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["count"], 0);

    let req = HttpRequest::builder()
        .uri("/fetchClasses")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signed_report_card_download() {
    let (_dir, mut state) = open_state();
    handle_request(
        &mut state,
        Request::post(
            "registerAcademy",
            json!({ "academy_name": "Oak", "email": "a@a.com", "phone": "9876543210", "password": "secret1" }),
        ),
    );
    let token = handle_request(
        &mut state,
        Request::post("login", json!({ "credential": "a@a.com", "password": "secret1" })),
    )
    .body["token"]
        .as_str()
        .expect("token")
        .to_string();
    let student = handle_request(
        &mut state,
        Request::post(
            "createStudent",
            json!({
                "first_name": "Kid",
                "date_of_birth": "2015-04-01",
                "registration_no": "R1",
                "class_name": "5",
                "academic_year": "2025",
            }),
        )
        .bearer(&token),
    )
    .body["student"]["student_id"]
        .as_str()
        .expect("student_id")
        .to_string();
    let upload = handle_request(
        &mut state,
        Request::post(
            "uploadReportCard",
            json!({
                "student_id": student,
                "file_name": "card.pdf",
                "file_base64": base64::engine::general_purpose::STANDARD.encode(b"%PDF-card"),
            }),
        )
        .bearer(&token),
    );
    assert_eq!(upload.status, 201, "{:?}", upload);
    let url = upload.body["record"]["report_card_url"]
        .as_str()
        .expect("url")
        .to_string();
    let path = url.strip_prefix("http://localhost:8787").expect("public url");
    let app = router(state);

    let req = HttpRequest::builder().uri(path).body(Body::empty()).unwrap();
    let (status, headers, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(body, b"%PDF-card".to_vec());

    let tampered = path.replace("signature=", "signature=00");
    let req = HttpRequest::builder()
        .uri(tampered)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let unsigned = path.split('?').next().unwrap_or(path).to_string();
    let req = HttpRequest::builder()
        .uri(unsigned)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oversized_body_is_a_json_413() {
    let (_dir, state) = open_state();
    let app = app(Arc::new(Mutex::new(state)), 4 * 1024);

    let payload = json!({
        "student_id": "STU-2025-1000",
        "file_name": "big.pdf",
        "file_base64": "A".repeat(16 * 1024),
    })
    .to_string();
    let req = HttpRequest::builder()
        .method(Method::POST)
        .uri("/uploadReportCard")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload))
        .unwrap();
    let (status, headers, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    let body = json_body(&body);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "payload_too_large");

    // Bodies under the limit still reach the operation.
    let req = HttpRequest::builder()
        .method(Method::POST)
        .uri("/uploadReportCard")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "file_name": "a.pdf" }).to_string()))
        .unwrap();
    let (status, _, body) = send(app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["code"], "unauthorized");
}
