use academyd::api::{handle_request, AppState, Request, StateOptions};
use serde_json::{json, Value};
use std::time::Duration;

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

fn request_ok(state: &mut AppState, req: Request) -> Value {
    let op = req.operation.clone();
    let reply = handle_request(state, req);
    assert!(reply.status < 300, "{} failed: {:?}", op, reply);
    reply.body
}

fn academy_owner(state: &mut AppState, email: &str) -> String {
    request_ok(
        state,
        Request::post(
            "registerAcademy",
            json!({ "academy_name": "Oak", "email": email, "phone": "9876543210", "password": "secret1" }),
        ),
    );
    request_ok(
        state,
        Request::post("login", json!({ "credential": email, "password": "secret1" })),
    )["token"]
        .as_str()
        .expect("token")
        .to_string()
}

fn student_with_parent(state: &mut AppState, token: &str, reg: &str, parent: Value) {
    request_ok(
        state,
        Request::post(
            "createStudent",
            json!({
                "first_name": "Kid",
                "date_of_birth": "2015-04-01",
                "registration_no": reg,
                "class_name": "5",
                "academic_year": "2025",
                "new_parents": [parent],
            }),
        )
        .bearer(token),
    );
}

#[test]
fn fetch_parents_lists_identity_data_and_students() {
    let (_dir, mut state) = open_state();
    let token = academy_owner(&mut state, "a@a.com");
    student_with_parent(
        &mut state,
        &token,
        "R1",
        json!({ "display_name": "Pat", "email": "pat@p.com", "phone": "9988776655", "relationship": "Father" }),
    );

    let reply = request_ok(&mut state, Request::get("fetchParents").bearer(&token));
    let parents = reply["parents"].as_array().expect("parents");
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0]["display_name"], "Pat");
    assert_eq!(parents[0]["email"], "pat@p.com");
    assert_eq!(parents[0]["phone"], "9988776655");
    let links = parents[0]["parent_student_map"].as_array().expect("links");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0]["relationship"], "Father");
    assert!(links[0]["student_id"].as_str().unwrap_or("").starts_with("STU-"));
}

#[test]
fn search_matches_digit_substrings_within_the_academy() {
    let (_dir, mut state) = open_state();
    let token = academy_owner(&mut state, "a@a.com");
    student_with_parent(&mut state, &token, "R1", json!({ "display_name": "Pat", "phone": "+91 99887 76655" }));
    student_with_parent(&mut state, &token, "R2", json!({ "display_name": "Sam", "phone": "9123400000" }));

    let other = academy_owner(&mut state, "b@b.com");
    student_with_parent(&mut state, &other, "R3", json!({ "display_name": "Eve", "phone": "9988770000" }));

    let hit = request_ok(
        &mut state,
        Request::get("search-parents").bearer(&token).param("phone", "887-7"),
    );
    assert_eq!(hit["count"], 1);
    assert_eq!(hit["parents"][0]["display_name"], "Pat");
    assert_eq!(hit["parents"][0]["relationship"], "Guardian");

    let short = request_ok(
        &mut state,
        Request::get("search-parents").bearer(&token).param("phone", "98"),
    );
    assert_eq!(short["count"], 0);
    assert_eq!(short["parents"], json!([]));

    let missing = request_ok(&mut state, Request::get("search-parents").bearer(&token));
    assert_eq!(missing["count"], 0);
}

#[test]
fn parent_views_require_staff() {
    let (_dir, mut state) = open_state();
    let reply = handle_request(&mut state, Request::get("fetchParents"));
    assert_eq!(reply.status, 401);
    let reply = handle_request(&mut state, Request::post("fetchParents", json!({})));
    assert_eq!(reply.status, 405);
}
