use academyd::api::{handle_request, AppState, Request, StateOptions};
use academyd::ids::current_year;
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

fn request_err(state: &mut AppState, req: Request, status: u16) -> Value {
    let op = req.operation.clone();
    let reply = handle_request(state, req);
    assert_eq!(reply.status, status, "{} unexpected reply: {:?}", op, reply);
    reply.body
}

fn login(state: &mut AppState, credential: &str, password: &str) -> String {
    request_ok(
        state,
        Request::post("login", json!({ "credential": credential, "password": password })),
    )["token"]
        .as_str()
        .expect("token")
        .to_string()
}

fn academy_owner(state: &mut AppState, email: &str) -> String {
    request_ok(
        state,
        Request::post(
            "registerAcademy",
            json!({ "academy_name": "Oak", "email": email, "phone": "9876543210", "password": "secret1" }),
        ),
    );
    login(state, email, "secret1")
}

fn create_user(token: &str, role: &str, email: &str) -> Request {
    Request::post(
        "createUser",
        json!({ "role": role, "email": email, "password": "staff1" }),
    )
    .bearer(token)
}

#[test]
fn teacher_codes_are_sequential_per_year() {
    let (_dir, mut state) = open_state();
    let owner = academy_owner(&mut state, "a@a.com");
    let year = current_year();

    let first = request_ok(&mut state, create_user(&owner, "teacher", "t1@a.com"));
    assert_eq!(first["message"], "teacher created successfully");
    assert_eq!(first["user"]["teacher_code"], format!("TCH-{}-001", year));

    let second = request_ok(&mut state, create_user(&owner, "Teacher", "t2@a.com"));
    assert_eq!(second["user"]["teacher_code"], format!("TCH-{}-002", year));

    let admin = request_ok(&mut state, create_user(&owner, "admin", "ad@a.com"));
    assert_eq!(admin["user"]["teacher_code"], Value::Null);
    assert_eq!(
        academyd::db::table_count(&state.db, "teacher_academy_map").unwrap(),
        2
    );
}

#[test]
fn staff_creation_rules() {
    let (_dir, mut state) = open_state();
    let owner = academy_owner(&mut state, "a@a.com");

    let parent = request_err(&mut state, create_user(&owner, "parent", "p@a.com"), 400);
    assert_eq!(parent["error"], "Only Admin or Teacher can be created");

    request_ok(&mut state, create_user(&owner, "admin", "ad@a.com"));
    let admin = login(&mut state, "ad@a.com", "staff1");
    let denied = request_err(&mut state, create_user(&admin, "admin", "ad2@a.com"), 403);
    assert_eq!(denied["error"], "Admin can only create Teacher");
    request_ok(&mut state, create_user(&admin, "teacher", "t@a.com"));

    let teacher = login(&mut state, "t@a.com", "staff1");
    request_err(&mut state, create_user(&teacher, "teacher", "t2@a.com"), 403);

    request_err(&mut state, create_user(&owner, "teacher", "t@a.com"), 409);
}

#[test]
fn classes_are_unique_per_year_and_listed_in_order() {
    let (_dir, mut state) = open_state();
    let owner = academy_owner(&mut state, "a@a.com");

    for (name, section) in [("6", "B"), ("5", ""), ("6", "A")] {
        let reply = handle_request(
            &mut state,
            Request::post(
                "createClass",
                json!({ "class_name": name, "section": section, "academic_year": "2025" }),
            )
            .bearer(&owner),
        );
        assert_eq!(reply.status, 201, "{:?}", reply);
    }

    let dup = request_err(
        &mut state,
        Request::post(
            "createClass",
            json!({ "class_name": "6", "section": "A", "academic_year": "2025" }),
        )
        .bearer(&owner),
        409,
    );
    assert_eq!(
        dup["error"],
        "This class section already exists for the given academic year"
    );
    request_ok(
        &mut state,
        Request::post(
            "createClass",
            json!({ "class_name": "6", "section": "A", "academic_year": "2026" }),
        )
        .bearer(&owner),
    );

    let listed = request_ok(&mut state, Request::get("fetchClasses").bearer(&owner));
    let keys: Vec<(String, Value)> = listed["classes"]
        .as_array()
        .expect("classes")
        .iter()
        .map(|c| (c["class_name"].as_str().unwrap_or("").to_string(), c["section"].clone()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("5".to_string(), Value::Null),
            ("6".to_string(), json!("A")),
            ("6".to_string(), json!("A")),
            ("6".to_string(), json!("B")),
        ]
    );

    let other = academy_owner(&mut state, "b@b.com");
    let theirs = request_ok(&mut state, Request::get("fetchClasses").bearer(&other));
    assert_eq!(theirs["classes"], json!([]));
}

#[test]
fn homework_is_assigned_by_teachers_to_own_academy_sections() {
    let (_dir, mut state) = open_state();
    let owner = academy_owner(&mut state, "a@a.com");
    let section_id = request_ok(
        &mut state,
        Request::post(
            "createClass",
            json!({ "class_name": "5", "section": "A", "academic_year": "2025" }),
        )
        .bearer(&owner),
    )["class"]["id"]
        .as_str()
        .expect("class id")
        .to_string();

    let teacher_id = request_ok(&mut state, create_user(&owner, "teacher", "t@a.com"))["user"]
        ["id"]
        .as_str()
        .expect("teacher id")
        .to_string();
    let teacher = login(&mut state, "t@a.com", "staff1");

    let reply = handle_request(
        &mut state,
        Request::post(
            "assignHomework",
            json!({
                "class_section_id": section_id,
                "title": "Fractions",
                "description": "Worksheet 3",
                "due_date": "2025-11-03",
            }),
        )
        .bearer(&teacher),
    );
    assert_eq!(reply.status, 201, "{:?}", reply);
    assert_eq!(reply.body["message"], "Assignment created");
    assert_eq!(reply.body["assignment"]["teacher_id"], teacher_id.as_str());
    assert_eq!(reply.body["assignment"]["due_date"], "2025-11-03");

    let bad_date = request_err(
        &mut state,
        Request::post(
            "assignHomework",
            json!({ "class_section_id": section_id, "title": "X", "due_date": "03/11/2025" }),
        )
        .bearer(&teacher),
        400,
    );
    assert_eq!(bad_date["error"], "due_date must be YYYY-MM-DD");

    let other = academy_owner(&mut state, "b@b.com");
    request_ok(&mut state, create_user(&other, "teacher", "t@b.com"));
    let outsider = login(&mut state, "t@b.com", "staff1");
    request_err(
        &mut state,
        Request::post(
            "assignHomework",
            json!({ "class_section_id": section_id, "title": "X" }),
        )
        .bearer(&outsider),
        404,
    );
    assert_eq!(
        academyd::db::table_count(&state.db, "assignments").unwrap(),
        1
    );
}
