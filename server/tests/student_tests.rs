use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn import_then_validate_device_code() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;

    let (status, body) = post_json(
        &app,
        "/students/import",
        Some(&token),
        roster_body(1..=4),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "import failed: {}", body);
    assert_eq!(body["imported"], json!(4));
    assert_eq!(body["updated"], json!(0));

    // Every new student got a 6-key clicker code.
    let (status, body) = get_json(&app, "/student/B24EE1001", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let code = body["student"]["deviceCode"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| matches!(c, 'A'..='D')));

    // The code resolves to the student, case-insensitively.
    let (status, body) = post_json(
        &app,
        "/validate",
        None,
        json!({ "code": code.to_lowercase() }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["rollNo"], json!("B24EE1001"));
    assert_eq!(body["name"], json!("Student 1"));
    assert_eq!(body["section"], json!("A"));

    // An unknown code reads as a plain not-found.
    let (status, body) = post_json(&app, "/validate", None, json!({ "code": "XXXXXX" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn reimport_updates_in_place_and_keeps_codes() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;

    post_json(&app, "/students/import", Some(&token), roster_body(1..=3)).await;
    let (_, body) = get_json(&app, "/student/B24EE1002", Some(&token)).await;
    let code_before = body["student"]["deviceCode"].as_str().unwrap().to_string();

    // Second import of the same sheet: nothing new, everything refreshed.
    let (status, body) = post_json(
        &app,
        "/students/import",
        Some(&token),
        roster_body(1..=3),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"], json!(0));
    assert_eq!(body["updated"], json!(3));

    let (_, body) = get_json(&app, "/student/B24EE1002", Some(&token)).await;
    assert_eq!(body["student"]["deviceCode"], json!(code_before));
}

#[tokio::test]
async fn import_rejects_unknown_sections() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;

    let (status, _) = post_json(
        &app,
        "/students/import",
        Some(&token),
        json!({ "students": [{
            "sn": 1,
            "name": "Student 1",
            "rollNo": "B24EE1001",
            "email": "student1@example.edu",
            "section": "C",
            "subGroup": "C1",
            "branch": "EE",
        }] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn regenerating_a_code_invalidates_the_old_one() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;
    post_json(&app, "/students/import", Some(&token), roster_body(1..=2)).await;

    let (_, body) = get_json(&app, "/student/B24EE1001", Some(&token)).await;
    let old_code = body["student"]["deviceCode"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &app,
        "/students/B24EE1001/regenerate_code",
        Some(&token),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_code = body["deviceCode"].as_str().unwrap().to_string();
    assert_ne!(new_code, old_code);

    let (status, _) = post_json(&app, "/validate", None, json!({ "code": old_code })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = post_json(&app, "/validate", None, json!({ "code": new_code })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rollNo"], json!("B24EE1001"));
}

#[tokio::test]
async fn search_finds_by_roll_name_and_email() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;
    post_json(&app, "/students/import", Some(&token), roster_body(1..=4)).await;

    let (status, body) = get_json(&app, "/search_students?query=B24EE100", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(4));

    let (_, body) = get_json(&app, "/search_students?query=Student+3", Some(&token)).await;
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["students"][0]["rollNo"], json!("B24EE1003"));

    let (_, body) = get_json(
        &app,
        "/search_students?query=student2%40example.edu",
        Some(&token),
    )
    .await;
    assert_eq!(body["count"], json!(1));

    // A query is required.
    let (status, _) = get_json(&app, "/search_students", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn roster_listing_paginates_by_roll_number() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;
    post_json(&app, "/students/import", Some(&token), roster_body(1..=5)).await;

    let (status, body) = get_json(&app, "/all_students?page=1&limit=2", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(5));
    assert_eq!(body["pages"], json!(3));
    let students = body["students"].as_array().unwrap();
    assert_eq!(students.len(), 2);
    assert_eq!(students[0]["rollNo"], json!("B24EE1001"));

    let (_, body) = get_json(&app, "/all_students?page=3&limit=2", Some(&token)).await;
    let students = body["students"].as_array().unwrap();
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["rollNo"], json!("B24EE1005"));
}

#[tokio::test]
async fn unknown_students_read_as_not_found() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;

    let (status, _) = get_json(&app, "/student/B99ZZ9999", Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_json(
        &app,
        "/students/B99ZZ9999/regenerate_code",
        Some(&token),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn roster_body(range: std::ops::RangeInclusive<i64>) -> Value {
    let students: Vec<Value> = range
        .map(|i| {
            json!({
                "sn": i,
                "name": format!("Student {}", i),
                "rollNo": format!("B24EE100{}", i),
                "email": format!("student{}@example.edu", i),
                "section": if i % 2 == 0 { "B" } else { "A" },
                "subGroup": "A1",
                "branch": "EE",
            })
        })
        .collect();
    json!({ "students": students })
}

async fn instructor_token(app: &Router) -> String {
    let (status, body) = post_json(
        app,
        "/auth/register",
        None,
        json!({
            "username": "prof_singh",
            "password": "CorrectHorse9!",
            "name": "Prof Singh",
            "email": "prof.singh@example.edu",
            "masterCode": "MASTER123",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
    body["token"].as_str().unwrap().to_string()
}

async fn post_json(
    app: &Router,
    uri: &str,
    token: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get_json(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
