use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn full_attendance_flow() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;
    import_roster(&app, &token).await;

    // Nothing running yet.
    let (status, body) = get_json(&app, "/attendance", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], json!(false));

    let (status, body) = post_json(
        &app,
        "/start_attendance",
        Some(&token),
        json!({ "duration": 5, "section": "A", "notes": "Tuesday lecture" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "start failed: {}", body);
    assert_eq!(body["success"], json!(true));
    // Section A holds two of the four imported students.
    assert_eq!(body["totalExpected"], json!(2));

    let code = body["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 10);
    assert!(code.chars().all(|c| matches!(c, 'A'..='D')));

    // Status for the clickers: active, counting down, code withheld.
    let (_, body) = get_json(&app, "/attendance", None).await;
    assert_eq!(body["active"], json!(true));
    assert!(body["timeLeft"].as_i64().unwrap() <= 300);
    assert!(body.get("code").is_none());

    // Wrong code is refused before the roster is even consulted.
    let (status, body) = post_json(
        &app,
        "/mark_attendance",
        None,
        json!({ "rollNo": "B24EE1001", "code": "DDDDDDDDDD" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], json!("Invalid attendance code"));

    // Right code, unknown roll.
    let (status, _) = post_json(
        &app,
        "/mark_attendance",
        None,
        json!({ "rollNo": "B99ZZ9999", "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Right code, known roll.
    let (status, body) = post_json(
        &app,
        "/mark_attendance",
        None,
        json!({ "rollNo": "B24EE1001", "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    // Marking twice is refused.
    let (status, body) = post_json(
        &app,
        "/mark_attendance",
        None,
        json!({ "rollNo": "B24EE1001", "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], json!("Attendance already marked"));

    // Results: one present, the other section-A student absent.
    let (status, body) = get_json(&app, "/attendance_results", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["totalPresent"], json!(1));
    assert_eq!(body["summary"]["totalExpected"], json!(2));
    assert_eq!(body["summary"]["attendanceRate"], json!(50.0));
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["rollNo"], json!("B24EE1001"));
    let absentees = body["absentees"].as_array().unwrap();
    assert_eq!(absentees.len(), 1);
    assert_eq!(absentees[0]["rollNo"], json!("B24EE1003"));

    let (status, _) = post_json(&app, "/end_attendance", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);

    // Ending twice fails.
    let (status, _) = post_json(&app, "/end_attendance", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Marking after the end is refused.
    let (status, _) = post_json(
        &app,
        "/mark_attendance",
        None,
        json!({ "rollNo": "B24EE1003", "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn only_one_window_may_be_active() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;

    let (status, _) = post_json(
        &app,
        "/start_attendance",
        Some(&token),
        json!({ "duration": 5 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(
        &app,
        "/start_attendance",
        Some(&token),
        json!({ "duration": 5 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        json!("An attendance session is already active")
    );

    post_json(&app, "/end_attendance", Some(&token), json!({})).await;
    let (status, _) = post_json(
        &app,
        "/start_attendance",
        Some(&token),
        json!({ "duration": 5 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn polls_and_attendance_are_independent_kinds() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;

    let (status, _) = post_json(
        &app,
        "/start_attendance",
        Some(&token),
        json!({ "duration": 5 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // An open attendance window does not block a poll.
    let (status, _) = post_json(
        &app,
        "/start_poll",
        Some(&token),
        json!({
            "question": "What is the unit of charge?",
            "options": { "A": "Volt", "B": "Coulomb", "C": "Ampere", "D": "Ohm" },
            "correct": "B",
            "duration": 30,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn attendance_duration_bounds_are_enforced() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;

    for duration in [0, 61] {
        let (status, body) = post_json(
            &app,
            "/start_attendance",
            Some(&token),
            json!({ "duration": duration }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "duration {}", duration);
        assert_eq!(body["success"], json!(false));
    }

    let (status, _) = post_json(
        &app,
        "/start_attendance",
        Some(&token),
        json!({ "duration": 5, "section": "C" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn results_without_any_session_read_as_not_found() {
    let app = common::create_test_app().await;

    let (status, _) = get_json(&app, "/attendance_results", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_attendance_csv_lists_marks_in_order() {
    let app = common::create_test_app().await;
    let token = instructor_token(&app).await;
    import_roster(&app, &token).await;

    let (_, body) = post_json(
        &app,
        "/start_attendance",
        Some(&token),
        json!({ "duration": 5 }),
    )
    .await;
    let code = body["code"].as_str().unwrap().to_string();

    for roll in ["B24EE1002", "B24EE1001"] {
        let (status, _) = post_json(
            &app,
            "/mark_attendance",
            None,
            json!({ "rollNo": roll, "code": code }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/export_attendance")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "Roll No,Name,Status,Marked At");
    assert!(lines[1].starts_with("B24EE1002,Student 2,Present,"));
    assert!(lines[2].starts_with("B24EE1001,Student 1,Present,"));
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

async fn import_roster(app: &Router, token: &str) {
    let students: Vec<Value> = (1..=4)
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

    let (status, body) = post_json(
        app,
        "/students/import",
        Some(token),
        json!({ "students": students }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "import failed: {}", body);
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
