use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use jsonshare::{app, config::Config, content::content_hash, db, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "jsonshare-test-boundary";

async fn test_app(max_content_bytes: usize) -> (Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        upload_dir: temp_dir.path().to_path_buf(),
        max_content_bytes,
        stream_chunk_bytes: 8,
        ..Config::default()
    };
    let state = AppState::new(db::open_in_memory().unwrap(), &config);
    state.contents.ensure_root().await.unwrap();
    (app(state), temp_dir)
}

fn multipart(file_name: &str, data: &[u8], file_hash: Option<&str>) -> Body {
    let mut body = Vec::new();
    if let Some(hash) = file_hash {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"fileHash\"\r\n\r\n{hash}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/json\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Body::from(body)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn upload(user: &str, file_name: &str, data: &[u8], file_hash: Option<&str>) -> Request<Body> {
    Request::post("/files/upload")
        .header("X-User-ID", user)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart(file_name, data, file_hash))
        .unwrap()
}

fn json_request(method: &str, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header("X-User-ID", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(user) = user {
        builder = builder.header("X-User-ID", user);
    }
    builder.body(Body::empty()).unwrap()
}

async fn upload_and_share(app: &Router, user: &str, data: &[u8], expiry: &str) -> Value {
    let (status, file) = send_json(app, upload(user, "doc.json", data, None)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, share) = send_json(
        app,
        json_request(
            "POST",
            "/shares",
            Some(user),
            json!({ "fileId": file["id"], "expiryType": expiry }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    share
}

#[tokio::test]
async fn upload_share_fetch_and_revoke() {
    let (app, _dir) = test_app(1024).await;
    let document = br#"{"title": "shared", "values": [1, 2, 3, 4, 5, 6]}"#;

    let share = upload_and_share(&app, "alice", document, "week").await;
    let code = share["shareCode"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 8);
    assert_eq!(share["fileName"], "doc.json");
    assert_eq!(share["status"], "active");
    assert!(share["expiresAt"].is_string());

    let (status, body) = send(&app, get(&format!("/shares/{code}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, document);

    let response = app
        .clone()
        .oneshot(get(&format!("/shares/{code}/download"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"doc.json\""
    );

    let (status, mine) = send_json(&app, get("/shares/mine", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let share_id = share["id"].as_str().unwrap();
    let (status, error) = send_json(
        &app,
        json_request("DELETE", &format!("/shares/{share_id}"), Some("mallory"), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["code"], "FORBIDDEN");

    let (status, _) = send(
        &app,
        json_request("DELETE", &format!("/shares/{share_id}"), Some("alice"), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, error) = send_json(&app, get(&format!("/shares/{code}"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "SHARE_NOT_FOUND");

    let (_, mine) = send_json(&app, get("/shares/mine", Some("alice"))).await;
    assert!(mine.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn verify_before_upload() {
    let (app, _dir) = test_app(1024).await;
    let document = br#"{"dedup": true}"#;
    let hash = content_hash(document);

    let (status, verdict) = send_json(
        &app,
        json_request("POST", "/files/verify", None, json!({ "fileHash": hash })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict, json!({ "exists": false }));

    let (status, first) = send_json(&app, upload("bob", "a.json", document, Some(&hash))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, verdict) = send_json(
        &app,
        json_request("POST", "/files/verify", None, json!({ "fileHash": hash })),
    )
    .await;
    assert_eq!(verdict["exists"], true);
    assert_eq!(verdict["fileId"], first["id"]);

    let (_, second) = send_json(&app, upload("carol", "b.json", document, None)).await;
    assert_eq!(second["id"], first["id"]);
}

#[tokio::test]
async fn upload_rejections() {
    let (app, dir) = test_app(64).await;

    let (status, error) = send_json(&app, upload("dave", "bad.json", b"{oops", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "INVALID_CONTENT");

    let (status, error) = send_json(&app, upload("dave", "notes.txt", b"{}", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "INVALID_CONTENT");

    let big = serde_json::to_vec(&json!({ "padding": "x".repeat(200) })).unwrap();
    let (status, error) = send_json(&app, upload("dave", "big.json", &big, None)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error["code"], "CONTENT_TOO_LARGE");

    let request = Request::post("/files/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart("ok.json", b"{}", None))
        .unwrap();
    let (status, error) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "MISSING_IDENTITY");

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn share_for_unknown_file_is_not_found() {
    let (app, _dir) = test_app(1024).await;
    let (status, error) = send_json(
        &app,
        json_request(
            "POST",
            "/shares",
            Some("erin"),
            json!({ "fileId": uuid::Uuid::new_v4(), "expiryType": "day" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "CONTENT_NOT_FOUND");
}

#[tokio::test]
async fn permanent_share_has_no_expiry() {
    let (app, _dir) = test_app(1024).await;
    let share = upload_and_share(&app, "frank", b"[]", "permanent").await;
    assert!(share["expiresAt"].is_null());
}
