use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use chrono::{Datelike, Duration, Utc};
use reqwest::Client;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use serde_json::{Value, json};
use visitlog_server::mail::{MailError, Mailer};
use visitlog_server::storage::models::UserInput;
use visitlog_server::{server, storage};
use visitlog_shared::api::endpoints;

const LOGIN_PATH: &str = "/api/v1/auth/login";
const ADMIN_EMAIL: &str = "librarian@library.test";

/// Captures reset codes instead of sending mail.
#[derive(Clone, Default)]
struct RecordingMailer {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingMailer {
    fn last_code_for(&self, to: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(addr, _)| addr == to)
            .map(|(_, code)| code.clone())
    }
}

impl Mailer for RecordingMailer {
    fn send_reset_code(&self, to: &str, code: &str) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), code.to_string()));
        Ok(())
    }
}

struct TestServer {
    base: String,
    client: Client,
    store: storage::Store,
    mailer: RecordingMailer,
    handle: tokio::task::JoinHandle<()>,
    tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let mailer = RecordingMailer::default();
        let (addr, store, handle) = match start_server(dir.path(), mailer.clone()).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            store,
            mailer,
            handle,
            tempdir: dir,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let body = self
            .request_expect(
                "POST",
                LOGIN_PATH,
                None,
                Some(json!({"username": username, "password": password})),
                StatusCode::OK,
            )
            .await;
        body.get("token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .expect("token missing from auth response")
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = self.url(path);
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_expect(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, path, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {path} returned {status:?} with body {value:?}",
        );
        value
    }

    /// GET returning the raw response, for downloads.
    async fn download(&self, url: &str, token: &str) -> reqwest::Response {
        self.client.get(url).bearer_auth(token).send().await.unwrap()
    }

    async fn add_student(&self, token: &str, id: &str, course_id: i64, age: i64) {
        self.request_expect(
            "POST",
            "/api/v1/students",
            Some(token),
            Some(json!({
                "id": id,
                "first_name": "Juan",
                "middle_name": null,
                "last_name": "Dela Cruz",
                "age": age,
                "course_id": course_id,
                "image": null,
                "location_id": null,
                "location": {
                    "barangay": "Poblacion",
                    "municipality": "Jimenez",
                    "province": "Misamis Occidental"
                }
            })),
            StatusCode::CREATED,
        )
        .await;
    }

    async fn course_id(&self, token: &str, name: &str) -> i64 {
        let courses = self
            .request_expect("GET", "/api/v1/courses", Some(token), None, StatusCode::OK)
            .await;
        courses
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["course_name"] == name)
            .and_then(|c| c["id"].as_i64())
            .unwrap_or_else(|| panic!("course {name} missing"))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(
    dir: &Path,
    mailer: RecordingMailer,
) -> Result<(SocketAddr, storage::Store, tokio::task::JoinHandle<()>), std::io::Error> {
    let config = server::AppConfig {
        secret_key: "testsecret".into(),
        db_path: dir.join("test.db").to_string_lossy().to_string(),
        upload_dir: dir.join("uploads"),
        backup_dir: dir.join("backups"),
        timezone: "UTC".into(),
        ..server::AppConfig::default()
    };

    let store = storage::Store::connect_sqlite(&config.db_path)
        .await
        .expect("db");
    let hash = bcrypt::hash("secret123", 4).unwrap();
    store
        .seed_defaults(
            UserInput {
                username: "librarian".into(),
                email: ADMIN_EMAIL.into(),
                first_name: "Maria".into(),
                last_name: "Santos".into(),
                phone: None,
                password_hash: Some(hash),
                role: "admin".into(),
                location_id: None,
                image: None,
            },
            &["Information Technology", "Marine Biology"],
        )
        .await
        .expect("seed");

    let state = server::AppState::new(config, store.clone(), Arc::new(mailer)).expect("state");
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((addr, store, handle))
}

fn assert_failure_body(body: &Value) {
    assert_eq!(body["success"], false, "expected failure body, got {body:?}");
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn public_endpoints_work() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    server
        .request_expect("GET", "/healthz", None, None, StatusCode::OK)
        .await;
    let version = server
        .request_expect("GET", "/api/v1/version", None, None, StatusCode::OK)
        .await;
    assert!(version.get("version").and_then(|v| v.as_str()).is_some());
    let token = server.login("librarian", "secret123").await;
    assert!(!token.is_empty());

    let (status, body) = server
        .request(
            "POST",
            LOGIN_PATH,
            None,
            Some(json!({"username": "librarian", "password": "wrong"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid username or password.");
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let cases: Vec<(&str, &str, Option<Value>)> = vec![
        ("GET", "/admin", None),
        ("GET", "/api/v1/dashboard", None),
        ("GET", "/api/v1/students", None),
        ("GET", "/admin/manage_students", None),
        ("GET", "/api/v1/students/2021-0001", None),
        ("DELETE", "/admin/delete_student/2021-0001", None),
        ("GET", "/api/v1/courses", None),
        ("POST", "/api/v1/courses", Some(json!({"course_name": "X"}))),
        ("DELETE", "/api/v1/courses/1", None),
        ("GET", "/api/v1/admins", None),
        ("GET", "/api/locations", None),
        ("GET", "/api/v1/locations", None),
        ("GET", "/export/csv", None),
        ("GET", "/api/v1/export/pdf", None),
        ("GET", "/download_graph", None),
    ];

    for (method, path, body) in cases.iter() {
        let value = server
            .request_expect(method, path, None, body.clone(), StatusCode::UNAUTHORIZED)
            .await;
        assert_failure_body(&value);
    }

    let (status, _) = server
        .request("GET", "/api/v1/courses", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cookie_session_and_logout() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let resp = server
        .client
        .post(server.url("/admin/login"))
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body("username=librarian&password=secret123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
        .expect("session cookie");
    assert!(cookie.starts_with("visitlog_session="));

    let with_cookie = |path: &str| {
        server
            .client
            .get(server.url(path))
            .header(COOKIE, cookie.clone())
    };
    let resp = with_cookie("/api/v1/courses").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .client
        .post(endpoints::auth_logout(&server.base))
        .header(COOKIE, cookie.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = with_cookie("/api/v1/courses").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn check_in_flow() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let token = server.login("librarian", "secret123").await;
    let it = server.course_id(&token, "Information Technology").await;
    server.add_student(&token, "2021-0001", it, 20).await;

    let unknown = server
        .request_expect(
            "POST",
            "/api/v1/checkin",
            None,
            Some(json!({"id": "9999-0000"})),
            StatusCode::NOT_FOUND,
        )
        .await;
    assert_eq!(unknown["success"], false);
    assert_eq!(
        unknown["message"],
        "No student ID number found. Please try again."
    );
    assert_eq!(server.store.attendance_count_for("9999-0000").await.unwrap(), 0);

    let first = server
        .request_expect(
            "POST",
            "/api/v1/checkin",
            None,
            Some(json!({"id": "2021-0001"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(first["success"], true);
    assert_eq!(first["student"]["id"], "2021-0001");
    assert_eq!(
        first["student"]["course"]["course_name"],
        "Information Technology"
    );
    let login_time = first["login_time"].as_str().unwrap().to_string();

    // Page-style form submission hits the same rule
    let resp = server
        .client
        .post(server.url("/"))
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body("id=2021-0001")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let again: Value = resp.json().await.unwrap();
    assert_eq!(again["success"], false);
    assert_eq!(again["login_time"], login_time.as_str());
    assert_eq!(server.store.attendance_count_for("2021-0001").await.unwrap(), 1);

    let blank = server
        .request_expect(
            "POST",
            "/api/v1/checkin",
            None,
            Some(json!({"id": "   "})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_failure_body(&blank);
}

#[tokio::test]
async fn course_with_students_cannot_be_deleted() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let token = server.login("librarian", "secret123").await;
    let created = server
        .request_expect(
            "POST",
            "/api/v1/courses",
            Some(&token),
            Some(json!({"course_name": "Astronomy"})),
            StatusCode::CREATED,
        )
        .await;
    let course_id = created["data"]["id"].as_i64().unwrap();
    let dup = server
        .request_expect(
            "POST",
            "/admin/manage_courses",
            Some(&token),
            Some(json!({"course_name": "Astronomy"})),
            StatusCode::CONFLICT,
        )
        .await;
    assert_failure_body(&dup);

    server.add_student(&token, "2022-0042", course_id, 19).await;
    let conflict = server
        .request_expect(
            "DELETE",
            &format!("/api/v1/courses/{course_id}"),
            Some(&token),
            None,
            StatusCode::CONFLICT,
        )
        .await;
    assert_eq!(
        conflict["message"],
        "Cannot delete course with 1 enrolled student(s)"
    );
    server
        .request_expect(
            "GET",
            &format!("/api/v1/courses/{course_id}"),
            Some(&token),
            None,
            StatusCode::OK,
        )
        .await;
    let resp = server
        .download(&endpoints::student(&server.base, "2022-0042"), &token)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    server
        .request_expect(
            "DELETE",
            "/admin/delete_student/2022-0042",
            Some(&token),
            None,
            StatusCode::OK,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &format!("/admin/delete_course/{course_id}"),
            Some(&token),
            None,
            StatusCode::OK,
        )
        .await;

    let backups: Vec<String> = std::fs::read_dir(server.tempdir.path().join("backups"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    for prefix in ["Student_deleted_", "Course_deleted_"] {
        assert!(
            backups.iter().any(|f| f.starts_with(prefix) && f.ends_with(".csv")),
            "missing {prefix} csv in {backups:?}"
        );
        assert!(
            backups.iter().any(|f| f.starts_with(prefix) && f.ends_with(".db")),
            "missing {prefix} db in {backups:?}"
        );
    }
}

#[tokio::test]
async fn dashboard_and_exports_cover_window() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let token = server.login("librarian", "secret123").await;
    let it = server.course_id(&token, "Information Technology").await;
    server.add_student(&token, "S1", it, 20).await;

    let now = Utc::now().naive_utc();
    let day_a = now - Duration::days(1);
    let day_b = now - Duration::days(2);
    server.store.record_attendance("S1", day_a).await.unwrap();
    server.store.record_attendance("S1", day_b).await.unwrap();
    // Outside the weekly window
    server
        .store
        .record_attendance("S1", now - Duration::days(30))
        .await
        .unwrap();

    let dash = server
        .request_expect(
            "GET",
            "/api/v1/dashboard?filter=weekly",
            Some(&token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(dash["total_visitors"], 1);
    let weekly: Vec<i64> = dash["weekly_course_visits"]["Information Technology"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    let mut expected = vec![0i64; 7];
    expected[day_a.weekday().num_days_from_sunday() as usize] += 1;
    expected[day_b.weekday().num_days_from_sunday() as usize] += 1;
    assert_eq!(weekly, expected);
    assert!(
        dash["weekly_course_visits"]["Marine Biology"]
            .as_array()
            .unwrap()
            .iter()
            .all(|v| v == 0)
    );
    assert_eq!(dash["place_visits"][0]["municipality"], "Jimenez");
    assert_eq!(dash["place_visits"][0]["visits"], 2);

    let resp = server
        .download(&format!("{}?filter=weekly", endpoints::export_csv(&server.base)), &token)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("attendance_data.csv"));
    let text = resp.text().await.unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "ID,First Name,Last Name,Course,Check-in Time");
    assert_eq!(lines.len(), 3, "unexpected csv: {text}");
    assert!(lines[1].starts_with("S1,Juan,Dela Cruz,Information Technology,"));

    let resp = server
        .download(&server.url("/export/pdf?filter=monthly"), &token)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.bytes().await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));

    let bad = server
        .request_expect(
            "GET",
            "/api/v1/export/csv?filter=custom&start_date=2024-13-01",
            Some(&token),
            None,
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_failure_body(&bad);
}

#[tokio::test]
async fn chart_download_validates_input() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let token = server.login("librarian", "secret123").await;

    let missing = server
        .request_expect(
            "GET",
            "/download_graph",
            Some(&token),
            None,
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(missing["message"], "Missing data parameter");

    let mut url = reqwest::Url::parse(&server.url("/download_graph")).unwrap();
    url.query_pairs_mut()
        .append_pair("weekly_course_visits", "{not json");
    let resp = server.download(url.as_str(), &token).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid JSON data")
    );

    let mut url = reqwest::Url::parse(&endpoints::charts(&server.base)).unwrap();
    url.query_pairs_mut().append_pair(
        "weekly_course_visits",
        r#"{"Information Technology":[0,1,0,1,0,0,0]}"#,
    );
    let resp = server.download(url.as_str(), &token).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("visitor_statistics_"));
    let bytes = resp.bytes().await.unwrap();
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn chart_series_can_be_posted_as_form() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let token = server.login("librarian", "secret123").await;

    // Encode the body the same way a browser form would
    let mut encoder = reqwest::Url::parse("http://localhost/").unwrap();
    encoder
        .query_pairs_mut()
        .append_pair("type", "monthly")
        .append_pair(
            "weekly_course_visits",
            r#"{"Information Technology":[0,1,0,1,0,0,0]}"#,
        )
        .append_pair(
            "monthly_data",
            r#"{"Information Technology":[3,1,4,1,5,9,2,6,5,3,5,8],"Marine Biology":[0,0,0,0,0,0,0,0,0,0,0,1]}"#,
        );
    let form_body = encoder.query().unwrap_or_default().to_string();

    let resp = server
        .client
        .post(server.url("/download_graph"))
        .bearer_auth(&token)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(form_body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("monthly_comparison_"));
    let bytes = resp.bytes().await.unwrap();
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));

    let resp = server
        .client
        .post(endpoints::charts(&server.base))
        .bearer_auth(&token)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body("weekly_course_visits=%7Bbroken")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_failure_body(&body);
}

#[tokio::test]
async fn malformed_query_form_and_path_get_json_errors() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let token = server.login("librarian", "secret123").await;

    for path in [
        "/api/v1/dashboard?course_id=abc",
        "/api/v1/export/csv?unique_per_day=maybe",
        "/api/v1/courses/abc",
    ] {
        let resp = server.download(&server.url(path), &token).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{path}");
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("application/json"), "{path}: {content_type}");
        let body: Value = resp.json().await.unwrap();
        assert_failure_body(&body);
    }

    // Form bodies missing a required field
    let resp = server
        .client
        .post(server.url("/admin/login"))
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body("username=librarian")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_failure_body(&body);
}

#[tokio::test]
async fn password_reset_flow() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let old_token = server.login("librarian", "secret123").await;

    // Unknown addresses get the same answer and no mail
    server
        .request_expect(
            "POST",
            "/api/v1/auth/forgot-password",
            None,
            Some(json!({"email": "nobody@library.test"})),
            StatusCode::OK,
        )
        .await;
    assert!(server.mailer.last_code_for("nobody@library.test").is_none());

    server
        .request_expect(
            "POST",
            "/api/v1/auth/forgot-password",
            None,
            Some(json!({"email": ADMIN_EMAIL})),
            StatusCode::OK,
        )
        .await;
    let code = server.mailer.last_code_for(ADMIN_EMAIL).expect("code mailed");
    assert_eq!(code.len(), 6);
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let mismatch = server
        .request_expect(
            "POST",
            "/api/v1/auth/verify-code",
            None,
            Some(json!({"email": ADMIN_EMAIL, "code": wrong})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(
        mismatch["message"],
        "Invalid verification code. 2 attempts remaining."
    );
    server
        .request_expect(
            "POST",
            "/api/v1/auth/verify-code",
            None,
            Some(json!({"email": ADMIN_EMAIL, "code": code})),
            StatusCode::OK,
        )
        .await;

    let mismatched = server
        .request_expect(
            "POST",
            "/api/v1/auth/reset-password",
            None,
            Some(json!({
                "email": ADMIN_EMAIL,
                "code": code,
                "password": "n3w-pass",
                "confirm_password": "other"
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(mismatched["message"], "Passwords do not match!");

    server
        .request_expect(
            "POST",
            "/api/v1/auth/reset-password",
            None,
            Some(json!({
                "email": ADMIN_EMAIL,
                "code": code,
                "password": "n3w-pass",
                "confirm_password": "n3w-pass"
            })),
            StatusCode::OK,
        )
        .await;

    // Existing sessions are revoked and the code is single use
    server
        .request_expect(
            "GET",
            "/api/v1/courses",
            Some(&old_token),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;
    server
        .request_expect(
            "POST",
            "/api/v1/auth/reset-password",
            None,
            Some(json!({
                "email": ADMIN_EMAIL,
                "code": code,
                "password": "again",
                "confirm_password": "again"
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;
    let (status, _) = server
        .request(
            "POST",
            LOGIN_PATH,
            None,
            Some(json!({"username": "librarian", "password": "secret123"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    server.login("librarian", "n3w-pass").await;
}

#[tokio::test]
async fn admin_accounts_are_managed() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let token = server.login("librarian", "secret123").await;
    let admins = server
        .request_expect("GET", "/api/v1/admins", Some(&token), None, StatusCode::OK)
        .await;
    let self_id = admins[0]["id"].as_i64().unwrap();
    assert!(admins[0].get("password_hash").is_none());

    let refused = server
        .request_expect(
            "DELETE",
            &format!("/api/v1/admins/{self_id}"),
            Some(&token),
            None,
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_failure_body(&refused);

    let new_admin = json!({
        "username": "assistant",
        "email": "assistant@library.test",
        "first_name": "Ana",
        "last_name": "Reyes",
        "phone": null,
        "password": "pw-1234",
        "confirm_password": "pw-1234",
        "location_id": null,
        "image": null,
        "role": null
    });
    let created = server
        .request_expect(
            "POST",
            "/api/v1/admins",
            Some(&token),
            Some(new_admin.clone()),
            StatusCode::CREATED,
        )
        .await;
    let new_id = created["data"]["id"].as_i64().unwrap();
    assert_eq!(created["data"]["role"], "admin");

    let dup = server
        .request_expect(
            "POST",
            "/admin/manage_admins",
            Some(&token),
            Some(new_admin),
            StatusCode::CONFLICT,
        )
        .await;
    assert_eq!(dup["message"], "Username or email already exists!");

    let assistant = server.login("assistant", "pw-1234").await;
    server
        .request_expect(
            "DELETE",
            &format!("/api/v1/admins/{new_id}"),
            Some(&token),
            None,
            StatusCode::OK,
        )
        .await;
    server
        .request_expect(
            "GET",
            "/api/v1/students",
            Some(&assistant),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn image_upload_is_served_back() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let token = server.login("librarian", "secret123").await;

    let boundary = "visitlog-test-boundary";
    let payload: &[u8] = b"\x89PNG\r\n\x1a\nnot-really-an-image";
    let multipart = |filename: &str| {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    };
    let post = |body: Vec<u8>| {
        server
            .client
            .post(endpoints::uploads(&server.base))
            .bearer_auth(&token)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(body)
            .send()
    };

    let resp = post(multipart("Student Photo.PNG")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    let stored = body["filename"].as_str().unwrap().to_string();
    assert!(stored.starts_with("student-photo-"));
    assert!(stored.ends_with(".png"));

    let resp = server
        .client
        .get(server.url(&format!("/uploads/{stored}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), payload);

    let resp = post(multipart("shell.php")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
