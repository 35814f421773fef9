use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        Request, StatusCode,
    },
    Router,
};
use club_hub::{
    auth::Keys,
    connect_to_db,
    email::{LogTransport, Mailer},
    models::Role,
    realtime::Hub,
    session::{SessionStore, SessionUser, SESSION_COOKIE},
    uploads::Uploads,
    Services,
};
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

const SECRET: &str = "cm91dGUtdGVzdHMtc2Vzc2lvbi1zZWNyZXQ=";
const BOUNDARY: &str = "club-hub-boundary";

/// The pool points nowhere; every request exercised here is answered before a
/// connection is needed.
fn services(idle: Duration) -> Services {
    let keys = Keys::from_base64_secret(SECRET).unwrap();
    let mailer = Mailer::new(
        Arc::new(LogTransport),
        "Club Hub <noreply@clubhub.test>".parse().unwrap(),
        Url::parse("http://localhost:3000/").unwrap(),
    );
    Services {
        pool: connect_to_db("postgres://nobody@127.0.0.1:1/none").unwrap(),
        sessions: SessionStore::new(keys, idle, Duration::from_secs(24 * 60 * 60)),
        hub: Hub::new(),
        mailer,
        uploads: Uploads::new(std::env::temp_dir().join("club-hub-route-tests")),
    }
}

async fn login(services: &Services, id: i32, role: Role) -> String {
    let token = services
        .sessions
        .create(SessionUser {
            id,
            username: format!("{role} {id}"),
            email: format!("{role}{id}@clubhub.test"),
            role,
        })
        .await
        .unwrap();
    format!("{SESSION_COOKIE}={token}")
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut req = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        req = req.header(COOKIE, cookie);
    }
    req.body(Body::empty()).unwrap()
}

fn post(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut req = Request::builder().method("POST").uri(uri);
    if let Some(cookie) = cookie {
        req = req.header(COOKIE, cookie);
    }
    req.body(Body::empty()).unwrap()
}

fn multipart(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

async fn json(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn anonymous_visitors_are_sent_to_login() {
    let app = club_hub::app(services(Duration::from_secs(900)));

    for uri in ["/", "/student/1/home", "/api/me", "/messages/broadcasts"] {
        let res = app.clone().oneshot(get(uri, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER, "{uri}");
        assert_eq!(res.headers()[LOCATION], "/login", "{uri}");
    }
}

#[tokio::test]
async fn home_redirects_by_role() {
    let services = services(Duration::from_secs(900));
    let student = login(&services, 4, Role::Student).await;
    let club = login(&services, 9, Role::Club).await;
    let dean = login(&services, 2, Role::Dean).await;
    let app = club_hub::app(services);

    for (cookie, home) in [
        (&student, "/student/4/home"),
        (&club, "/club/9"),
        (&dean, "/dean/dashboard"),
    ] {
        let res = app.clone().oneshot(get("/", Some(cookie))).await.unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers()[LOCATION], home);
    }
}

#[tokio::test]
async fn idle_sessions_expire() {
    let services = services(Duration::from_millis(5));
    let cookie = login(&services, 4, Role::Student).await;
    let app = club_hub::app(services);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let res = app.oneshot(get("/api/me", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()[LOCATION], "/login?expired=1");
}

#[tokio::test]
async fn purged_sessions_expire_like_idle_ones() {
    let services = services(Duration::from_millis(5));
    let cookie = login(&services, 4, Role::Student).await;
    let sessions = services.sessions.clone();
    let app = club_hub::app(services);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sessions.purge_idle().await, 1);
    let res = app.oneshot(get("/api/me", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()[LOCATION], "/login?expired=1");
}

#[tokio::test]
async fn verification_links_need_a_token() {
    let app = club_hub::app(services(Duration::from_secs(900)));

    for uri in ["/verify-email", "/verify-email?token="] {
        let (status, body) = json(app.clone(), get(uri, None)).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body["error"], "Invalid or expired verification link.", "{uri}");
    }
}

#[tokio::test]
async fn role_areas_are_closed_to_other_roles() {
    let services = services(Duration::from_secs(900));
    let student = login(&services, 4, Role::Student).await;
    let admin = login(&services, 1, Role::Admin).await;
    let app = club_hub::app(services);

    for (uri, cookie) in [
        ("/admin/dashboard", &student),
        ("/dean/dashboard", &admin),
        ("/club/9/subscribers", &student),
        ("/student/4/applications", &admin),
    ] {
        let (status, body) = json(app.clone(), get(uri, Some(cookie))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["status"], 403);
    }
}

#[tokio::test]
async fn accounts_only_act_for_themselves() {
    let services = services(Duration::from_secs(900));
    let club = login(&services, 9, Role::Club).await;
    let student = login(&services, 4, Role::Student).await;
    let app = club_hub::app(services);

    let (status, _) = json(app.clone(), post("/club/10/posts/3/delete", Some(&club))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = json(app, post("/student/5/subscribe/9", Some(&student))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_review_verdicts_are_not_found() {
    let services = services(Duration::from_secs(900));
    let admin = login(&services, 1, Role::Admin).await;
    let app = club_hub::app(services);

    let (status, _) = json(app, post("/admin/posts/3/publish", Some(&admin))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deans_have_no_broadcast_feed() {
    let services = services(Duration::from_secs(900));
    let dean = login(&services, 2, Role::Dean).await;
    let app = club_hub::app(services);

    let (status, body) = json(app, get("/messages/broadcasts", Some(&dean))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"], serde_json::json!([]));
}

#[tokio::test]
async fn logout_clears_the_cookie() {
    let services = services(Duration::from_secs(900));
    let cookie = login(&services, 4, Role::Student).await;
    let sessions = services.sessions.clone();
    let app = club_hub::app(services);

    let res = app.oneshot(post("/logout", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()[LOCATION], "/login");
    let set_cookie = res.headers()[SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("Max-Age=0"));

    let token = cookie.trim_start_matches(&format!("{SESSION_COOKIE}="));
    assert!(sessions.resolve(token).await.is_err());
}

#[tokio::test]
async fn student_signup_is_validated_before_anything_is_stored() {
    let app = club_hub::app(services(Duration::from_secs(900)));

    let cases = [
        (
            vec![("role", "visitor")],
            "Please select a role",
        ),
        (
            vec![
                ("role", "student"),
                ("fullName", "Reem Alharbi"),
                ("studentEmail", "reem@gmail.com"),
                ("studentPassword", "abc12345"),
                ("studentConfirmPassword", "abc12345"),
            ],
            "Invalid PSU email format!",
        ),
        (
            vec![
                ("role", "student"),
                ("fullName", "Reem Alharbi"),
                ("studentEmail", "221110987@psu.edu.sa"),
                ("studentPassword", "short1"),
                ("studentConfirmPassword", "short1"),
            ],
            "Password must be at least 8 characters!",
        ),
        (
            vec![
                ("role", "student"),
                ("fullName", "Reem Alharbi"),
                ("studentEmail", "221110987@psu.edu.sa"),
                ("studentPassword", "abc12345"),
                ("studentConfirmPassword", "abc12346"),
            ],
            "Passwords do not match!",
        ),
    ];

    for (fields, error) in cases {
        let (status, body) = json(app.clone(), multipart("/signup", &fields)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], error);
    }
}
