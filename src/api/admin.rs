use super::{
    redirect_with_notice,
    review::{self, ReviewNotes},
    Page,
};
use crate::{
    auth::AdminOnly,
    email::Mailer,
    error::{AppError, AppResult},
    models::{AuditLog, ClubRequest, Event, EventReport, Post, RequestStatus, ReviewStatus, Role},
    realtime::Hub,
    schema::*,
    session::SessionStore,
    workflow::Reviewer,
    DbPool,
};
use axum::{
    extract::Path,
    response::Redirect,
    routing::{get, post},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

const AUDIT_PAGE: i64 = 200;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    students: i64,
    clubs: i64,
    posts: i64,
    pending_club_requests: i64,
    pending_posts: i64,
    pending_events: i64,
    reports: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Dashboard {
    stats: Stats,
}

async fn dashboard(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    AdminOnly(ctx): AdminOnly,
) -> AppResult<Json<Page<Dashboard>>> {
    let conn = &mut pool.get().await?;

    let stats = Stats {
        students: users::table
            .filter(users::role.eq(Role::Student))
            .count()
            .get_result(conn)
            .await?,
        clubs: users::table
            .filter(users::role.eq(Role::Club))
            .count()
            .get_result(conn)
            .await?,
        posts: posts::table.count().get_result(conn).await?,
        pending_club_requests: club_requests::table
            .filter(club_requests::status.eq(RequestStatus::Pending))
            .count()
            .get_result(conn)
            .await?,
        pending_posts: posts::table
            .filter(posts::status.eq(ReviewStatus::Pending))
            .count()
            .get_result(conn)
            .await?,
        pending_events: events::table
            .filter(events::status.eq(ReviewStatus::Pending))
            .filter(events::approved_by_admin.eq(false))
            .count()
            .get_result(conn)
            .await?,
        reports: event_reports::table.count().get_result(conn).await?,
    };

    Ok(Page::render(&sessions, &ctx, Dashboard { stats }).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClubRequestList {
    requests: Vec<ClubRequest>,
}

async fn club_requests(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    AdminOnly(ctx): AdminOnly,
) -> AppResult<Json<Page<ClubRequestList>>> {
    let conn = &mut pool.get().await?;
    let requests = club_requests::table
        .filter(club_requests::status.eq(RequestStatus::Pending))
        .order(club_requests::created_at.asc())
        .load::<ClubRequest>(conn)
        .await?;
    Ok(Page::render(&sessions, &ctx, ClubRequestList { requests }).await)
}

async fn club_request(
    Extension(pool): Extension<DbPool>,
    AdminOnly(_): AdminOnly,
    Path(request_id): Path<i32>,
) -> AppResult<Json<ClubRequest>> {
    let conn = &mut pool.get().await?;
    let request = club_requests::table
        .find(request_id)
        .first::<ClubRequest>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Club request"))?;
    Ok(Json(request))
}

async fn decide_club_request(
    Extension(pool): Extension<DbPool>,
    Extension(mailer): Extension<Mailer>,
    Extension(sessions): Extension<SessionStore>,
    AdminOnly(ctx): AdminOnly,
    Path((request_id, verdict)): Path<(i32, String)>,
    body: Option<Json<ReviewNotes>>,
) -> AppResult<Redirect> {
    let decision = review::parse_verdict(&verdict, body)?;
    let conn = &mut pool.get().await?;
    let outcome =
        review::review_club_request(conn, &mailer, &ctx, Reviewer::Admin, request_id, decision).await?;
    let notice = match outcome.status {
        RequestStatus::Approved => "Club approved and account created.",
        RequestStatus::AdminApproved => "Club request forwarded to the dean.",
        _ => "Club request rejected.",
    };
    Ok(redirect_with_notice(&sessions, &ctx, "/admin/club-requests", notice).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingPost {
    #[serde(flatten)]
    post: Post,
    club_name: String,
}

#[derive(Serialize)]
struct PostList {
    posts: Vec<PendingPost>,
}

async fn pending_posts(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    AdminOnly(ctx): AdminOnly,
) -> AppResult<Json<Page<PostList>>> {
    let conn = &mut pool.get().await?;
    let posts = posts::table
        .inner_join(users::table)
        .filter(posts::status.eq(ReviewStatus::Pending))
        .order(posts::created_at.asc())
        .select((posts::all_columns, users::username))
        .load::<(Post, String)>(conn)
        .await?
        .into_iter()
        .map(|(post, club_name)| PendingPost { post, club_name })
        .collect();
    Ok(Page::render(&sessions, &ctx, PostList { posts }).await)
}

async fn decide_post(
    Extension(pool): Extension<DbPool>,
    Extension(hub): Extension<Hub>,
    Extension(mailer): Extension<Mailer>,
    Extension(sessions): Extension<SessionStore>,
    AdminOnly(ctx): AdminOnly,
    Path((post_id, verdict)): Path<(i32, String)>,
    body: Option<Json<ReviewNotes>>,
) -> AppResult<Redirect> {
    let decision = review::parse_verdict(&verdict, body)?;
    let conn = &mut pool.get().await?;
    let post = review::review_post(conn, &hub, &mailer, &ctx, post_id, decision).await?;
    let notice = match post.status {
        ReviewStatus::Approved => "Post approved.",
        _ => "Post rejected.",
    };
    Ok(redirect_with_notice(&sessions, &ctx, "/admin/posts", notice).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvent {
    #[serde(flatten)]
    pub event: Event,
    pub club_name: String,
    pub club_email: String,
}

#[derive(Serialize)]
pub struct EventList {
    pub events: Vec<PendingEvent>,
}

async fn pending_events(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    AdminOnly(ctx): AdminOnly,
) -> AppResult<Json<Page<EventList>>> {
    let conn = &mut pool.get().await?;
    let events = events::table
        .inner_join(users::table)
        .filter(events::status.eq(ReviewStatus::Pending))
        .filter(events::approved_by_admin.eq(false))
        .order(events::created_at.asc())
        .select((events::all_columns, users::username, users::email))
        .load::<(Event, String, String)>(conn)
        .await?
        .into_iter()
        .map(|(event, club_name, club_email)| PendingEvent {
            event,
            club_name,
            club_email,
        })
        .collect();
    Ok(Page::render(&sessions, &ctx, EventList { events }).await)
}

async fn decide_event(
    Extension(pool): Extension<DbPool>,
    Extension(hub): Extension<Hub>,
    Extension(mailer): Extension<Mailer>,
    Extension(sessions): Extension<SessionStore>,
    AdminOnly(ctx): AdminOnly,
    Path((event_id, verdict)): Path<(i32, String)>,
    body: Option<Json<ReviewNotes>>,
) -> AppResult<Redirect> {
    let decision = review::parse_verdict(&verdict, body)?;
    let conn = &mut pool.get().await?;
    let event =
        review::review_event(conn, &hub, &mailer, &ctx, Reviewer::Admin, event_id, decision).await?;
    let notice = match (event.status, event.approved_by_admin) {
        (ReviewStatus::Approved, _) => "Event approved.",
        (ReviewStatus::Pending, true) => "Event approved and forwarded to the dean.",
        _ => "Event rejected.",
    };
    Ok(redirect_with_notice(&sessions, &ctx, "/admin/events", notice).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportEntry {
    #[serde(flatten)]
    report: EventReport,
    event_title: String,
}

#[derive(Serialize)]
struct ReportList {
    reports: Vec<ReportEntry>,
}

async fn reports(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    AdminOnly(ctx): AdminOnly,
) -> AppResult<Json<Page<ReportList>>> {
    let conn = &mut pool.get().await?;
    let reports = event_reports::table
        .inner_join(events::table)
        .order(event_reports::created_at.desc())
        .select((event_reports::all_columns, events::title))
        .load::<(EventReport, String)>(conn)
        .await?
        .into_iter()
        .map(|(report, event_title)| ReportEntry { report, event_title })
        .collect();
    Ok(Page::render(&sessions, &ctx, ReportList { reports }).await)
}

#[derive(Serialize)]
struct AuditPage {
    entries: Vec<AuditLog>,
}

async fn audit_log(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    AdminOnly(ctx): AdminOnly,
) -> AppResult<Json<Page<AuditPage>>> {
    let conn = &mut pool.get().await?;
    let entries = audit_logs::table
        .order(audit_logs::created_at.desc())
        .limit(AUDIT_PAGE)
        .load::<AuditLog>(conn)
        .await?;
    Ok(Page::render(&sessions, &ctx, AuditPage { entries }).await)
}

pub fn app() -> Router {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/club-requests", get(club_requests))
        .route("/club-requests/:id", get(club_request))
        .route("/club-requests/:id/:verdict", post(decide_club_request))
        .route("/posts", get(pending_posts))
        .route("/posts/:id/:verdict", post(decide_post))
        .route("/events", get(pending_events))
        .route("/events/:id/:verdict", post(decide_event))
        .route("/reports", get(reports))
        .route("/audit-log", get(audit_log))
}
