use super::{
    admin::{EventList, PendingEvent},
    redirect_with_notice,
    review::{self, ReviewNotes},
    Page,
};
use crate::{
    auth::DeanOnly,
    email::Mailer,
    error::AppResult,
    models::{ClubRequest, Event, RequestStatus, ReviewStatus},
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

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Dashboard {
    awaiting_club_requests: i64,
    awaiting_events: i64,
}

async fn dashboard(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    DeanOnly(ctx): DeanOnly,
) -> AppResult<Json<Page<Dashboard>>> {
    let conn = &mut pool.get().await?;
    let view = Dashboard {
        awaiting_club_requests: club_requests::table
            .filter(club_requests::status.eq(RequestStatus::AdminApproved))
            .count()
            .get_result(conn)
            .await?,
        awaiting_events: events::table
            .filter(events::status.eq(ReviewStatus::Pending))
            .filter(events::approved_by_admin.eq(true))
            .filter(events::approved_by_dean.eq(false))
            .count()
            .get_result(conn)
            .await?,
    };
    Ok(Page::render(&sessions, &ctx, view).await)
}

#[derive(Serialize)]
struct ClubRequestList {
    requests: Vec<ClubRequest>,
}

async fn club_requests(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    DeanOnly(ctx): DeanOnly,
) -> AppResult<Json<Page<ClubRequestList>>> {
    let conn = &mut pool.get().await?;
    let requests = club_requests::table
        .filter(club_requests::status.eq(RequestStatus::AdminApproved))
        .order(club_requests::admin_approval_date.asc())
        .load::<ClubRequest>(conn)
        .await?;
    Ok(Page::render(&sessions, &ctx, ClubRequestList { requests }).await)
}

async fn decide_club_request(
    Extension(pool): Extension<DbPool>,
    Extension(mailer): Extension<Mailer>,
    Extension(sessions): Extension<SessionStore>,
    DeanOnly(ctx): DeanOnly,
    Path((request_id, verdict)): Path<(i32, String)>,
    body: Option<Json<ReviewNotes>>,
) -> AppResult<Redirect> {
    let decision = review::parse_verdict(&verdict, body)?;
    let conn = &mut pool.get().await?;
    let outcome =
        review::review_club_request(conn, &mailer, &ctx, Reviewer::Dean, request_id, decision).await?;
    let notice = match outcome.status {
        RequestStatus::Approved => "Club approved and account created.",
        _ => "Club request rejected.",
    };
    Ok(redirect_with_notice(&sessions, &ctx, "/dean/club-requests", notice).await)
}

/// Academic events the admin has already approved.
async fn awaiting_events(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    DeanOnly(ctx): DeanOnly,
) -> AppResult<Json<Page<EventList>>> {
    let conn = &mut pool.get().await?;
    let events = events::table
        .inner_join(users::table)
        .filter(events::status.eq(ReviewStatus::Pending))
        .filter(events::approved_by_admin.eq(true))
        .filter(events::approved_by_dean.eq(false))
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
    DeanOnly(ctx): DeanOnly,
    Path((event_id, verdict)): Path<(i32, String)>,
    body: Option<Json<ReviewNotes>>,
) -> AppResult<Redirect> {
    let decision = review::parse_verdict(&verdict, body)?;
    let conn = &mut pool.get().await?;
    let event =
        review::review_event(conn, &hub, &mailer, &ctx, Reviewer::Dean, event_id, decision).await?;
    let notice = match event.status {
        ReviewStatus::Approved => "Event approved.",
        _ => "Event rejected.",
    };
    Ok(redirect_with_notice(&sessions, &ctx, "/dean/events", notice).await)
}

pub fn app() -> Router {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/club-requests", get(club_requests))
        .route("/club-requests/:id/:verdict", post(decide_club_request))
        .route("/events", get(awaiting_events))
        .route("/events/:id/:verdict", post(decide_event))
}
