use super::{redirect_with_notice, Page};
use crate::{
    auth::{ClubOnly, RequestContext},
    error::{AppError, AppResult},
    models::{
        Application, ApplicationStatus, Event, EventReport, Post, Profile, ReviewStatus, Role,
        RsvpStatus,
    },
    queries,
    schema::*,
    session::SessionStore,
    uploads::{classify, FormData, MediaKind, Uploads},
    DbPool,
};
use axum::{
    extract::{Multipart, Path},
    response::Redirect,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Accepts `datetime-local` input values, with or without seconds, and
/// plain dates (taken as midnight).
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn optional_datetime(form: &FormData, name: &str, label: &str) -> AppResult<Option<NaiveDateTime>> {
    match form.text(name) {
        Some(raw) => parse_datetime(raw)
            .map(Some)
            .ok_or_else(|| AppError::invalid(format!("{label} is not a valid date!"))),
        None => Ok(None),
    }
}

fn optional_count(form: &FormData, name: &str, label: &str) -> AppResult<Option<i32>> {
    match form.text(name) {
        Some(raw) => raw
            .parse::<i32>()
            .ok()
            .filter(|n| *n >= 0)
            .map(Some)
            .ok_or_else(|| AppError::invalid(format!("{label} must be a positive number!"))),
        None => Ok(None),
    }
}

/// Why a report cannot be filed for `event` right now, if anything.
pub fn report_blocker(event: &Event, now: NaiveDateTime, has_report: bool) -> Option<&'static str> {
    if event.status != ReviewStatus::Approved {
        Some("Only approved events can be reported.")
    } else if !event.has_elapsed(now) {
        Some("Reports can only be submitted after the event has ended.")
    } else if has_report {
        Some("A report has already been submitted for this event.")
    } else {
        None
    }
}

/// Posts carry at most one image or video; anything else is refused before
/// it reaches the uploads directory.
pub fn post_media_kind(bytes: &[u8]) -> AppResult<MediaKind> {
    match classify(bytes) {
        MediaKind::Document => Err(AppError::invalid("Only images or videos can be attached to a post!")),
        kind => Ok(kind),
    }
}

/// Why `event` may not be deleted, if anything. An event whose report is due
/// stays, so deleting it cannot lift the block on new proposals.
pub fn deletion_blocker(event: &Event, now: NaiveDateTime, has_report: bool) -> Option<&'static str> {
    if has_report {
        Some("Events with a submitted report cannot be deleted.")
    } else if event.status == ReviewStatus::Approved && event.has_elapsed(now) {
        Some("Submit the report for this event before deleting it.")
    } else {
        None
    }
}

async fn owned_event(conn: &mut AsyncPgConnection, club_id: i32, event_id: i32) -> AppResult<Event> {
    events::table
        .find(event_id)
        .filter(events::club_id.eq(club_id))
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Event"))
}

async fn find_report(conn: &mut AsyncPgConnection, event_id: i32) -> AppResult<Option<EventReport>> {
    Ok(event_reports::table
        .filter(event_reports::event_id.eq(event_id))
        .first::<EventReport>(conn)
        .await
        .optional()?)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventSummary {
    id: i32,
    title: String,
    starts_at: Option<NaiveDateTime>,
    ends_at: Option<NaiveDateTime>,
}

impl From<Event> for EventSummary {
    fn from(e: Event) -> Self {
        EventSummary {
            id: e.id,
            title: e.title,
            starts_at: e.starts_at,
            ends_at: e.ends_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClubView {
    id: i32,
    username: String,
    profile: Profile,
    subscribers: i64,
    /// Whether the viewing student subscribes to this club.
    subscribed: Option<bool>,
    posts: Vec<Post>,
    events: Vec<Event>,
    /// Owner only.
    events_needing_report: Option<Vec<EventSummary>>,
}

async fn profile(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ctx: RequestContext,
    Path(club_id): Path<i32>,
) -> AppResult<Json<Page<ClubView>>> {
    let conn = &mut pool.get().await?;
    let club = queries::user_with_role(conn, club_id, Role::Club, "Club").await?;
    let owner = ctx.id() == club.id;

    let mut posts = posts::table
        .filter(posts::club_id.eq(club.id))
        .order(posts::created_at.desc())
        .into_boxed();
    let mut events = events::table
        .filter(events::club_id.eq(club.id))
        .order(events::starts_at.asc())
        .into_boxed();
    if !owner {
        posts = posts.filter(posts::status.eq(ReviewStatus::Approved));
        events = events.filter(events::status.eq(ReviewStatus::Approved));
    }
    let posts = posts.load::<Post>(conn).await?;
    let events = events.load::<Event>(conn).await?;

    let subscribers = subscriptions::table
        .filter(subscriptions::club_id.eq(club.id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    let subscribed = match ctx.role() {
        Role::Student => Some(queries::is_subscribed(conn, ctx.id(), club.id).await?),
        _ => None,
    };
    let events_needing_report = if owner {
        let pending = queries::events_needing_report(conn, club.id, Utc::now().naive_utc()).await?;
        Some(pending.into_iter().map(EventSummary::from).collect())
    } else {
        None
    };

    let view = ClubView {
        id: club.id,
        profile: club.profile()?,
        username: club.username,
        subscribers,
        subscribed,
        posts,
        events,
        events_needing_report,
    };
    Ok(Page::render(&sessions, &ctx, view).await)
}

async fn create_post(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    Extension(uploads): Extension<Uploads>,
    ClubOnly(ctx): ClubOnly,
    Path(club_id): Path<i32>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    ctx.ensure_self(club_id)?;
    let form = FormData::read(multipart).await?;
    let text = form.text("content").map(str::to_string);
    let media = form.file("media");
    if text.is_none() && media.is_none() {
        return Err(AppError::invalid("Post cannot be empty!"));
    }

    let (mut image, mut video) = (None, None);
    if let Some(file) = media {
        let kind = post_media_kind(&file.bytes)?;
        let path = uploads.store(file).await?.path;
        match kind {
            MediaKind::Video => video = Some(path),
            _ => image = Some(path),
        }
    }
    let stored: Vec<String> = image.iter().chain(video.iter()).cloned().collect();

    let conn = &mut pool.get().await?;
    let post = match diesel::insert_into(posts::table)
        .values((
            posts::club_id.eq(club_id),
            posts::text.eq(text),
            posts::image.eq(image),
            posts::video.eq(video),
        ))
        .get_result::<Post>(conn)
        .await
    {
        Ok(post) => post,
        Err(e) => {
            uploads.discard(&stored).await;
            return Err(e.into());
        }
    };
    tracing::info!(post = post.id, club = club_id, "post submitted");

    Ok(redirect_with_notice(&sessions, &ctx, &format!("/club/{club_id}"), "Post submitted for review.").await)
}

async fn delete_post(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ClubOnly(ctx): ClubOnly,
    Path((club_id, post_id)): Path<(i32, i32)>,
) -> AppResult<Redirect> {
    ctx.ensure_self(club_id)?;
    let conn = &mut pool.get().await?;
    let deleted = diesel::delete(
        posts::table
            .filter(posts::id.eq(post_id))
            .filter(posts::club_id.eq(club_id)),
    )
    .execute(conn)
    .await?;
    if deleted == 0 {
        return Err(AppError::not_found("Post"));
    }
    Ok(redirect_with_notice(&sessions, &ctx, &format!("/club/{club_id}"), "Post deleted.").await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewEventView {
    can_create: bool,
    events_needing_report: Vec<EventSummary>,
}

async fn new_event(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ClubOnly(ctx): ClubOnly,
    Path(club_id): Path<i32>,
) -> AppResult<Json<Page<NewEventView>>> {
    ctx.ensure_self(club_id)?;
    let conn = &mut pool.get().await?;
    let blocking = queries::events_needing_report(conn, club_id, Utc::now().naive_utc()).await?;
    let view = NewEventView {
        can_create: blocking.is_empty(),
        events_needing_report: blocking.into_iter().map(EventSummary::from).collect(),
    };
    Ok(Page::render(&sessions, &ctx, view).await)
}

async fn create_event(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    Extension(uploads): Extension<Uploads>,
    ClubOnly(ctx): ClubOnly,
    Path(club_id): Path<i32>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    ctx.ensure_self(club_id)?;
    let form = FormData::read(multipart).await?;

    let title = form.required("title", "Title")?;
    let starts_at = optional_datetime(&form, "startsAt", "Start time")?;
    let ends_at = optional_datetime(&form, "endsAt", "End time")?;
    if let (Some(start), Some(end)) = (starts_at, ends_at) {
        if end < start {
            return Err(AppError::invalid("End time must be after the start time!"));
        }
    }
    let capacity = optional_count(&form, "capacity", "Capacity")?;
    let expected_attendance = optional_count(&form, "expectedAttendance", "Expected attendance")?;

    let conn = &mut pool.get().await?;
    let blocking = queries::events_needing_report(conn, club_id, Utc::now().naive_utc()).await?;
    if !blocking.is_empty() {
        return Err(AppError::invalid(format!(
            "Please submit reports for your past events before creating a new one: {}",
            blocking.iter().map(|e| &e.title).join(", ")
        )));
    }

    let attachments = uploads.store_all(&form, "attachments").await?;
    let stored = attachments.clone();
    let text = |name: &str| form.text(name).map(str::to_string);
    let inserted = diesel::insert_into(events::table)
        .values((
            events::club_id.eq(club_id),
            events::title.eq(&title),
            events::description.eq(text("description")),
            events::location.eq(text("location")),
            events::starts_at.eq(starts_at),
            events::ends_at.eq(ends_at),
            events::capacity.eq(capacity),
            events::organizer_name.eq(text("organizerName")),
            events::expected_attendance.eq(expected_attendance),
            events::budget.eq(text("budget")),
            events::requirements.eq(text("requirements")),
            events::attachments.eq(attachments),
        ))
        .get_result::<Event>(conn)
        .await;
    let event = match inserted {
        Ok(event) => event,
        Err(e) => {
            uploads.discard(&stored).await;
            return Err(e.into());
        }
    };
    tracing::info!(event = event.id, club = club_id, "event submitted");

    Ok(redirect_with_notice(
        &sessions,
        &ctx,
        &format!("/club/{club_id}"),
        "Event submitted for approval.",
    )
    .await)
}

async fn delete_event(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ClubOnly(ctx): ClubOnly,
    Path((club_id, event_id)): Path<(i32, i32)>,
) -> AppResult<Redirect> {
    ctx.ensure_self(club_id)?;
    let conn = &mut pool.get().await?;
    let event = conn
        .transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let event = events::table
                    .find(event_id)
                    .filter(events::club_id.eq(club_id))
                    .for_update()
                    .first::<Event>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("Event"))?;
                let has_report = find_report(conn, event.id).await?.is_some();
                if let Some(reason) = deletion_blocker(&event, Utc::now().naive_utc(), has_report) {
                    return Err(AppError::conflict(reason));
                }

                diesel::delete(rsvps::table.filter(rsvps::event_id.eq(event.id)))
                    .execute(conn)
                    .await?;
                diesel::delete(events::table.find(event.id))
                    .execute(conn)
                    .await?;
                Ok(event)
            })
        })
        .await?;
    tracing::info!(event = event.id, club = club_id, "event deleted");

    Ok(redirect_with_notice(&sessions, &ctx, &format!("/club/{club_id}"), "Event deleted.").await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportFormView {
    event: Event,
    club_name: String,
    /// Set once the report exists.
    report: Option<EventReport>,
}

async fn report_form(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ClubOnly(ctx): ClubOnly,
    Path((club_id, event_id)): Path<(i32, i32)>,
) -> AppResult<Json<Page<ReportFormView>>> {
    ctx.ensure_self(club_id)?;
    let conn = &mut pool.get().await?;
    let event = owned_event(conn, club_id, event_id).await?;
    let report = find_report(conn, event.id).await?;
    if report.is_none() {
        if let Some(reason) = report_blocker(&event, Utc::now().naive_utc(), false) {
            return Err(AppError::invalid(reason));
        }
    }

    let view = ReportFormView {
        event,
        club_name: ctx.user.username.clone(),
        report,
    };
    Ok(Page::render(&sessions, &ctx, view).await)
}

async fn submit_report(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    Extension(uploads): Extension<Uploads>,
    ClubOnly(ctx): ClubOnly,
    Path((club_id, event_id)): Path<(i32, i32)>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    #[derive(Insertable)]
    #[diesel(table_name = event_reports)]
    struct NewEventReport {
        event_id: i32,
        club_id: i32,
        club_name: String,
        faculty_adviser_name: String,
        activity_title: String,
        activity_date: NaiveDateTime,
        activity_location: String,
        purpose_of_activity: String,
        activity_description: String,
        managing_students: String,
        participating_students: String,
        number_of_attendance: i32,
        evaluation_results: String,
        recommendations: String,
        photos: Vec<String>,
        attendance_sheet: Vec<String>,
        receipts_and_liquidation: Vec<String>,
        activity_proposal: Vec<String>,
        supporting_documents: Vec<String>,
    }

    ctx.ensure_self(club_id)?;
    let form = FormData::read(multipart).await?;

    let conn = &mut pool.get().await?;
    let event = owned_event(conn, club_id, event_id).await?;
    let has_report = find_report(conn, event.id).await?.is_some();
    if let Some(reason) = report_blocker(&event, Utc::now().naive_utc(), has_report) {
        return Err(AppError::invalid(reason));
    }

    let activity_date = match optional_datetime(&form, "activityDate", "Activity date")? {
        Some(date) => date,
        None => event
            .starts_at
            .ok_or_else(|| AppError::invalid("Activity date is required!"))?,
    };
    let number_of_attendance = optional_count(&form, "numberOfAttendance", "Number of attendance")?
        .ok_or_else(|| AppError::invalid("Number of attendance is required!"))?;
    let report = NewEventReport {
        event_id: event.id,
        club_id,
        club_name: ctx.user.username.clone(),
        faculty_adviser_name: form.required("facultyAdviserName", "Faculty adviser name")?,
        activity_title: form
            .text("activityTitle")
            .map(str::to_string)
            .unwrap_or_else(|| event.title.clone()),
        activity_date,
        activity_location: match form.text("activityLocation") {
            Some(location) => location.to_string(),
            None => event
                .location
                .clone()
                .ok_or_else(|| AppError::invalid("Activity location is required!"))?,
        },
        purpose_of_activity: form.required("purposeOfActivity", "Purpose of activity")?,
        activity_description: form.required("activityDescription", "Activity description")?,
        managing_students: form.required("managingStudents", "Managing students")?,
        participating_students: form.required("participatingStudents", "Participating students")?,
        number_of_attendance,
        evaluation_results: form.required("evaluationResults", "Evaluation results")?,
        recommendations: form.required("recommendations", "Recommendations")?,
        photos: uploads.store_all(&form, "photos").await?,
        attendance_sheet: uploads.store_all(&form, "attendanceSheet").await?,
        receipts_and_liquidation: uploads.store_all(&form, "receiptsAndLiquidation").await?,
        activity_proposal: uploads.store_all(&form, "activityProposal").await?,
        supporting_documents: uploads.store_all(&form, "supportingDocuments").await?,
    };

    let stored: Vec<String> = [
        &report.photos,
        &report.attendance_sheet,
        &report.receipts_and_liquidation,
        &report.activity_proposal,
        &report.supporting_documents,
    ]
    .into_iter()
    .flatten()
    .cloned()
    .collect();

    let inserted = diesel::insert_into(event_reports::table)
        .values(report)
        .on_conflict(event_reports::event_id)
        .do_nothing()
        .execute(conn)
        .await;
    match inserted {
        Ok(0) => {
            uploads.discard(&stored).await;
            return Err(AppError::invalid("A report has already been submitted for this event."));
        }
        Ok(_) => {}
        Err(e) => {
            uploads.discard(&stored).await;
            return Err(e.into());
        }
    }
    tracing::info!(event = event.id, club = club_id, "event report submitted");

    Ok(redirect_with_notice(&sessions, &ctx, &format!("/club/{club_id}"), "Report submitted.").await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Attendee {
    student_id: i32,
    name: String,
    email: String,
    status: RsvpStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RsvpList {
    event_id: i32,
    capacity: Option<i32>,
    going: usize,
    rsvps: Vec<Attendee>,
}

async fn event_rsvps(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ClubOnly(ctx): ClubOnly,
    Path((club_id, event_id)): Path<(i32, i32)>,
) -> AppResult<Json<Page<RsvpList>>> {
    ctx.ensure_self(club_id)?;
    let conn = &mut pool.get().await?;
    let event = owned_event(conn, club_id, event_id).await?;

    let rsvps = rsvps::table
        .inner_join(users::table.on(users::id.eq(rsvps::student_id)))
        .filter(rsvps::event_id.eq(event.id))
        .order(rsvps::created_at.asc())
        .select((users::id, users::username, users::email, rsvps::status))
        .load::<(i32, String, String, RsvpStatus)>(conn)
        .await?
        .into_iter()
        .map(|(student_id, name, email, status)| Attendee {
            student_id,
            name,
            email,
            status,
        })
        .collect::<Vec<_>>();

    let view = RsvpList {
        event_id: event.id,
        capacity: event.capacity,
        going: rsvps.iter().filter(|r| r.status == RsvpStatus::Going).count(),
        rsvps,
    };
    Ok(Page::render(&sessions, &ctx, view).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Subscriber {
    student_id: i32,
    name: String,
    email: String,
    subscribed_at: NaiveDateTime,
}

#[derive(Serialize)]
struct SubscriberList {
    subscribers: Vec<Subscriber>,
}

async fn subscribers(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ClubOnly(ctx): ClubOnly,
    Path(club_id): Path<i32>,
) -> AppResult<Json<Page<SubscriberList>>> {
    ctx.ensure_self(club_id)?;
    let conn = &mut pool.get().await?;
    let subscribers = subscriptions::table
        .inner_join(users::table.on(users::id.eq(subscriptions::student_id)))
        .filter(subscriptions::club_id.eq(club_id))
        .order(subscriptions::created_at.desc())
        .select((users::id, users::username, users::email, subscriptions::created_at))
        .load::<(i32, String, String, NaiveDateTime)>(conn)
        .await?
        .into_iter()
        .map(|(student_id, name, email, subscribed_at)| Subscriber {
            student_id,
            name,
            email,
            subscribed_at,
        })
        .collect();
    Ok(Page::render(&sessions, &ctx, SubscriberList { subscribers }).await)
}

#[derive(Serialize)]
struct ApplicationList {
    applications: Vec<Application>,
}

async fn applications(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ClubOnly(ctx): ClubOnly,
    Path(club_id): Path<i32>,
) -> AppResult<Json<Page<ApplicationList>>> {
    ctx.ensure_self(club_id)?;
    let conn = &mut pool.get().await?;
    let applications = applications::table
        .filter(applications::club_id.eq(club_id))
        .filter(applications::status.eq(ApplicationStatus::Pending))
        .order(applications::updated_at.asc())
        .load::<Application>(conn)
        .await?;
    Ok(Page::render(&sessions, &ctx, ApplicationList { applications }).await)
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ClubNotes {
    club_notes: Option<String>,
}

async fn decide_application(
    conn: &mut AsyncPgConnection,
    club_id: i32,
    app_id: i32,
    status: ApplicationStatus,
    notes: Option<String>,
) -> AppResult<Application> {
    diesel::update(applications::table.find(app_id))
        .filter(applications::club_id.eq(club_id))
        .filter(applications::status.eq(ApplicationStatus::Pending))
        .set((
            applications::status.eq(status),
            applications::club_notes.eq(notes),
            applications::updated_at.eq(diesel::dsl::now),
        ))
        .get_result::<Application>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Pending application"))
}

async fn accept_application(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ClubOnly(ctx): ClubOnly,
    Path((club_id, app_id)): Path<(i32, i32)>,
) -> AppResult<Redirect> {
    ctx.ensure_self(club_id)?;
    let conn = &mut pool.get().await?;
    let application =
        decide_application(conn, club_id, app_id, ApplicationStatus::Accepted, None).await?;

    // members always follow the club
    diesel::insert_into(subscriptions::table)
        .values((
            subscriptions::student_id.eq(application.student_id),
            subscriptions::club_id.eq(club_id),
        ))
        .on_conflict((subscriptions::student_id, subscriptions::club_id))
        .do_nothing()
        .execute(conn)
        .await?;
    tracing::info!(application = app_id, club = club_id, "application accepted");

    Ok(redirect_with_notice(
        &sessions,
        &ctx,
        &format!("/club/{club_id}/applications"),
        "Application accepted.",
    )
    .await)
}

async fn reject_application(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ClubOnly(ctx): ClubOnly,
    Path((club_id, app_id)): Path<(i32, i32)>,
    body: Option<Json<ClubNotes>>,
) -> AppResult<Redirect> {
    ctx.ensure_self(club_id)?;
    let notes = body
        .map(|Json(b)| b)
        .unwrap_or_default()
        .club_notes
        .map(|n| n.trim().to_string());
    let conn = &mut pool.get().await?;
    decide_application(conn, club_id, app_id, ApplicationStatus::Rejected, notes).await?;

    Ok(redirect_with_notice(
        &sessions,
        &ctx,
        &format!("/club/{club_id}/applications"),
        "Application rejected.",
    )
    .await)
}

pub fn app() -> Router {
    Router::new()
        .route("/:id", get(profile))
        .route("/:id/posts", post(create_post))
        .route("/:id/posts/:post_id/delete", post(delete_post))
        .route("/:id/events", post(create_event))
        .route("/:id/new-event", get(new_event))
        .route("/:id/events/:event_id/delete", post(delete_event))
        .route("/:id/events/:event_id/report", get(report_form).post(submit_report))
        .route("/:id/events/:event_id/rsvps", get(event_rsvps))
        .route("/:id/subscribers", get(subscribers))
        .route("/:id/applications", get(applications))
        .route("/:id/applications/:app_id/accept", post(accept_application))
        .route("/:id/applications/:app_id/reject", post(reject_application))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    fn event(status: ReviewStatus, ends_at: Option<NaiveDateTime>) -> Event {
        Event {
            id: 1,
            club_id: 2,
            title: "Robotics Workshop".into(),
            description: None,
            location: Some("Hall B".into()),
            starts_at: Some(at(10, 9)),
            ends_at,
            capacity: Some(30),
            organizer_name: None,
            expected_attendance: None,
            budget: None,
            requirements: None,
            attachments: vec![],
            approved_by_admin: status == ReviewStatus::Approved,
            approved_by_dean: status == ReviewStatus::Approved,
            status,
            admin_notes: None,
            dean_notes: None,
            created_at: at(1, 0),
            updated_at: at(1, 0),
        }
    }

    #[test]
    fn parses_form_datetimes() {
        assert_eq!(parse_datetime("2024-05-10T09:00"), Some(at(10, 9)));
        assert_eq!(parse_datetime("2024-05-10 09:00:00"), Some(at(10, 9)));
        assert_eq!(parse_datetime("2024-05-10"), Some(at(10, 0)));
        assert_eq!(parse_datetime("next friday"), None);
    }

    #[test]
    fn reports_wait_for_the_event_to_end() {
        let e = event(ReviewStatus::Approved, Some(at(10, 17)));
        assert!(report_blocker(&e, at(10, 12), false).is_some());
        assert_eq!(report_blocker(&e, at(11, 0), false), None);
    }

    #[test]
    fn reports_are_filed_once_for_approved_events() {
        let e = event(ReviewStatus::Approved, Some(at(10, 17)));
        assert_eq!(
            report_blocker(&e, at(11, 0), true),
            Some("A report has already been submitted for this event.")
        );
        let pending = event(ReviewStatus::Pending, Some(at(10, 17)));
        assert_eq!(
            report_blocker(&pending, at(11, 0), false),
            Some("Only approved events can be reported.")
        );
    }

    #[test]
    fn deletion_waits_on_the_report() {
        let upcoming = event(ReviewStatus::Approved, Some(at(20, 17)));
        assert_eq!(deletion_blocker(&upcoming, at(11, 0), false), None);

        let rejected = event(ReviewStatus::Rejected, Some(at(10, 17)));
        assert_eq!(deletion_blocker(&rejected, at(11, 0), false), None);

        let over = event(ReviewStatus::Approved, Some(at(10, 17)));
        assert_eq!(
            deletion_blocker(&over, at(11, 0), false),
            Some("Submit the report for this event before deleting it.")
        );
        assert_eq!(
            deletion_blocker(&over, at(11, 0), true),
            Some("Events with a submitted report cannot be deleted.")
        );
    }

    #[test]
    fn an_unreported_event_blocks_new_proposals_until_reported() {
        let now = at(11, 0);
        let over = event(ReviewStatus::Approved, Some(at(10, 17)));

        // no report yet: new proposals are held and the event cannot be deleted
        let blocking = queries::unreported_elapsed(vec![(over.clone(), None)], now);
        assert_eq!(blocking.len(), 1);
        assert!(deletion_blocker(&over, now, false).is_some());
        assert_eq!(report_blocker(&over, now, false), None);

        // reported: proposals open up again, the event stays and is not reported twice
        let blocking = queries::unreported_elapsed(vec![(over.clone(), Some(7))], now);
        assert!(blocking.is_empty());
        assert!(deletion_blocker(&over, now, true).is_some());
        assert_eq!(
            report_blocker(&over, now, true),
            Some("A report has already been submitted for this event.")
        );
    }

    #[test]
    fn posts_only_take_images_or_videos() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
        assert_eq!(post_media_kind(&png).ok(), Some(MediaKind::Image));
        assert!(post_media_kind(b"%PDF-1.7 minutes").is_err());
    }
}
