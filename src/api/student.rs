use super::{redirect_with_notice, Page};
use crate::{
    auth::{RequestContext, StudentOnly},
    email::Mailer,
    error::{AppError, AppResult},
    models::{
        AcademicYear, Application, ApplicationStatus, Event, Gender, Post, Profile, ReviewStatus,
        Role, Rsvp, RsvpStatus, User,
    },
    queries,
    realtime::{Hub, Outgoing, Topic},
    schema::*,
    session::SessionStore,
    DbPool,
};
use axum::{
    extract::Path,
    response::Redirect,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const FEED_SIZE: i64 = 100;

/// Whether one more "going" RSVP fits. Unlimited when no capacity is set.
pub fn has_room(capacity: Option<i32>, others_going: i64) -> bool {
    capacity.map_or(true, |cap| others_going < i64::from(cap))
}

/// A student may apply unless an open or accepted application exists.
/// Rejected applications are replaced by the new one.
pub fn may_apply(existing: Option<ApplicationStatus>) -> Result<(), &'static str> {
    match existing {
        None | Some(ApplicationStatus::Rejected) => Ok(()),
        Some(ApplicationStatus::Pending) => Err("You have already applied to this club!"),
        Some(ApplicationStatus::Accepted) => Err("You are already a member of this club!"),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedPost {
    #[serde(flatten)]
    post: Post,
    club_name: String,
    subscribed: bool,
}

#[derive(Serialize)]
struct Feed {
    posts: Vec<FeedPost>,
}

async fn home(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    StudentOnly(ctx): StudentOnly,
    Path(student_id): Path<i32>,
) -> AppResult<Json<Page<Feed>>> {
    ctx.ensure_self(student_id)?;
    let conn = &mut pool.get().await?;

    let subscribed = queries::subscribed_club_ids(conn, student_id).await?;
    let posts = posts::table
        .inner_join(users::table)
        .filter(posts::status.eq(ReviewStatus::Approved))
        .order(posts::created_at.desc())
        .limit(FEED_SIZE)
        .select((posts::all_columns, users::username))
        .load::<(Post, String)>(conn)
        .await?
        .into_iter()
        .map(|(post, club_name)| FeedPost {
            subscribed: subscribed.contains(&post.club_id),
            post,
            club_name,
        })
        .collect();

    Ok(Page::render(&sessions, &ctx, Feed { posts }).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClubSummary {
    id: i32,
    club_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentView {
    id: i32,
    username: String,
    profile: Profile,
    /// Only shown to the student themself.
    subscriptions: Option<Vec<ClubSummary>>,
}

async fn profile(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    ctx: RequestContext,
    Path(student_id): Path<i32>,
) -> AppResult<Json<Page<StudentView>>> {
    let conn = &mut pool.get().await?;
    let student = queries::user_with_role(conn, student_id, Role::Student, "Student").await?;

    let subscriptions = if ctx.id() == student.id {
        let clubs = subscriptions::table
            .inner_join(users::table.on(users::id.eq(subscriptions::club_id)))
            .filter(subscriptions::student_id.eq(student.id))
            .order(users::username.asc())
            .select((users::id, users::username))
            .load::<(i32, String)>(conn)
            .await?;
        Some(
            clubs
                .into_iter()
                .map(|(id, club_name)| ClubSummary { id, club_name })
                .collect(),
        )
    } else {
        None
    };

    let view = StudentView {
        id: student.id,
        profile: student.profile()?,
        username: student.username,
        subscriptions,
    };
    Ok(Page::render(&sessions, &ctx, view).await)
}

async fn subscribe(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    StudentOnly(ctx): StudentOnly,
    Path((student_id, club_id)): Path<(i32, i32)>,
) -> AppResult<Redirect> {
    ctx.ensure_self(student_id)?;
    let conn = &mut pool.get().await?;
    queries::user_with_role(conn, club_id, Role::Club, "Club").await?;

    let inserted = diesel::insert_into(subscriptions::table)
        .values((
            subscriptions::student_id.eq(student_id),
            subscriptions::club_id.eq(club_id),
        ))
        .on_conflict((subscriptions::student_id, subscriptions::club_id))
        .do_nothing()
        .execute(conn)
        .await?;

    let notice = if inserted > 0 {
        "Subscribed!"
    } else {
        "You are already subscribed."
    };
    Ok(redirect_with_notice(&sessions, &ctx, &format!("/club/{club_id}"), notice).await)
}

async fn unsubscribe(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    Extension(hub): Extension<Hub>,
    StudentOnly(ctx): StudentOnly,
    Path((student_id, club_id)): Path<(i32, i32)>,
) -> AppResult<Redirect> {
    ctx.ensure_self(student_id)?;
    let conn = &mut pool.get().await?;

    diesel::delete(
        subscriptions::table
            .filter(subscriptions::student_id.eq(student_id))
            .filter(subscriptions::club_id.eq(club_id)),
    )
    .execute(conn)
    .await?;

    // open sockets of this student stop forwarding the club's room
    let topic = Topic::User(student_id);
    hub.publish(
        topic,
        Outgoing::Unsubscribed {
            topic: topic.to_string(),
            club_id,
        },
    )
    .await;

    Ok(redirect_with_notice(&sessions, &ctx, &format!("/club/{club_id}"), "Unsubscribed.").await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplyView {
    club_id: i32,
    club_name: String,
    existing: Option<Application>,
}

async fn existing_application(
    conn: &mut diesel_async::AsyncPgConnection,
    student_id: i32,
    club_id: i32,
) -> AppResult<Option<Application>> {
    Ok(applications::table
        .filter(applications::student_id.eq(student_id))
        .filter(applications::club_id.eq(club_id))
        .first::<Application>(conn)
        .await
        .optional()?)
}

async fn application_form(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    StudentOnly(ctx): StudentOnly,
    Path((student_id, club_id)): Path<(i32, i32)>,
) -> AppResult<Json<Page<ApplyView>>> {
    ctx.ensure_self(student_id)?;
    let conn = &mut pool.get().await?;
    let club = queries::user_with_role(conn, club_id, Role::Club, "Club").await?;
    let existing = existing_application(conn, student_id, club_id).await?;

    let view = ApplyView {
        club_id: club.id,
        club_name: club.username,
        existing,
    };
    Ok(Page::render(&sessions, &ctx, view).await)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationForm {
    gender: Gender,
    major: String,
    academic_year: AcademicYear,
    skills: String,
    motivation: String,
    message: Option<String>,
}

async fn apply(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    StudentOnly(ctx): StudentOnly,
    Path((student_id, club_id)): Path<(i32, i32)>,
    Json(form): Json<ApplicationForm>,
) -> AppResult<Redirect> {
    ctx.ensure_self(student_id)?;
    let major = form.major.trim().to_string();
    let skills = form.skills.trim().to_string();
    let motivation = form.motivation.trim().to_string();
    if major.is_empty() || skills.is_empty() || motivation.is_empty() {
        return Err(AppError::invalid("Please fill in all required fields!"));
    }
    let message = form
        .message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());

    let conn = &mut pool.get().await?;
    queries::user_with_role(conn, club_id, Role::Club, "Club").await?;
    let student = users::table.find(student_id).first::<User>(conn).await?;
    let student_name = match student.profile()? {
        Profile::Student(p) if !p.full_name.is_empty() => p.full_name,
        _ => student.username.clone(),
    };

    let existing = existing_application(conn, student_id, club_id).await?;
    may_apply(existing.as_ref().map(|a| a.status)).map_err(AppError::invalid)?;

    // best effort: two concurrent submissions are settled by the unique index
    let written = match existing {
        Some(rejected) => {
            diesel::update(applications::table.find(rejected.id))
                .filter(applications::status.eq(ApplicationStatus::Rejected))
                .set((
                    applications::email.eq(&student.email),
                    applications::student_name.eq(&student_name),
                    applications::gender.eq(form.gender),
                    applications::major.eq(&major),
                    applications::academic_year.eq(form.academic_year),
                    applications::skills.eq(&skills),
                    applications::motivation.eq(&motivation),
                    applications::message.eq(message.clone()),
                    applications::status.eq(ApplicationStatus::Pending),
                    applications::club_notes.eq(None::<String>),
                    applications::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)
                .await?
        }
        None => {
            diesel::insert_into(applications::table)
                .values((
                    applications::club_id.eq(club_id),
                    applications::student_id.eq(student_id),
                    applications::email.eq(&student.email),
                    applications::student_name.eq(&student_name),
                    applications::gender.eq(form.gender),
                    applications::major.eq(&major),
                    applications::academic_year.eq(form.academic_year),
                    applications::skills.eq(&skills),
                    applications::motivation.eq(&motivation),
                    applications::message.eq(message.clone()),
                ))
                .on_conflict((applications::student_id, applications::club_id))
                .do_nothing()
                .execute(conn)
                .await?
        }
    };
    if written == 0 {
        return Err(AppError::invalid("You have already applied to this club!"));
    }

    tracing::info!(student = student_id, club = club_id, "application submitted");
    Ok(redirect_with_notice(
        &sessions,
        &ctx,
        &format!("/student/{student_id}/applications"),
        "Your application has been submitted!",
    )
    .await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationEntry {
    #[serde(flatten)]
    application: Application,
    club_name: String,
}

#[derive(Serialize)]
struct ApplicationList {
    applications: Vec<ApplicationEntry>,
}

async fn applications(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    StudentOnly(ctx): StudentOnly,
    Path(student_id): Path<i32>,
) -> AppResult<Json<Page<ApplicationList>>> {
    ctx.ensure_self(student_id)?;
    let conn = &mut pool.get().await?;
    let applications = applications::table
        .inner_join(users::table.on(users::id.eq(applications::club_id)))
        .filter(applications::student_id.eq(student_id))
        .order(applications::updated_at.desc())
        .select((applications::all_columns, users::username))
        .load::<(Application, String)>(conn)
        .await?
        .into_iter()
        .map(|(application, club_name)| ApplicationEntry {
            application,
            club_name,
        })
        .collect();
    Ok(Page::render(&sessions, &ctx, ApplicationList { applications }).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventEntry {
    #[serde(flatten)]
    event: Event,
    club_name: String,
    going: i64,
    my_rsvp: Option<RsvpStatus>,
}

#[derive(Serialize)]
struct EventList {
    events: Vec<EventEntry>,
}

async fn events(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    StudentOnly(ctx): StudentOnly,
    Path(student_id): Path<i32>,
) -> AppResult<Json<Page<EventList>>> {
    ctx.ensure_self(student_id)?;
    let conn = &mut pool.get().await?;
    let now = Utc::now().naive_utc();

    let upcoming = events::table
        .inner_join(users::table)
        .filter(events::status.eq(ReviewStatus::Approved))
        .order(events::starts_at.asc())
        .select((events::all_columns, users::username))
        .load::<(Event, String)>(conn)
        .await?
        .into_iter()
        .filter(|(event, _)| !event.has_elapsed(now))
        .collect::<Vec<_>>();
    let ids = upcoming.iter().map(|(e, _)| e.id).collect::<Vec<_>>();

    let going = rsvps::table
        .filter(rsvps::event_id.eq_any(&ids))
        .filter(rsvps::status.eq(RsvpStatus::Going))
        .group_by(rsvps::event_id)
        .select((rsvps::event_id, diesel::dsl::count_star()))
        .load::<(i32, i64)>(conn)
        .await?
        .into_iter()
        .collect::<HashMap<_, _>>();
    let mine = rsvps::table
        .filter(rsvps::event_id.eq_any(&ids))
        .filter(rsvps::student_id.eq(student_id))
        .load::<Rsvp>(conn)
        .await?
        .into_iter()
        .map(|r| (r.event_id, r.status))
        .collect::<HashMap<_, _>>();

    let events = upcoming
        .into_iter()
        .map(|(event, club_name)| EventEntry {
            going: going.get(&event.id).copied().unwrap_or(0),
            my_rsvp: mine.get(&event.id).copied(),
            event,
            club_name,
        })
        .collect();
    Ok(Page::render(&sessions, &ctx, EventList { events }).await)
}

#[derive(Deserialize)]
struct RsvpRequest {
    status: RsvpStatus,
}

async fn rsvp(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    Extension(mailer): Extension<Mailer>,
    StudentOnly(ctx): StudentOnly,
    Path((student_id, event_id)): Path<(i32, i32)>,
    Json(req): Json<RsvpRequest>,
) -> AppResult<Redirect> {
    ctx.ensure_self(student_id)?;
    let conn = &mut pool.get().await?;

    let event = events::table
        .find(event_id)
        .filter(events::status.eq(ReviewStatus::Approved))
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Event"))?;
    if event.has_elapsed(Utc::now().naive_utc()) {
        return Err(AppError::invalid("This event has already taken place."));
    }

    // checked outside a transaction: concurrent RSVPs can overshoot the cap
    if req.status == RsvpStatus::Going {
        let others_going = rsvps::table
            .filter(rsvps::event_id.eq(event.id))
            .filter(rsvps::status.eq(RsvpStatus::Going))
            .filter(rsvps::student_id.ne(student_id))
            .count()
            .get_result::<i64>(conn)
            .await?;
        if !has_room(event.capacity, others_going) {
            return Err(AppError::invalid("Sorry, this event is full!"));
        }
    }

    diesel::insert_into(rsvps::table)
        .values((
            rsvps::student_id.eq(student_id),
            rsvps::event_id.eq(event.id),
            rsvps::status.eq(req.status),
        ))
        .on_conflict((rsvps::student_id, rsvps::event_id))
        .do_update()
        .set((
            rsvps::status.eq(req.status),
            rsvps::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;

    if req.status == RsvpStatus::Going {
        mailer.send_rsvp_confirmation(&ctx.user.email, &event);
    }
    let notice = match req.status {
        RsvpStatus::Going => "RSVP confirmed!",
        RsvpStatus::Interested => "Marked as interested.",
        RsvpStatus::NotGoing => "RSVP updated.",
    };
    Ok(redirect_with_notice(&sessions, &ctx, &format!("/student/{student_id}/events"), notice).await)
}

pub fn app() -> Router {
    Router::new()
        .route("/:id", get(profile))
        .route("/:id/home", get(home))
        .route("/:id/subscribe/:club_id", post(subscribe))
        .route("/:id/unsubscribe/:club_id", post(unsubscribe))
        .route("/:id/apply/:club_id", get(application_form).post(apply))
        .route("/:id/applications", get(applications))
        .route("/:id/events", get(events))
        .route("/:id/events/:event_id/rsvp", post(rsvp))
}
