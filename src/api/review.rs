//! Review actions shared by the admin and dean routes.

use crate::{
    auth::RequestContext,
    email::Mailer,
    error::{AppError, AppResult},
    models::{ClubRequest, Event, NewUser, Post, Profile, RequestStatus, ReviewStatus, Role, User},
    queries,
    realtime::{Hub, Outgoing, Topic},
    schema::*,
    workflow::{self, Decision, EventReview, Reviewer, TransitionError},
};
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;

/// Optional body of a reject action.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReviewNotes {
    #[serde(alias = "adminNotes", alias = "deanNotes")]
    pub notes: Option<String>,
}

impl ReviewNotes {
    pub fn rejection(self) -> Decision {
        Decision::from_form(false, self.notes.map(|n| n.trim().to_string()))
    }
}

/// Parses the `:verdict` path segment of a review action.
pub fn parse_verdict(verdict: &str, body: Option<Json<ReviewNotes>>) -> AppResult<Decision> {
    match verdict {
        "approve" => Ok(Decision::Approve),
        "reject" => Ok(body.map(|Json(b)| b).unwrap_or_default().rejection()),
        _ => Err(AppError::not_found("Page")),
    }
}

fn transition_error(e: TransitionError) -> AppError {
    AppError::conflict(e.to_string())
}

fn action(decision: &Decision, target: &str) -> String {
    match decision {
        Decision::Approve => format!("approve_{target}"),
        Decision::Reject { .. } => format!("reject_{target}"),
    }
}

fn notes(decision: &Decision) -> Option<String> {
    match decision {
        Decision::Approve => None,
        Decision::Reject { notes } => Some(notes.clone()),
    }
}

/// Emails every subscriber of `club` and pushes a notification into the
/// club's topic.
pub async fn notify_subscribers(
    conn: &mut AsyncPgConnection,
    hub: &Hub,
    mailer: &Mailer,
    club: &User,
    item_type: &str,
    title: Option<&str>,
    description: Option<&str>,
) -> AppResult<()> {
    let emails = queries::subscriber_emails(conn, club.id).await?;
    for to in &emails {
        mailer.send_notification(to, &club.username, item_type, title, description);
    }

    let topic = Topic::Club(club.id);
    hub.publish(
        topic,
        Outgoing::Notification {
            topic: topic.to_string(),
            club_id: club.id,
            kind: item_type.to_string(),
            title: title.map(str::to_string),
        },
    )
    .await;
    tracing::debug!(club = club.id, item_type, recipients = emails.len(), "notified subscribers");
    Ok(())
}

/// Result of a club request review.
pub struct RequestOutcome {
    pub request: ClubRequest,
    pub status: RequestStatus,
    /// The club account created when the request reached `approved`.
    pub club_user_id: Option<i32>,
}

/// Moves a club request one step along its chain. Reaching `approved`
/// creates the club account in the same transaction, with the request row
/// locked so concurrent reviews cannot create it twice.
pub async fn review_club_request(
    conn: &mut AsyncPgConnection,
    mailer: &Mailer,
    ctx: &RequestContext,
    reviewer: Reviewer,
    request_id: i32,
    decision: Decision,
) -> AppResult<RequestOutcome> {
    let reviewer_id = ctx.id();
    let reviewer_name = ctx.user.username.clone();
    let tx_decision = decision.clone();

    let outcome = conn
        .transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let decision = tx_decision;
                let request = club_requests::table
                    .find(request_id)
                    .for_update()
                    .first::<ClubRequest>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("Club request"))?;

                if reviewer == Reviewer::Admin
                    && decision == Decision::Approve
                    && !request.is_verified
                {
                    return Err(AppError::conflict(
                        "The club email has not been verified yet",
                    ));
                }
                let next = workflow::review_club_request(
                    request.status,
                    request.club_kind,
                    reviewer,
                    &decision,
                )
                .map_err(transition_error)?;

                let now = Utc::now().naive_utc();
                let approve = decision == Decision::Approve;
                match reviewer {
                    Reviewer::Admin => {
                        diesel::update(club_requests::table.find(request.id))
                            .set((
                                club_requests::status.eq(next),
                                club_requests::approved_by_admin.eq(approve),
                                club_requests::admin_approval_date.eq(approve.then_some(now)),
                                club_requests::admin_notes.eq(notes(&decision)),
                                club_requests::updated_at.eq(now),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    Reviewer::Dean => {
                        diesel::update(club_requests::table.find(request.id))
                            .set((
                                club_requests::status.eq(next),
                                club_requests::dean_approved.eq(approve),
                                club_requests::dean_name.eq(&reviewer_name),
                                club_requests::dean_approval_date.eq(approve.then_some(now)),
                                club_requests::dean_notes.eq(notes(&decision)),
                                club_requests::updated_at.eq(now),
                            ))
                            .execute(conn)
                            .await?;
                    }
                }

                let club_user_id = if next == RequestStatus::Approved {
                    Some(materialize_club(conn, &request).await?)
                } else {
                    None
                };

                queries::record_audit(
                    conn,
                    reviewer_id,
                    &action(&decision, "club_request"),
                    "club_request",
                    request.id,
                    Some(match notes(&decision) {
                        Some(notes) if !notes.is_empty() => format!("{} -> {next}: {notes}", request.status),
                        _ => format!("{} -> {next}", request.status),
                    }),
                )
                .await?;

                Ok(RequestOutcome {
                    request,
                    status: next,
                    club_user_id,
                })
            })
        })
        .await?;

    tracing::info!(
        request = outcome.request.id,
        status = %outcome.status,
        reviewer = reviewer_id,
        "club request reviewed"
    );
    match outcome.status {
        RequestStatus::Approved => mailer.send_club_decision(
            &outcome.request.club_email,
            &outcome.request.club_name,
            true,
            "",
        ),
        RequestStatus::Rejected => mailer.send_club_decision(
            &outcome.request.club_email,
            &outcome.request.club_name,
            false,
            notes(&decision).as_deref().unwrap_or_default(),
        ),
        RequestStatus::Pending | RequestStatus::AdminApproved => {}
    }
    Ok(outcome)
}

/// Inserts the club account for an approved request and links it.
async fn materialize_club(conn: &mut AsyncPgConnection, request: &ClubRequest) -> AppResult<i32> {
    if request.user_id.is_some() {
        return Err(AppError::conflict("This request already has a club account"));
    }
    let email_taken = diesel::select(diesel::dsl::exists(
        users::table.filter(users::email.eq(&request.club_email)),
    ))
    .get_result::<bool>(conn)
    .await?;
    if email_taken {
        return Err(AppError::conflict("A user with this email already exists"));
    }
    let name_taken = diesel::select(diesel::dsl::exists(
        users::table
            .filter(users::role.eq(Role::Club))
            .filter(users::username.eq(&request.club_name)),
    ))
    .get_result::<bool>(conn)
    .await?;
    if name_taken {
        return Err(AppError::conflict("A club with this name already exists"));
    }

    let user = diesel::insert_into(users::table)
        .values(NewUser {
            username: request.club_name.clone(),
            email: request.club_email.clone(),
            password_hash: request.password_hash.clone(),
            role: Role::Club,
            profile_data: Profile::Club(request.club_profile()).to_value()?,
            is_verified: true,
            is_approved: true,
            verification_token: None,
        })
        .get_result::<User>(conn)
        .await?;

    diesel::update(club_requests::table.find(request.id))
        .set(club_requests::user_id.eq(Some(user.id)))
        .execute(conn)
        .await?;
    tracing::info!(user = user.id, request = request.id, "club account created");
    Ok(user.id)
}

/// Applies an admin or dean review to an event. Returns the event as stored
/// afterwards.
pub async fn review_event(
    conn: &mut AsyncPgConnection,
    hub: &Hub,
    mailer: &Mailer,
    ctx: &RequestContext,
    reviewer: Reviewer,
    event_id: i32,
    decision: Decision,
) -> AppResult<Event> {
    let (event, club) = events::table
        .inner_join(users::table)
        .filter(events::id.eq(event_id))
        .first::<(Event, User)>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Event"))?;

    let before = EventReview {
        approved_by_admin: event.approved_by_admin,
        approved_by_dean: event.approved_by_dean,
        status: event.status,
    };
    let after = before
        .review(club.club_kind()?, reviewer, &decision)
        .map_err(transition_error)?;

    let (admin_notes, dean_notes) = match reviewer {
        Reviewer::Admin => (notes(&decision).or(event.admin_notes.clone()), event.dean_notes.clone()),
        Reviewer::Dean => (event.admin_notes.clone(), notes(&decision).or(event.dean_notes.clone())),
    };
    // the filter on the old flags makes a concurrent second review a no-op
    let updated = diesel::update(events::table.find(event.id))
        .filter(events::status.eq(before.status))
        .filter(events::approved_by_admin.eq(before.approved_by_admin))
        .filter(events::approved_by_dean.eq(before.approved_by_dean))
        .set((
            events::approved_by_admin.eq(after.approved_by_admin),
            events::approved_by_dean.eq(after.approved_by_dean),
            events::status.eq(after.status),
            events::admin_notes.eq(admin_notes),
            events::dean_notes.eq(dean_notes),
            events::updated_at.eq(diesel::dsl::now),
        ))
        .get_result::<Event>(conn)
        .await
        .optional()?;
    let Some(updated) = updated else {
        return Err(transition_error(TransitionError::AlreadyReviewed));
    };

    queries::record_audit(
        conn,
        ctx.id(),
        &action(&decision, "event"),
        "event",
        event.id,
        notes(&decision),
    )
    .await?;
    tracing::info!(event = event.id, status = %after.status, ?reviewer, "event reviewed");

    if after.just_approved(&before) {
        notify_subscribers(
            conn,
            hub,
            mailer,
            &club,
            "event",
            Some(&updated.title),
            updated.description.as_deref(),
        )
        .await?;
    }
    Ok(updated)
}

/// Admin moderation of a post.
pub async fn review_post(
    conn: &mut AsyncPgConnection,
    hub: &Hub,
    mailer: &Mailer,
    ctx: &RequestContext,
    post_id: i32,
    decision: Decision,
) -> AppResult<Post> {
    let (post, club) = posts::table
        .inner_join(users::table)
        .filter(posts::id.eq(post_id))
        .first::<(Post, User)>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Post"))?;

    let next = workflow::review_post(post.status, &decision).map_err(transition_error)?;
    let updated = diesel::update(posts::table.find(post.id))
        .filter(posts::status.eq(ReviewStatus::Pending))
        .set((
            posts::status.eq(next),
            posts::admin_notes.eq(notes(&decision)),
            posts::updated_at.eq(diesel::dsl::now),
        ))
        .get_result::<Post>(conn)
        .await
        .optional()?;
    let Some(updated) = updated else {
        return Err(transition_error(TransitionError::AlreadyReviewed));
    };

    queries::record_audit(
        conn,
        ctx.id(),
        &action(&decision, "post"),
        "post",
        post.id,
        notes(&decision),
    )
    .await?;

    if next == ReviewStatus::Approved {
        notify_subscribers(conn, hub, mailer, &club, "post", None, updated.text.as_deref()).await?;
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_notes_are_trimmed() {
        let body: ReviewNotes = serde_json::from_str(r#"{ "adminNotes": " insufficient info " }"#).unwrap();
        assert_eq!(
            body.rejection(),
            Decision::Reject {
                notes: "insufficient info".into()
            }
        );
        assert_eq!(
            ReviewNotes::default().rejection(),
            Decision::Reject { notes: String::new() }
        );
    }

    #[test]
    fn verdicts() {
        assert_eq!(parse_verdict("approve", None).ok(), Some(Decision::Approve));
        let notes = ReviewNotes {
            notes: Some("no advisor".into()),
        };
        assert_eq!(
            parse_verdict("reject", Some(Json(notes))).ok(),
            Some(Decision::Reject {
                notes: "no advisor".into()
            })
        );
        assert!(parse_verdict("delete", None).is_err());
    }

    #[test]
    fn audit_actions_name_the_decision() {
        assert_eq!(action(&Decision::Approve, "event"), "approve_event");
        let reject = Decision::Reject { notes: "late".into() };
        assert_eq!(action(&reject, "club_request"), "reject_club_request");
        assert_eq!(notes(&reject), Some("late".to_string()));
        assert_eq!(notes(&Decision::Approve), None);
    }
}
