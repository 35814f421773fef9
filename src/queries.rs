//! Lookups shared by several route modules.

use crate::{
    error::{AppError, AppResult},
    models::{Event, ReviewStatus, Role, User},
    schema::*,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

/// Loads an account that must have `role`; anything else is a 404 for
/// `what`.
pub async fn user_with_role(
    conn: &mut AsyncPgConnection,
    id: i32,
    role: Role,
    what: &str,
) -> AppResult<User> {
    users::table
        .find(id)
        .filter(users::role.eq(role))
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(what))
}

pub async fn is_subscribed(
    conn: &mut AsyncPgConnection,
    student_id: i32,
    club_id: i32,
) -> AppResult<bool> {
    Ok(diesel::select(diesel::dsl::exists(
        subscriptions::table
            .filter(subscriptions::student_id.eq(student_id))
            .filter(subscriptions::club_id.eq(club_id)),
    ))
    .get_result::<bool>(conn)
    .await?)
}

pub async fn subscribed_club_ids(
    conn: &mut AsyncPgConnection,
    student_id: i32,
) -> AppResult<Vec<i32>> {
    Ok(subscriptions::table
        .filter(subscriptions::student_id.eq(student_id))
        .select(subscriptions::club_id)
        .load::<i32>(conn)
        .await?)
}

pub async fn subscriber_emails(conn: &mut AsyncPgConnection, club_id: i32) -> AppResult<Vec<String>> {
    Ok(subscriptions::table
        .inner_join(users::table.on(users::id.eq(subscriptions::student_id)))
        .filter(subscriptions::club_id.eq(club_id))
        .select(users::email)
        .load::<String>(conn)
        .await?)
}

/// Keeps the events that are over and still have no report, given each
/// event paired with its report id.
pub fn unreported_elapsed(rows: Vec<(Event, Option<i32>)>, now: NaiveDateTime) -> Vec<Event> {
    rows.into_iter()
        .filter(|(event, report)| report.is_none() && event.has_elapsed(now))
        .map(|(event, _)| event)
        .collect()
}

/// Approved events of a club that are over but have no report yet. While any
/// exist the club may not propose new events.
pub async fn events_needing_report(
    conn: &mut AsyncPgConnection,
    club_id: i32,
    now: NaiveDateTime,
) -> AppResult<Vec<Event>> {
    let rows = events::table
        .left_join(event_reports::table)
        .filter(events::club_id.eq(club_id))
        .filter(events::status.eq(ReviewStatus::Approved))
        .select((events::all_columns, event_reports::id.nullable()))
        .order(events::starts_at.asc())
        .load::<(Event, Option<i32>)>(conn)
        .await?;

    Ok(unreported_elapsed(rows, now))
}

/// Appends to the audit trail of admin and dean actions.
pub async fn record_audit(
    conn: &mut AsyncPgConnection,
    admin_id: i32,
    action: &str,
    target_type: &str,
    target_id: i32,
    details: Option<String>,
) -> AppResult<()> {
    diesel::insert_into(audit_logs::table)
        .values((
            audit_logs::admin_id.eq(admin_id),
            audit_logs::action.eq(action),
            audit_logs::target_type.eq(target_type),
            audit_logs::target_id.eq(target_id),
            audit_logs::details.eq(details),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .and_then(|d| d.and_hms_opt(18, 0, 0))
            .unwrap()
    }

    fn event(id: i32, ends_at: Option<NaiveDateTime>) -> Event {
        Event {
            id,
            club_id: 5,
            title: format!("event {id}"),
            description: None,
            location: None,
            starts_at: ends_at,
            ends_at,
            capacity: None,
            organizer_name: None,
            expected_attendance: None,
            budget: None,
            requirements: None,
            attachments: vec![],
            approved_by_admin: true,
            approved_by_dean: true,
            status: ReviewStatus::Approved,
            admin_notes: None,
            dean_notes: None,
            created_at: day(1),
            updated_at: day(1),
        }
    }

    #[test]
    fn reported_and_upcoming_events_do_not_block() {
        let rows = vec![
            (event(1, Some(day(2))), None),
            (event(2, Some(day(3))), Some(40)),
            (event(3, Some(day(20))), None),
            (event(4, None), None),
        ];
        let blocking = unreported_elapsed(rows, day(10));
        assert_eq!(blocking.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn filing_the_report_clears_the_block() {
        let before = unreported_elapsed(vec![(event(1, Some(day(2))), None)], day(10));
        assert_eq!(before.len(), 1);
        let after = unreported_elapsed(vec![(event(1, Some(day(2))), Some(7))], day(10));
        assert!(after.is_empty());
    }
}
