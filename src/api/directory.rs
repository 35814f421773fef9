use crate::{
    auth::RequestContext,
    error::AppResult,
    models::{ClubProfile, Profile, Role, Subscription, User},
    queries,
    schema::*,
    session::SessionUser,
    DbPool,
};
use axum::{extract::Path, routing::get, Extension, Json, Router};
use diesel::prelude::*;
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Me {
    #[serde(flatten)]
    user: SessionUser,
    profile: Profile,
}

async fn me(Extension(pool): Extension<DbPool>, ctx: RequestContext) -> AppResult<Json<Me>> {
    let conn = &mut pool.get().await?;
    let user = users::table.find(ctx.id()).first::<User>(conn).await?;
    Ok(Json(Me {
        profile: user.profile()?,
        user: ctx.user,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClubResponse {
    id: i32,
    club_name: String,
    /// Login email; the profile carries its own contact address.
    email: String,
    profile: ClubProfile,
    subscribers: usize,
    /// Only answered for students.
    subscribed: Option<bool>,
}

async fn load_clubs(
    conn: &mut AsyncPgConnection,
    viewer: &SessionUser,
    clubs: Vec<User>,
) -> AppResult<Vec<ClubResponse>> {
    let subscriptions = Subscription::belonging_to(&clubs)
        .load::<Subscription>(conn)
        .await?
        .grouped_by(&clubs);

    clubs
        .into_iter()
        .zip(subscriptions)
        .map(|(club, subs)| -> AppResult<ClubResponse> {
            let profile = match club.profile()? {
                Profile::Club(profile) => profile,
                _ => ClubProfile::default(),
            };
            Ok(ClubResponse {
                id: club.id,
                club_name: club.username,
                email: club.email,
                profile,
                subscribers: subs.len(),
                subscribed: (viewer.role == Role::Student)
                    .then(|| subs.iter().any(|s| s.student_id == viewer.id)),
            })
        })
        .collect()
}

async fn list(
    Extension(pool): Extension<DbPool>,
    ctx: RequestContext,
) -> AppResult<Json<Vec<ClubResponse>>> {
    let conn = &mut pool.get().await?;

    let clubs = users::table
        .filter(users::role.eq(Role::Club))
        .order(users::username.asc())
        .load::<User>(conn)
        .await?;

    Ok(Json(load_clubs(conn, &ctx.user, clubs).await?))
}

async fn info(
    Extension(pool): Extension<DbPool>,
    ctx: RequestContext,
    Path(club_id): Path<i32>,
) -> AppResult<Json<ClubResponse>> {
    let conn = &mut pool.get().await?;

    let club = queries::user_with_role(conn, club_id, Role::Club, "Club").await?;

    Ok(Json(load_clubs(conn, &ctx.user, vec![club]).await?.pop().ok_or_else(
        || anyhow::anyhow!("`load_clubs` should return one club"),
    )?))
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Contact {
    id: i32,
    username: String,
    role: Role,
}

/// Accounts the caller may open a direct conversation with.
async fn contacts(
    Extension(pool): Extension<DbPool>,
    ctx: RequestContext,
) -> AppResult<Json<Vec<Contact>>> {
    let conn = &mut pool.get().await?;
    let columns = (users::id, users::username, users::role);

    let rows: Vec<(i32, String, Role)> = match ctx.role() {
        Role::Student => {
            users::table
                .inner_join(subscriptions::table.on(subscriptions::club_id.eq(users::id)))
                .filter(subscriptions::student_id.eq(ctx.id()))
                .select(columns)
                .order(users::username.asc())
                .load(conn)
                .await?
        }
        Role::Club => {
            let mut rows: Vec<(i32, String, Role)> = users::table
                .inner_join(subscriptions::table.on(subscriptions::student_id.eq(users::id)))
                .filter(subscriptions::club_id.eq(ctx.id()))
                .select(columns)
                .order(users::username.asc())
                .load(conn)
                .await?;
            rows.extend(
                users::table
                    .filter(users::role.eq(Role::Admin))
                    .select(columns)
                    .order(users::username.asc())
                    .load::<(i32, String, Role)>(conn)
                    .await?,
            );
            rows
        }
        Role::Admin => {
            users::table
                .filter(
                    users::role
                        .eq(Role::Student)
                        .and(users::is_verified.eq(true))
                        .or(users::role.eq(Role::Club)),
                )
                .select(columns)
                .order((users::role.asc(), users::username.asc()))
                .load(conn)
                .await?
        }
        Role::Dean => Vec::new(),
    };

    Ok(Json(
        rows.into_iter()
            .map(|(id, username, role)| Contact { id, username, role })
            .collect(),
    ))
}

pub fn app() -> Router {
    Router::new()
        .route("/me", get(me))
        .route("/clubs", get(list))
        .route("/clubs/:club_id", get(info))
        .route("/contacts", get(contacts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn club_profiles_do_not_shadow_account_fields() {
        let club = ClubResponse {
            id: 1,
            club_name: "robotics".into(),
            email: "robotics@psu.edu.sa".into(),
            profile: ClubProfile {
                club_name: "Robotics Club".into(),
                email: "contact@robotics.example".into(),
                ..ClubProfile::default()
            },
            subscribers: 3,
            subscribed: Some(true),
        };

        let text = serde_json::to_string(&club).unwrap();
        assert_eq!(text.matches("\"email\"").count(), 2);
        assert_eq!(text.matches("\"clubName\"").count(), 2);

        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["email"], "robotics@psu.edu.sa");
        assert_eq!(v["clubName"], "robotics");
        assert_eq!(v["profile"]["email"], "contact@robotics.example");
        assert_eq!(v["profile"]["clubName"], "Robotics Club");
    }
}
