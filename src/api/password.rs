use crate::{
    auth,
    email::Mailer,
    error::{AppError, AppResult, FormResponse},
    schema::*,
    DbPool,
};
use axum::{
    extract::Path,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::{update, ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PwdRequest {
    email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewPwdRequest {
    password: String,
    confirm_password: String,
}

/// How long an emailed reset link stays usable.
pub fn reset_allowed_time() -> Duration {
    Duration::hours(1)
}

const REQUEST_ANSWER: &str = "If an account with that email exists, a password reset link has been sent.";

async fn password_request(
    Extension(pool): Extension<DbPool>,
    Extension(mailer): Extension<Mailer>,
    Json(req): Json<PwdRequest>,
) -> AppResult<Json<FormResponse>> {
    let email = auth::normalize_email(&req.email);
    let conn = &mut pool.get().await?;

    let (token, digest) = auth::generate_token();
    let expires_at = Utc::now().naive_utc() + reset_allowed_time();
    let updated = update(users::table.filter(users::email.eq(&email)))
        .set((
            users::reset_token.eq(Some(digest)),
            users::reset_expires_at.eq(Some(expires_at)),
        ))
        .execute(conn)
        .await?;

    if updated > 0 {
        mailer.send_password_reset(&email, &token);
    } else {
        tracing::debug!(%email, "password reset requested for unknown email");
    }
    // same answer whether or not the account exists
    Ok(FormResponse::message(REQUEST_ANSWER))
}

/// Id of the account a live reset token belongs to.
async fn find_reset(
    conn: &mut diesel_async::AsyncPgConnection,
    token: &str,
) -> AppResult<i32> {
    let found = users::table
        .filter(users::reset_token.eq(auth::token_digest(token)))
        .select((users::id, users::reset_expires_at))
        .first::<(i32, Option<NaiveDateTime>)>(conn)
        .await
        .optional()?;

    match found {
        Some((id, Some(expires_at))) if expires_at > Utc::now().naive_utc() => Ok(id),
        _ => Err(AppError::invalid("Password reset link is invalid or has expired.")),
    }
}

async fn check_token(
    Extension(pool): Extension<DbPool>,
    Path(token): Path<String>,
) -> AppResult<Json<FormResponse>> {
    let conn = &mut pool.get().await?;
    find_reset(conn, &token).await?;
    Ok(FormResponse::message("Choose a new password."))
}

async fn password_reset(
    Extension(pool): Extension<DbPool>,
    Path(token): Path<String>,
    Json(req): Json<NewPwdRequest>,
) -> AppResult<Json<FormResponse>> {
    auth::check_password(&req.password, &req.confirm_password).map_err(AppError::invalid)?;

    let conn = &mut pool.get().await?;
    let user_id = find_reset(conn, &token).await?;

    update(users::table.find(user_id))
        .set((
            users::password_hash.eq(auth::hash_password(req.password)?),
            users::reset_token.eq(None::<String>),
            users::reset_expires_at.eq(None::<NaiveDateTime>),
            users::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;
    tracing::info!(user = user_id, "password reset");

    Ok(FormResponse::message("Password updated! You can now log in."))
}

pub fn app() -> Router {
    Router::new()
        .route("/forgot-password", post(password_request))
        .route("/reset-password/:token", get(check_token).post(password_reset))
}
