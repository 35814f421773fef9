#![recursion_limit = "256"]

use std::io;

use axum::{http::StatusCode, routing::get_service, Extension, Router};
use deadpool::managed::Pool;
use diesel::prelude::*;
use diesel_async::{pooled_connection::AsyncDieselConnectionManager, AsyncPgConnection, RunQueryDsl};
use tower_http::{services::ServeDir, trace::TraceLayer};

pub mod api;
pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod messaging;
pub mod models;
pub mod queries;
pub mod realtime;
pub mod schema;
pub mod session;
pub mod uploads;
pub mod workflow;

use crate::{
    email::Mailer,
    models::{NewUser, Profile, Role, StaffProfile},
    realtime::Hub,
    schema::users,
    session::SessionStore,
    uploads::{Uploads, UPLOADS_PREFIX},
};

pub type DbPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Builds the pool. Connections are opened lazily, on first use.
pub fn connect_to_db(db_url: &str) -> anyhow::Result<DbPool> {
    let db_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    Ok(Pool::builder(db_config).build()?)
}

/// Shared state handed to every handler through `Extension` layers.
#[derive(Clone)]
pub struct Services {
    pub pool: DbPool,
    pub sessions: SessionStore,
    pub hub: Hub,
    pub mailer: Mailer,
    pub uploads: Uploads,
}

pub fn app(services: Services) -> Router {
    let serve = get_service(ServeDir::new(services.uploads.dir())).handle_error(handle_error);
    api::app()
        .nest(UPLOADS_PREFIX, serve)
        .layer(Extension(services.pool))
        .layer(Extension(services.sessions))
        .layer(Extension(services.hub))
        .layer(Extension(services.mailer))
        .layer(Extension(services.uploads))
        .layer(TraceLayer::new_for_http())
}

async fn handle_error(_: io::Error) -> error::AppError {
    error::AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch upload")
}

/// Creates the admin or dean account unless one with `email` exists.
/// Returns whether an account was created.
pub async fn seed_staff_account(
    pool: &DbPool,
    role: Role,
    email: &str,
    password: &str,
    full_name: &str,
) -> anyhow::Result<bool> {
    let conn = &mut pool.get().await?;

    let profile = Profile::Staff(StaffProfile {
        full_name: full_name.to_string(),
    });
    let inserted = diesel::insert_into(users::table)
        .values(NewUser {
            username: full_name.to_string(),
            email: auth::normalize_email(email),
            password_hash: auth::hash_password(password)?,
            role,
            profile_data: profile.to_value()?,
            is_verified: true,
            is_approved: true,
            verification_token: None,
        })
        .on_conflict(users::email)
        .do_nothing()
        .execute(conn)
        .await?;

    if inserted > 0 {
        tracing::info!(%role, %email, "seeded staff account");
    }
    Ok(inserted > 0)
}
