use crate::{
    auth::{self, RequestContext},
    email::Mailer,
    error::{AppError, AppResult, FormResponse},
    models::{
        ClubKind, ClubStanding, NewUser, Profile, RequestStatus, Role, StudentProfile, User,
    },
    schema::*,
    session::{SessionStore, SessionUser},
    uploads::{FormData, MediaKind, Uploads},
    DbPool,
};
use axum::{
    extract::{Multipart, Query},
    http::header,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;

const MAX_MEMBERS: usize = 5;

/// Open requests still hold on to their club name and email.
const OPEN_REQUEST: [RequestStatus; 2] = [RequestStatus::Pending, RequestStatus::AdminApproved];

async fn email_taken(conn: &mut AsyncPgConnection, email: &str) -> AppResult<bool> {
    let in_users = diesel::select(diesel::dsl::exists(
        users::table.filter(users::email.eq(email)),
    ))
    .get_result::<bool>(conn)
    .await?;
    let in_requests = diesel::select(diesel::dsl::exists(
        club_requests::table
            .filter(club_requests::club_email.eq(email))
            .filter(club_requests::status.eq_any(OPEN_REQUEST)),
    ))
    .get_result::<bool>(conn)
    .await?;
    Ok(in_users || in_requests)
}

pub async fn club_name_taken(conn: &mut AsyncPgConnection, name: &str) -> AppResult<bool> {
    let in_users = diesel::select(diesel::dsl::exists(
        users::table
            .filter(users::role.eq(Role::Club))
            .filter(users::username.eq(name)),
    ))
    .get_result::<bool>(conn)
    .await?;
    let in_requests = diesel::select(diesel::dsl::exists(
        club_requests::table
            .filter(club_requests::club_name.eq(name))
            .filter(club_requests::status.eq_any(OPEN_REQUEST)),
    ))
    .get_result::<bool>(conn)
    .await?;
    Ok(in_users || in_requests)
}

async fn signup(
    Extension(pool): Extension<DbPool>,
    Extension(mailer): Extension<Mailer>,
    Extension(uploads): Extension<Uploads>,
    multipart: Multipart,
) -> AppResult<Json<FormResponse>> {
    let form = FormData::read(multipart).await?;
    match form.text("role") {
        Some("student") => signup_student(&pool, &mailer, &form).await,
        Some("club") => signup_club(&pool, &mailer, &uploads, &form).await,
        _ => Err(AppError::invalid("Please select a role")),
    }
}

async fn signup_student(pool: &DbPool, mailer: &Mailer, form: &FormData) -> AppResult<Json<FormResponse>> {
    let full_name = form.required("fullName", "Full name")?;
    let email = auth::normalize_email(&form.required("studentEmail", "Email")?);
    if !auth::is_student_email(&email) {
        return Err(AppError::invalid("Invalid PSU email format!"));
    }
    auth::check_password(
        form.text("studentPassword").unwrap_or_default(),
        form.text("studentConfirmPassword").unwrap_or_default(),
    )
    .map_err(AppError::invalid)?;
    let password_hash = auth::hash_password(form.text("studentPassword").unwrap_or_default())?;

    let conn = &mut pool.get().await?;
    if email_taken(conn, &email).await? {
        return Err(AppError::invalid("Email already exists!"));
    }

    let profile = Profile::Student(StudentProfile {
        full_name: full_name.clone(),
        email: email.clone(),
        ..StudentProfile::default()
    });
    let (token, digest) = auth::generate_token();
    let inserted = diesel::insert_into(users::table)
        .values(NewUser {
            username: full_name,
            email: email.clone(),
            password_hash,
            role: Role::Student,
            profile_data: profile.to_value()?,
            is_verified: false,
            is_approved: true,
            verification_token: Some(digest),
        })
        .on_conflict(users::email)
        .do_nothing()
        .execute(conn)
        .await?;
    if inserted == 0 {
        return Err(AppError::invalid("Email already exists!"));
    }

    tracing::info!(%email, "student signed up");
    mailer.send_verification(&email, &token);
    Ok(FormResponse::message(
        "Signup successful! Please check your email to verify your account.",
    ))
}

fn optional_flag(form: &FormData, name: &str) -> Option<bool> {
    match form.text(name)? {
        "yes" | "true" | "on" => Some(true),
        _ => Some(false),
    }
}

async fn signup_club(
    pool: &DbPool,
    mailer: &Mailer,
    uploads: &Uploads,
    form: &FormData,
) -> AppResult<Json<FormResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = club_requests)]
    struct NewClubRequest {
        club_name: String,
        club_email: String,
        club_description: Option<String>,
        representative_name: Option<String>,
        password_hash: String,
        club_kind: ClubKind,
        club_status: Option<ClubStanding>,
        club_vision: Option<String>,
        club_activities: Option<String>,
        president_name: Option<String>,
        president_student_id: Option<String>,
        president_phone: Option<String>,
        president_college: Option<String>,
        vp_name: Option<String>,
        vp_student_id: Option<String>,
        vp_phone: Option<String>,
        members: Vec<String>,
        advisor_name: Option<String>,
        advisor_email: Option<String>,
        advisor_signature: Option<String>,
        club_socials: Option<String>,
        club_members_count: Option<i32>,
        club_fair: Option<bool>,
        club_logo: Option<String>,
        verification_token: Option<String>,
    }

    let text = |name: &str| form.text(name).map(str::to_string);

    let club_name = form.required("clubName", "Club name")?;
    let club_email = auth::normalize_email(&form.required("clubEmail", "Club email")?);
    if club_email.parse::<lettre::Address>().is_err() {
        return Err(AppError::invalid("Invalid email format!"));
    }
    let club_kind = form
        .text("clubKind")
        .and_then(|k| k.parse::<ClubKind>().ok())
        .ok_or_else(|| AppError::invalid("Please select the club type!"))?;
    let club_status = match form.text("clubStatus") {
        Some(s) => Some(
            s.parse::<ClubStanding>()
                .map_err(|_| AppError::invalid("Please select whether the club is new or existing!"))?,
        ),
        None => None,
    };
    let club_members_count = match form.text("clubMembersCount") {
        Some(n) => Some(
            n.parse::<i32>()
                .ok()
                .filter(|n| *n >= 0)
                .ok_or_else(|| AppError::invalid("Member count must be a number!"))?,
        ),
        None => None,
    };
    auth::check_password(
        form.text("clubPassword").unwrap_or_default(),
        form.text("clubConfirmPassword").unwrap_or_default(),
    )
    .map_err(AppError::invalid)?;
    let logo = form.file("clubLogo");
    if logo.map_or(false, |f| crate::uploads::classify(&f.bytes) != MediaKind::Image) {
        return Err(AppError::invalid("Club logo must be an image!"));
    }

    let conn = &mut pool.get().await?;
    if email_taken(conn, &club_email).await? {
        return Err(AppError::invalid("Email already exists!"));
    }
    if club_name_taken(conn, &club_name).await? {
        return Err(AppError::invalid("Club name already exists!"));
    }

    let club_logo = match logo {
        Some(file) => Some(uploads.store(file).await?.path),
        None => None,
    };
    let members = (1..=MAX_MEMBERS)
        .filter_map(|i| text(&format!("member{i}")))
        .collect();
    let (token, digest) = auth::generate_token();

    diesel::insert_into(club_requests::table)
        .values(NewClubRequest {
            club_name: club_name.clone(),
            club_email: club_email.clone(),
            club_description: text("clubDescription"),
            representative_name: text("representativeName"),
            password_hash: auth::hash_password(form.text("clubPassword").unwrap_or_default())?,
            club_kind,
            club_status,
            club_vision: text("clubVision"),
            club_activities: text("clubActivities"),
            president_name: text("presidentName"),
            president_student_id: text("presidentStudentId"),
            president_phone: text("presidentPhone"),
            president_college: text("presidentCollege"),
            vp_name: text("vpName"),
            vp_student_id: text("vpStudentId"),
            vp_phone: text("vpPhone"),
            members,
            advisor_name: text("advisorName"),
            advisor_email: text("advisorEmail"),
            advisor_signature: text("advisorSignature"),
            club_socials: text("clubSocials"),
            club_members_count,
            club_fair: optional_flag(form, "clubFair"),
            club_logo,
            verification_token: Some(digest),
        })
        .execute(conn)
        .await?;

    tracing::info!(%club_name, %club_email, %club_kind, "club request submitted");
    mailer.send_verification(&club_email, &token);
    Ok(FormResponse::message(
        "Your club request has been submitted. Please verify your email and wait for admin approval.",
    ))
}

#[derive(Deserialize)]
struct VerifyQuery {
    #[serde(default)]
    token: Option<String>,
}

async fn verify_email(
    Extension(pool): Extension<DbPool>,
    Query(query): Query<VerifyQuery>,
) -> AppResult<Json<FormResponse>> {
    let Some(token) = query.token.filter(|t| !t.trim().is_empty()) else {
        return Err(AppError::invalid("Invalid or expired verification link."));
    };
    let digest = auth::token_digest(&token);
    let conn = &mut pool.get().await?;

    let users_verified = diesel::update(users::table)
        .filter(users::verification_token.eq(&digest))
        .set((
            users::is_verified.eq(true),
            users::verification_token.eq(None::<String>),
            users::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;
    if users_verified > 0 {
        return Ok(FormResponse::message("Email verified! You can now log in."));
    }

    let requests_verified = diesel::update(club_requests::table)
        .filter(club_requests::verification_token.eq(&digest))
        .set((
            club_requests::is_verified.eq(true),
            club_requests::verification_token.eq(None::<String>),
            club_requests::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;
    if requests_verified > 0 {
        return Ok(FormResponse::message(
            "Email verified! Your club request is awaiting admin approval.",
        ));
    }

    Err(AppError::invalid("Invalid or expired verification link."))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    let email = auth::normalize_email(&req.email);
    let conn = &mut pool.get().await?;

    let Some(user) = users::table
        .filter(users::email.eq(&email))
        .first::<User>(conn)
        .await
        .optional()? else {
        return Err(AppError::invalid("User not found!"));
    };
    if !user.is_verified {
        return Err(AppError::invalid("Please verify your email before logging in."));
    }
    if !auth::verify_password(req.password, &user.password_hash)? {
        return Err(AppError::invalid("Invalid credentials!"));
    }

    let token = sessions
        .create(SessionUser {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
        })
        .await?;
    tracing::info!(user = user.id, role = %user.role, "logged in");

    Ok((
        [(header::SET_COOKIE, sessions.cookie(&token))],
        Redirect::to(&user.role.home_path(user.id)),
    )
        .into_response())
}

async fn logout(
    Extension(sessions): Extension<SessionStore>,
    ctx: Option<RequestContext>,
) -> Response {
    if let Some(ctx) = ctx {
        sessions.destroy(&ctx.sid).await;
    }
    (
        [(header::SET_COOKIE, SessionStore::clear_cookie())],
        Redirect::to("/login"),
    )
        .into_response()
}

async fn home(ctx: RequestContext) -> Redirect {
    Redirect::to(&ctx.role().home_path(ctx.id()))
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(home))
        .route("/signup", post(signup))
        .route("/verify-email", get(verify_email))
        .route("/login", post(login))
        .route("/logout", get(logout).post(logout))
}
