use super::{auth::club_name_taken, redirect_with_notice};
use crate::{
    auth::RequestContext,
    error::{AppError, AppResult},
    models::{Profile, Role, User},
    schema::*,
    session::SessionStore,
    uploads::{classify, FormData, MediaKind, Uploads},
    DbPool,
};
use axum::{extract::Multipart, response::Redirect, routing::post, Extension, Router};
use diesel::{update, ExpressionMethods, QueryDsl};
use diesel_async::RunQueryDsl;

/// Paths of files stored for this update.
#[derive(Debug, Default)]
struct Stored {
    picture: Option<String>,
    cv: Option<String>,
    logo: Option<String>,
}

/// Overwrites the editable fields of `profile` with the submitted form.
/// Media fields only change when a new file was uploaded.
fn edit_profile(profile: Profile, form: &FormData, stored: Stored) -> AppResult<Profile> {
    let field = |name: &str| form.text(name).unwrap_or_default().to_string();

    Ok(match profile {
        Profile::Student(mut p) => {
            p.full_name = form.required("fullName", "Full name")?;
            p.bio = field("bio");
            p.phone = field("phone");
            p.linkedin = field("linkedin");
            if let Some(picture) = stored.picture {
                p.profile_pic = picture;
            }
            if let Some(cv) = stored.cv {
                p.cv = cv;
            }
            Profile::Student(p)
        }
        Profile::Club(mut p) => {
            p.club_name = form.required("clubName", "Club name")?;
            p.club_description = field("clubDescription");
            p.representative_name = field("representativeName");
            p.email = field("email");
            p.phone = field("phone");
            p.linkedin = field("linkedin");
            p.instagram = field("instagram");
            p.tiktok = field("tiktok");
            p.x = field("x");
            if let Some(logo) = stored.logo {
                p.logo = logo;
            }
            Profile::Club(p)
        }
        Profile::Staff(mut p) => {
            p.full_name = form.required("fullName", "Full name")?;
            Profile::Staff(p)
        }
    })
}

fn ensure_image(form: &FormData, field: &str, label: &str) -> AppResult<()> {
    match form.file(field) {
        Some(file) if classify(&file.bytes) != MediaKind::Image => {
            Err(AppError::invalid(format!("{label} must be an image!")))
        }
        _ => Ok(()),
    }
}

async fn store_one(uploads: &Uploads, form: &FormData, field: &str) -> AppResult<Option<String>> {
    match form.file(field) {
        Some(file) => Ok(Some(uploads.store(file).await?.path)),
        None => Ok(None),
    }
}

async fn update_profile(
    Extension(pool): Extension<DbPool>,
    Extension(sessions): Extension<SessionStore>,
    Extension(uploads): Extension<Uploads>,
    ctx: RequestContext,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let form = FormData::read(multipart).await?;
    ensure_image(&form, "profilePic", "Profile picture")?;
    ensure_image(&form, "logo", "Logo")?;

    let conn = &mut pool.get().await?;
    let user = users::table.find(ctx.id()).first::<User>(conn).await?;
    let current = user.profile()?;

    let stored = match user.role {
        Role::Student => Stored {
            picture: store_one(&uploads, &form, "profilePic").await?,
            cv: store_one(&uploads, &form, "cv").await?,
            logo: None,
        },
        Role::Club => Stored {
            logo: store_one(&uploads, &form, "logo").await?,
            ..Stored::default()
        },
        Role::Admin | Role::Dean => Stored::default(),
    };
    let edited = edit_profile(current.clone(), &form, stored)?;

    let name = edited.display_name().to_string();
    if user.role == Role::Club
        && name != current.display_name()
        && club_name_taken(conn, &name).await?
    {
        return Err(AppError::invalid("Club name already exists!"));
    }

    update(users::table.find(user.id))
        .set((
            users::username.eq(&name),
            users::profile_data.eq(edited.to_value()?),
            users::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;
    sessions.rename(&ctx.sid, name).await;

    let target = match user.role {
        Role::Student => format!("/student/{}", user.id),
        role => role.home_path(user.id),
    };
    Ok(redirect_with_notice(&sessions, &ctx, &target, "Profile updated!").await)
}

pub fn app() -> Router {
    Router::new().route("/update-profile", post(update_profile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClubKind, ClubProfile, StudentProfile};

    #[test]
    fn student_edits_keep_media_unless_replaced() {
        let before = Profile::Student(StudentProfile {
            full_name: "Sara".into(),
            email: "201012345@psu.edu.sa".into(),
            cv: "/uploads/1-cv.pdf".into(),
            ..StudentProfile::default()
        });
        let form = FormData::default()
            .with_field("fullName", "Sara A.")
            .with_field("bio", "CS junior");
        let stored = Stored {
            picture: Some("/uploads/2-me.png".into()),
            ..Stored::default()
        };

        let Profile::Student(after) = edit_profile(before, &form, stored).unwrap() else {
            panic!("role changed");
        };
        assert_eq!(after.full_name, "Sara A.");
        assert_eq!(after.bio, "CS junior");
        assert_eq!(after.email, "201012345@psu.edu.sa");
        assert_eq!(after.profile_pic, "/uploads/2-me.png");
        assert_eq!(after.cv, "/uploads/1-cv.pdf");
    }

    #[test]
    fn club_edits_keep_the_kind() {
        let before = Profile::Club(ClubProfile {
            club_name: "Robotics".into(),
            kind: Some(ClubKind::Academic),
            ..ClubProfile::default()
        });
        let form = FormData::default()
            .with_field("clubName", "Robotics Society")
            .with_field("instagram", "@robotics");

        let Profile::Club(after) = edit_profile(before, &form, Stored::default()).unwrap() else {
            panic!("role changed");
        };
        assert_eq!(after.club_name, "Robotics Society");
        assert_eq!(after.instagram, "@robotics");
        assert_eq!(after.kind, Some(ClubKind::Academic));
    }

    #[test]
    fn names_are_required() {
        let before = Profile::Student(StudentProfile::default());
        let form = FormData::default().with_field("bio", "hello");
        assert!(edit_profile(before, &form, Stored::default()).is_err());
    }
}
