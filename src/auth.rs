use crate::{
    error::AppError,
    models::Role,
    session::{SessionError, SessionStore, SessionUser, SESSION_COOKIE},
};
use argon2::Argon2;
use axum::{
    async_trait,
    extract::{FromRequest, RequestParts},
    headers::Cookie,
    Extension, TypedHeader,
};
use jsonwebtoken::{
    errors::Result as JwtResult, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use password_hash::{
    self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

pub fn hash_password(password: impl AsRef<[u8]>) -> password_hash::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_ref(), &salt)
        .map(|h| h.to_string())
}

pub fn verify_password(
    password: impl AsRef<[u8]>,
    password_hash: impl AsRef<str>,
) -> password_hash::Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash.as_ref())?;
    Ok(Argon2::default()
        .verify_password(password.as_ref(), &parsed_hash)
        .is_ok())
}

pub const MIN_PASSWORD_LEN: usize = 8;

/// Checks a new password and its confirmation, returning the message shown
/// on the form when they are not acceptable.
pub fn check_password(password: &str, confirmation: &str) -> Result<(), &'static str> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err("Password must be at least 8 characters!");
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("Password must contain both letters and numbers!");
    }
    if password != confirmation {
        return Err("Passwords do not match!");
    }
    Ok(())
}

/// Student accounts use university addresses: nine digits at psu.edu.sa.
pub fn is_student_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            local.len() == 9 && local.bytes().all(|b| b.is_ascii_digit()) && domain == "psu.edu.sa"
        }
        None => false,
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Fresh one-time token to be emailed, paired with the digest stored in
/// the database.
pub fn generate_token() -> (String, String) {
    let token = nanoid::nanoid!(42);
    let digest = token_digest(&token);
    (token, digest)
}

pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

pub struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    pub fn from_base64_secret(secret: &str) -> JwtResult<Keys> {
        Ok(Keys {
            encoding: EncodingKey::from_base64_secret(secret)?,
            decoding: DecodingKey::from_base64_secret(secret)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sid: String,
    pub exp: u64,
}

pub fn generate_jwt(keys: &Keys, sid: &str, exp: Duration) -> JwtResult<String> {
    jsonwebtoken::encode(
        &Header::default(),
        &Claims {
            sid: sid.to_string(),
            exp: jsonwebtoken::get_current_timestamp() + exp.as_secs(),
        },
        &keys.encoding,
    )
}

pub fn validate_jwt(keys: &Keys, token: &str) -> JwtResult<TokenData<Claims>> {
    jsonwebtoken::decode::<Claims>(token, &keys.decoding, &Validation::default())
}

/// Identity of the logged-in user for the current request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub sid: String,
    pub user: SessionUser,
}

impl RequestContext {
    pub fn id(&self) -> i32 {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    /// Routes scoped to `/<role>/:id` only serve the account itself.
    pub fn ensure_self(&self, id: i32) -> Result<(), AppError> {
        if self.user.id == id {
            Ok(())
        } else {
            Err(AppError::forbidden())
        }
    }
}

#[async_trait]
impl<B> FromRequest<B> for RequestContext
where
    B: Send,
{
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let Extension(sessions) = Extension::<SessionStore>::from_request(req)
            .await
            .map_err(|_| anyhow::anyhow!("session store is not installed"))?;
        let cookies = TypedHeader::<Cookie>::from_request(req).await.ok();
        let Some(token) = cookies.as_ref().and_then(|c| c.get(SESSION_COOKIE)) else {
            return Err(AppError::LoginRequired { expired: false });
        };

        match sessions.resolve(token).await {
            Ok((sid, user)) => Ok(RequestContext { sid, user }),
            Err(SessionError::Missing) => Err(AppError::LoginRequired { expired: false }),
            Err(SessionError::Idle) => Err(AppError::LoginRequired { expired: true }),
        }
    }
}

macro_rules! role_extractor {
    ($(#[$meta:meta])* $name:ident, $role:path) => {
        $(#[$meta])*
        pub struct $name(pub RequestContext);

        #[async_trait]
        impl<B> FromRequest<B> for $name
        where
            B: Send,
        {
            type Rejection = AppError;

            async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
                let ctx = RequestContext::from_request(req).await?;
                if ctx.user.role == $role {
                    Ok($name(ctx))
                } else {
                    Err(AppError::forbidden())
                }
            }
        }
    };
}

role_extractor!(
    /// Session of a student account.
    StudentOnly,
    Role::Student
);
role_extractor!(
    /// Session of a club account.
    ClubOnly,
    Role::Club
);
role_extractor!(AdminOnly, Role::Admin);
role_extractor!(DeanOnly, Role::Dean);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_verify_against_their_hash() {
        let hash = hash_password("abcdef12").unwrap();
        assert!(verify_password("abcdef12", &hash).unwrap());
        assert!(!verify_password("abcdef13", &hash).unwrap());
    }

    #[test]
    fn password_policy() {
        assert_eq!(check_password("abcdef12", "abcdef12"), Ok(()));
        assert_eq!(
            check_password("abc12", "abc12"),
            Err("Password must be at least 8 characters!")
        );
        assert_eq!(
            check_password("abcdefgh", "abcdefgh"),
            Err("Password must contain both letters and numbers!")
        );
        assert_eq!(
            check_password("12345678", "12345678"),
            Err("Password must contain both letters and numbers!")
        );
        assert_eq!(
            check_password("abcdef12", "abcdef21"),
            Err("Passwords do not match!")
        );
    }

    #[test]
    fn student_email_format() {
        assert!(is_student_email("201012345@psu.edu.sa"));
        assert!(!is_student_email("20101234@psu.edu.sa"));
        assert!(!is_student_email("2010123456@psu.edu.sa"));
        assert!(!is_student_email("20101234a@psu.edu.sa"));
        assert!(!is_student_email("201012345@gmail.com"));
        assert!(!is_student_email("201012345"));
        assert_eq!(normalize_email("  201012345@PSU.edu.sa "), "201012345@psu.edu.sa");
    }

    #[test]
    fn tokens_are_stored_as_digests() {
        let (token, digest) = generate_token();
        assert_eq!(token.len(), 42);
        assert_eq!(digest.len(), 64);
        assert_eq!(token_digest(&token), digest);
        assert_ne!(generate_token().0, token);
    }
}
