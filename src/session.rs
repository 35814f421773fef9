//! Server-side sessions.
//!
//! The browser holds a signed cookie naming a session id; identity, activity
//! time and pending notices stay in memory. A session dies when its cookie
//! expires (absolute lifetime) or when no request touched it within the idle
//! timeout, whichever comes first.

use crate::{
    auth::{self, Keys},
    models::Role,
};
use jsonwebtoken::errors::Result as JwtResult;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

pub const SESSION_COOKIE: &str = "clubhub_session";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: Role,
}

struct Session {
    user: SessionUser,
    last_seen: Instant,
    notices: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no active session")]
    Missing,
    #[error("session expired after inactivity")]
    Idle,
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    /// Ids removed by `purge_idle`, kept until their cookies can no longer be valid.
    expired: Arc<Mutex<HashMap<String, Instant>>>,
    keys: Arc<Keys>,
    idle_timeout: Duration,
    lifetime: Duration,
}

fn is_idle(last_seen: Instant, now: Instant, idle_timeout: Duration) -> bool {
    now.saturating_duration_since(last_seen) > idle_timeout
}

impl SessionStore {
    pub fn new(keys: Keys, idle_timeout: Duration, lifetime: Duration) -> SessionStore {
        SessionStore {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            expired: Arc::new(Mutex::new(HashMap::new())),
            keys: Arc::new(keys),
            idle_timeout,
            lifetime,
        }
    }

    /// Starts a session and returns the cookie token naming it.
    pub async fn create(&self, user: SessionUser) -> JwtResult<String> {
        let sid = format!("{:032x}", rand::random::<u128>());
        let token = auth::generate_jwt(&self.keys, &sid, self.lifetime)?;
        self.sessions.lock().await.insert(
            sid,
            Session {
                user,
                last_seen: Instant::now(),
                notices: Vec::new(),
            },
        );
        Ok(token)
    }

    /// Resolves a cookie token, refreshing the session's activity time.
    pub async fn resolve(&self, token: &str) -> Result<(String, SessionUser), SessionError> {
        let claims = auth::validate_jwt(&self.keys, token)
            .map_err(|_| SessionError::Missing)?
            .claims;

        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&claims.sid) else {
            return match self.expired.lock().await.remove(&claims.sid) {
                Some(_) => Err(SessionError::Idle),
                None => Err(SessionError::Missing),
            };
        };

        let now = Instant::now();
        if is_idle(session.last_seen, now, self.idle_timeout) {
            sessions.remove(&claims.sid);
            return Err(SessionError::Idle);
        }
        session.last_seen = now;

        Ok((claims.sid, session.user.clone()))
    }

    pub async fn destroy(&self, sid: &str) {
        self.sessions.lock().await.remove(sid);
    }

    /// Drops sessions that went idle without a further request.
    pub async fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let mut purged = Vec::new();
        sessions.retain(|sid, s| {
            let idle = is_idle(s.last_seen, now, self.idle_timeout);
            if idle {
                purged.push(sid.clone());
            }
            !idle
        });

        let count = purged.len();
        let mut expired = self.expired.lock().await;
        expired.retain(|_, at| now.saturating_duration_since(*at) < self.lifetime);
        expired.extend(purged.into_iter().map(|sid| (sid, now)));
        count
    }

    pub async fn rename(&self, sid: &str, username: String) {
        if let Some(session) = self.sessions.lock().await.get_mut(sid) {
            session.user.username = username;
        }
    }

    /// Queues a one-shot notice shown by the next page view.
    pub async fn push_notice(&self, sid: &str, notice: impl Into<String>) {
        if let Some(session) = self.sessions.lock().await.get_mut(sid) {
            session.notices.push(notice.into());
        }
    }

    pub async fn take_notices(&self, sid: &str) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .get_mut(sid)
            .map(|s| std::mem::take(&mut s.notices))
            .unwrap_or_default()
    }

    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.lifetime.as_secs()
        )
    }

    pub fn clear_cookie() -> String {
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "c2Vzc2lvbi1zZWNyZXQtZm9yLXRlc3Rz";

    fn store(idle: Duration) -> SessionStore {
        let keys = Keys::from_base64_secret(SECRET).unwrap();
        SessionStore::new(keys, idle, Duration::from_secs(24 * 60 * 60))
    }

    fn student() -> SessionUser {
        SessionUser {
            id: 7,
            username: "Noura".into(),
            email: "201012345@psu.edu.sa".into(),
            role: Role::Student,
        }
    }

    #[test]
    fn idleness_is_strictly_past_the_window() {
        let start = Instant::now();
        let window = Duration::from_secs(15 * 60);
        assert!(!is_idle(start, start + window, window));
        assert!(is_idle(start, start + window + Duration::from_secs(1), window));
        assert!(!is_idle(start + window, start, window));
    }

    #[tokio::test]
    async fn created_sessions_resolve_to_their_user() {
        let sessions = store(Duration::from_secs(900));
        let token = sessions.create(student()).await.unwrap();
        let (_, user) = sessions.resolve(&token).await.unwrap();
        assert_eq!(user, student());
    }

    #[tokio::test]
    async fn destroyed_sessions_are_gone() {
        let sessions = store(Duration::from_secs(900));
        let token = sessions.create(student()).await.unwrap();
        let (sid, _) = sessions.resolve(&token).await.unwrap();
        sessions.destroy(&sid).await;
        assert_eq!(sessions.resolve(&token).await, Err(SessionError::Missing));
    }

    #[tokio::test]
    async fn forged_tokens_are_rejected() {
        let sessions = store(Duration::from_secs(900));
        assert_eq!(sessions.resolve("not-a-jwt").await, Err(SessionError::Missing));

        let other = Keys::from_base64_secret("b3RoZXItc2VjcmV0").unwrap();
        let forged = auth::generate_jwt(&other, "abc", Duration::from_secs(60)).unwrap();
        assert_eq!(sessions.resolve(&forged).await, Err(SessionError::Missing));
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let sessions = store(Duration::from_millis(1));
        let token = sessions.create(student()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sessions.resolve(&token).await, Err(SessionError::Idle));
        assert_eq!(sessions.resolve(&token).await, Err(SessionError::Missing));
    }

    #[tokio::test]
    async fn notices_are_shown_once() {
        let sessions = store(Duration::from_secs(900));
        let token = sessions.create(student()).await.unwrap();
        let (sid, _) = sessions.resolve(&token).await.unwrap();
        sessions.push_notice(&sid, "Subscribed!").await;
        assert_eq!(sessions.take_notices(&sid).await, vec!["Subscribed!".to_string()]);
        assert!(sessions.take_notices(&sid).await.is_empty());
    }

    #[tokio::test]
    async fn purge_drops_idle_sessions() {
        let sessions = store(Duration::from_millis(1));
        sessions.create(student()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sessions.purge_idle().await, 1);
    }

    #[tokio::test]
    async fn purged_sessions_still_report_inactivity() {
        let sessions = store(Duration::from_millis(5));
        let token = sessions.create(student()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sessions.purge_idle().await, 1);
        assert_eq!(sessions.resolve(&token).await, Err(SessionError::Idle));
        assert_eq!(sessions.resolve(&token).await, Err(SessionError::Missing));
    }
}
