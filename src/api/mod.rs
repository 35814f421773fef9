use crate::{auth::RequestContext, session::SessionStore};
use axum::{
    response::Redirect,
    routing::get,
    Json, Router,
};
use serde::Serialize;

pub mod admin;
pub mod auth;
pub mod club;
pub mod dean;
pub mod directory;
pub mod messages;
pub mod password;
pub mod profile;
pub mod review;
pub mod student;

pub fn app() -> Router {
    Router::new()
        .merge(auth::app())
        .merge(password::app())
        .merge(profile::app())
        .nest("/student", student::app())
        .nest("/club", club::app())
        .nest("/admin", admin::app())
        .nest("/dean", dean::app())
        .nest("/api", directory::app())
        .nest("/messages", messages::app())
        .route("/ws", get(messages::websocket))
}

/// A JSON view plus the notices queued on the session since the last one.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub notices: Vec<String>,
    #[serde(flatten)]
    pub view: T,
}

impl<T: Serialize> Page<T> {
    pub async fn render(sessions: &SessionStore, ctx: &RequestContext, view: T) -> Json<Page<T>> {
        Json(Page {
            notices: sessions.take_notices(&ctx.sid).await,
            view,
        })
    }
}

/// Queues `notice` and sends the browser to `path`.
pub async fn redirect_with_notice(
    sessions: &SessionStore,
    ctx: &RequestContext,
    path: &str,
    notice: &str,
) -> Redirect {
    sessions.push_notice(&ctx.sid, notice).await;
    Redirect::to(path)
}
