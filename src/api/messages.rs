use crate::{
    auth::RequestContext,
    error::{AppError, AppResult},
    messaging::{self, SendMessage},
    models::{Audience, Message, Role},
    queries,
    realtime::{Hub, Outgoing, Topic},
    session::SessionUser,
    DbPool,
};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path,
    },
    response::Response,
    routing::{get, post},
    Extension, Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

#[derive(Serialize)]
struct History {
    messages: Vec<Message>,
}

async fn send(
    Extension(pool): Extension<DbPool>,
    Extension(hub): Extension<Hub>,
    ctx: RequestContext,
    Json(req): Json<SendMessage>,
) -> AppResult<Json<Message>> {
    let conn = &mut pool.get().await?;
    let message = messaging::send(conn, &hub, &ctx.user, &req).await?;
    Ok(Json(message))
}

async fn direct(
    Extension(pool): Extension<DbPool>,
    ctx: RequestContext,
    Path(user_id): Path<i32>,
) -> AppResult<Json<History>> {
    let conn = &mut pool.get().await?;
    let messages = messaging::direct_history(conn, ctx.id(), user_id).await?;
    Ok(Json(History { messages }))
}

async fn club_room(
    Extension(pool): Extension<DbPool>,
    ctx: RequestContext,
    Path(club_id): Path<i32>,
) -> AppResult<Json<History>> {
    let subscribed = subscribed_clubs(&pool, &ctx.user).await?;
    if !messaging::may_join(&ctx.user, Topic::Club(club_id), &subscribed) {
        return Err(AppError::forbidden());
    }
    let conn = &mut pool.get().await?;
    let messages = messaging::club_history(conn, club_id).await?;
    Ok(Json(History { messages }))
}

async fn broadcasts(
    Extension(pool): Extension<DbPool>,
    ctx: RequestContext,
) -> AppResult<Json<History>> {
    let audiences = match ctx.role() {
        Role::Admin => vec![Audience::Students, Audience::Clubs],
        role => role.audience().into_iter().collect(),
    };
    if audiences.is_empty() {
        return Ok(Json(History { messages: vec![] }));
    }
    let conn = &mut pool.get().await?;
    let messages = messaging::broadcast_history(conn, &audiences).await?;
    Ok(Json(History { messages }))
}

async fn subscribed_clubs(pool: &DbPool, user: &SessionUser) -> AppResult<Vec<i32>> {
    if user.role != Role::Student {
        return Ok(vec![]);
    }
    let conn = &mut pool.get().await?;
    queries::subscribed_club_ids(conn, user.id).await
}

/// Frames a client may send over the socket.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Incoming {
    Join { topic: String },
    Leave { topic: String },
}

pub async fn websocket(
    ws: WebSocketUpgrade,
    ctx: RequestContext,
    Extension(pool): Extension<DbPool>,
    Extension(hub): Extension<Hub>,
) -> AppResult<Response> {
    let subscribed = subscribed_clubs(&pool, &ctx.user).await?;
    let user = ctx.user;
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, user, pool, hub, subscribed)))
}

/// Pumps one topic into the connection's outbound queue.
fn forward(
    mut rx: broadcast::Receiver<Arc<Outgoing>>,
    tx: mpsc::UnboundedSender<Arc<Outgoing>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(item) => {
                    if tx.send(item).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "websocket client lagging behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn serve_socket(
    socket: WebSocket,
    user: SessionUser,
    pool: DbPool,
    hub: Hub,
    mut subscribed: Vec<i32>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Outgoing>>();

    let mut topics: HashMap<Topic, JoinHandle<()>> = HashMap::new();
    for topic in messaging::default_topics(&user, &subscribed) {
        topics.insert(topic, forward(hub.subscribe(topic).await, tx.clone()));
    }
    tracing::debug!(user = user.id, topics = topics.len(), "websocket connected");

    let (revoked_tx, mut revoked) = mpsc::unbounded_channel::<Topic>();
    let writer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            if let Some(topic) = item.revoked_topic() {
                let _ = revoked_tx.send(topic);
            }
            let text = match serde_json::to_string(&*item) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("failed to encode websocket payload: {e}");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            Some(topic) = revoked.recv() => {
                if let Some(handle) = topics.remove(&topic) {
                    handle.abort();
                }
                if let Topic::Club(id) = topic {
                    subscribed.retain(|club| *club != id);
                }
                tracing::debug!(user = user.id, %topic, "topic revoked");
                continue;
            }
        };
        let Some(Ok(frame)) = frame else {
            break;
        };
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let request = match serde_json::from_str::<Incoming>(&text) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(user = user.id, "ignoring websocket frame: {e}");
                continue;
            }
        };

        match request {
            Incoming::Join { topic } => {
                let Ok(topic) = topic.parse::<Topic>() else {
                    continue;
                };
                if topics.contains_key(&topic) {
                    continue;
                }
                // the student may have subscribed since connecting
                if matches!(topic, Topic::Club(_)) && user.role == Role::Student {
                    match subscribed_clubs(&pool, &user).await {
                        Ok(ids) => subscribed = ids,
                        Err(_) => tracing::error!(user = user.id, "failed to reload subscriptions"),
                    }
                }
                if messaging::may_join(&user, topic, &subscribed) {
                    topics.insert(topic, forward(hub.subscribe(topic).await, tx.clone()));
                    tracing::debug!(user = user.id, %topic, "joined topic");
                } else {
                    tracing::debug!(user = user.id, %topic, "join refused");
                }
            }
            Incoming::Leave { topic } => {
                if let Some(handle) = topic.parse::<Topic>().ok().and_then(|t| topics.remove(&t)) {
                    handle.abort();
                }
            }
        }
    }

    for (_, handle) in topics {
        handle.abort();
    }
    writer.abort();
    tracing::debug!(user = user.id, "websocket closed");
}

pub fn app() -> Router {
    Router::new()
        .route("/send", post(send))
        .route("/direct/:user_id", get(direct))
        .route("/club/:club_id", get(club_room))
        .route("/broadcasts", get(broadcasts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_frames() {
        assert_eq!(
            serde_json::from_str::<Incoming>(r#"{"type":"join","topic":"club:5"}"#).unwrap(),
            Incoming::Join {
                topic: "club:5".into()
            }
        );
        assert_eq!(
            serde_json::from_str::<Incoming>(r#"{"type":"leave","topic":"student_broadcast"}"#)
                .unwrap(),
            Incoming::Leave {
                topic: "student_broadcast".into()
            }
        );
        assert!(serde_json::from_str::<Incoming>(r#"{"type":"register","userId":1}"#).is_err());
    }
}
