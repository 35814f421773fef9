//! In-process publish/subscribe for chat delivery and notifications.
//!
//! Delivery is best effort: a publish reaches whoever is subscribed at that
//! moment, slow receivers lose the oldest items, and nothing is retried.
//! Clients that were away read the history endpoints instead.

use crate::models::{Audience, Message};
use serde::Serialize;
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};
use tokio::sync::{broadcast, Mutex};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Direct messages and notices for one account.
    User(i32),
    /// A club's group room.
    Club(i32),
    Broadcast(Audience),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown topic `{0}`")]
pub struct UnknownTopic(String);

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::User(id) => write!(f, "user:{id}"),
            Topic::Club(id) => write!(f, "club:{id}"),
            Topic::Broadcast(Audience::Students) => f.write_str("student_broadcast"),
            Topic::Broadcast(Audience::Clubs) => f.write_str("club_broadcast"),
        }
    }
}

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownTopic(s.to_string());
        match s {
            "student_broadcast" => return Ok(Topic::Broadcast(Audience::Students)),
            "club_broadcast" => return Ok(Topic::Broadcast(Audience::Clubs)),
            _ => {}
        }
        let (kind, id) = s.split_once(':').ok_or_else(unknown)?;
        let id = id.parse::<i32>().map_err(|_| unknown())?;
        match kind {
            "user" => Ok(Topic::User(id)),
            "club" => Ok(Topic::Club(id)),
            _ => Err(unknown()),
        }
    }
}

/// Payload pushed to websocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outgoing {
    Message {
        topic: String,
        message: Message,
    },
    #[serde(rename_all = "camelCase")]
    Notification {
        topic: String,
        club_id: i32,
        kind: String,
        title: Option<String>,
    },
    /// The student left the club; its room stops being forwarded.
    #[serde(rename_all = "camelCase")]
    Unsubscribed { topic: String, club_id: i32 },
}

impl Outgoing {
    /// A topic the receiving connection has to stop forwarding.
    pub fn revoked_topic(&self) -> Option<Topic> {
        match self {
            Outgoing::Unsubscribed { club_id, .. } => Some(Topic::Club(*club_id)),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct Hub {
    channels: Arc<Mutex<HashMap<Topic, broadcast::Sender<Arc<Outgoing>>>>>,
}

impl Hub {
    pub fn new() -> Hub {
        Hub::default()
    }

    pub async fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Arc<Outgoing>> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Returns how many receivers got the item.
    pub async fn publish(&self, topic: Topic, item: Outgoing) -> usize {
        let mut channels = self.channels.lock().await;
        let Some(sender) = channels.get(&topic) else {
            return 0;
        };
        match sender.send(Arc::new(item)) {
            Ok(n) => n,
            Err(_) => {
                // every receiver is gone
                channels.remove(&topic);
                0
            }
        }
    }

    /// Drops topics nobody listens to any more. Returns how many went.
    pub async fn prune(&self) -> usize {
        let mut channels = self.channels.lock().await;
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    pub async fn message(&self, topic: Topic, message: Message) -> usize {
        let item = Outgoing::Message {
            topic: topic.to_string(),
            message,
        };
        self.publish(topic, item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use chrono::Utc;

    fn chat(id: i32, club_id: i32) -> Message {
        Message {
            id,
            sender_id: 3,
            receiver_id: None,
            club_id: Some(club_id),
            message: "meeting at 5".into(),
            message_type: MessageType::Group,
            admin_target: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn topics_have_stable_names() {
        for topic in [
            Topic::User(4),
            Topic::Club(12),
            Topic::Broadcast(Audience::Students),
            Topic::Broadcast(Audience::Clubs),
        ] {
            assert_eq!(topic.to_string().parse::<Topic>(), Ok(topic));
        }
        assert_eq!(Topic::Broadcast(Audience::Students).to_string(), "student_broadcast");
        assert_eq!(Topic::Club(12).to_string(), "club:12");
    }

    #[test]
    fn malformed_topics_are_rejected() {
        for raw in ["club", "club:x", "room:1", "admin_broadcast", ""] {
            assert!(raw.parse::<Topic>().is_err(), "{raw} should not parse");
        }
    }

    #[tokio::test]
    async fn subscribers_receive_their_topic_only() {
        let hub = Hub::new();
        let mut club = hub.subscribe(Topic::Club(1)).await;
        let mut other = hub.subscribe(Topic::Club(2)).await;

        assert_eq!(hub.message(Topic::Club(1), chat(10, 1)).await, 1);

        match &*club.recv().await.unwrap() {
            Outgoing::Message { topic, message } => {
                assert_eq!(topic, "club:1");
                assert_eq!(message.id, 10);
            }
            unexpected => panic!("unexpected {unexpected:?}"),
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_without_listeners_is_a_no_op() {
        let hub = Hub::new();
        assert_eq!(hub.message(Topic::User(9), chat(1, 1)).await, 0);

        let rx = hub.subscribe(Topic::User(9)).await;
        drop(rx);
        assert_eq!(hub.message(Topic::User(9), chat(2, 1)).await, 0);
        assert!(hub.channels.lock().await.get(&Topic::User(9)).is_none());
    }

    #[tokio::test]
    async fn abandoned_topics_are_pruned() {
        let hub = Hub::new();
        let kept = hub.subscribe(Topic::Club(1)).await;
        drop(hub.subscribe(Topic::Club(2)).await);

        assert_eq!(hub.prune().await, 1);
        let channels = hub.channels.lock().await;
        assert!(channels.contains_key(&Topic::Club(1)));
        assert!(!channels.contains_key(&Topic::Club(2)));
        drop(kept);
    }

    #[test]
    fn unsubscribing_revokes_the_club_room() {
        let notice = Outgoing::Unsubscribed {
            topic: Topic::User(4).to_string(),
            club_id: 9,
        };
        assert_eq!(notice.revoked_topic(), Some(Topic::Club(9)));
        assert_eq!(
            serde_json::to_value(&notice).unwrap(),
            serde_json::json!({"type": "unsubscribed", "topic": "user:4", "clubId": 9})
        );

        let message = Outgoing::Message {
            topic: "club:9".into(),
            message: chat(1, 9),
        };
        assert_eq!(message.revoked_topic(), None);
    }
}
