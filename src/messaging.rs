//! Who may talk to whom, and message delivery.
//!
//! A message has exactly one addressing mode: a direct recipient, a club's
//! group room, or an admin broadcast to a role audience. Messages are stored
//! first and then published on the hub, so clients that miss the live push
//! still find them in the history.

use crate::{
    error::{AppError, AppResult},
    models::{Audience, Message, MessageType, Role},
    queries,
    realtime::{Hub, Topic},
    schema::*,
    session::SessionUser,
};
use axum::http::StatusCode;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;

pub const MAX_MESSAGE_LEN: usize = 2000;
const HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Direct { receiver_id: i32 },
    ClubRoom { club_id: i32 },
    Broadcast { audience: Audience },
}

impl Addressing {
    fn message_type(&self) -> MessageType {
        match self {
            Addressing::Direct { .. } => MessageType::Direct,
            Addressing::ClubRoom { .. } => MessageType::Group,
            Addressing::Broadcast { .. } => MessageType::Broadcast,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub receiver_id: Option<i32>,
    pub club_id: Option<i32>,
    pub admin_target: Option<Audience>,
    pub message: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Message cannot be empty!")]
    Empty,
    #[error("Message is too long!")]
    TooLong,
    #[error("Choose exactly one recipient!")]
    Addressing,
    #[error("You are not allowed to message this recipient")]
    NotAllowed,
    #[error("Recipient not found")]
    UnknownRecipient,
}

impl MessagingError {
    pub fn rejection(self) -> AppError {
        let msg = self.to_string();
        match self {
            MessagingError::Empty | MessagingError::TooLong | MessagingError::Addressing => {
                AppError::invalid(msg)
            }
            MessagingError::NotAllowed => AppError::from(StatusCode::FORBIDDEN, msg),
            MessagingError::UnknownRecipient => AppError::from(StatusCode::NOT_FOUND, msg),
        }
    }
}

impl SendMessage {
    pub fn addressing(&self) -> Result<Addressing, MessagingError> {
        match (self.receiver_id, self.club_id, self.admin_target) {
            (Some(receiver_id), None, None) => Ok(Addressing::Direct { receiver_id }),
            (None, Some(club_id), None) => Ok(Addressing::ClubRoom { club_id }),
            (None, None, Some(audience)) => Ok(Addressing::Broadcast { audience }),
            _ => Err(MessagingError::Addressing),
        }
    }

    /// Trimmed message text.
    pub fn text(&self) -> Result<&str, MessagingError> {
        let text = self.message.trim();
        if text.is_empty() {
            Err(MessagingError::Empty)
        } else if text.chars().count() > MAX_MESSAGE_LEN {
            Err(MessagingError::TooLong)
        } else {
            Ok(text)
        }
    }
}

/// What the database knows about the other end of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetFacts {
    /// Role and verification flag of the receiving account (the club, for
    /// room messages).
    pub receiver: Option<(Role, bool)>,
    /// Whether the student side of the conversation subscribes to the club
    /// side.
    pub subscribed: bool,
}

/// The (student, club) pair whose subscription gates a conversation.
pub fn subscription_pair(
    sender: &SessionUser,
    addressing: Addressing,
    receiver_role: Option<Role>,
) -> Option<(i32, i32)> {
    match (sender.role, addressing, receiver_role) {
        (Role::Student, Addressing::Direct { receiver_id }, Some(Role::Club)) => {
            Some((sender.id, receiver_id))
        }
        (Role::Student, Addressing::ClubRoom { club_id }, _) => Some((sender.id, club_id)),
        (Role::Club, Addressing::Direct { receiver_id }, Some(Role::Student)) => {
            Some((receiver_id, sender.id))
        }
        _ => None,
    }
}

pub fn permits(sender: &SessionUser, addressing: Addressing, facts: TargetFacts) -> bool {
    let receiver_role = facts.receiver.map(|(role, _)| role);
    match (sender.role, addressing) {
        (Role::Student, Addressing::Direct { .. } | Addressing::ClubRoom { .. }) => {
            receiver_role == Some(Role::Club) && facts.subscribed
        }
        (Role::Club, Addressing::Direct { .. }) => match receiver_role {
            Some(Role::Student) => facts.subscribed,
            Some(Role::Admin) => true,
            _ => false,
        },
        (Role::Club, Addressing::ClubRoom { club_id }) => club_id == sender.id,
        (Role::Admin, Addressing::Direct { .. }) => match facts.receiver {
            Some((Role::Student, verified)) => verified,
            Some((Role::Club, _)) => true,
            _ => false,
        },
        (Role::Admin, Addressing::Broadcast { .. }) => true,
        _ => false,
    }
}

/// Topics a connection listens to without asking.
pub fn default_topics(user: &SessionUser, subscribed_clubs: &[i32]) -> Vec<Topic> {
    let mut topics = vec![Topic::User(user.id)];
    match user.role {
        Role::Student => {
            topics.push(Topic::Broadcast(Audience::Students));
            topics.extend(subscribed_clubs.iter().map(|&id| Topic::Club(id)));
        }
        Role::Club => {
            topics.push(Topic::Club(user.id));
            topics.push(Topic::Broadcast(Audience::Clubs));
        }
        Role::Admin => {
            topics.push(Topic::Broadcast(Audience::Students));
            topics.push(Topic::Broadcast(Audience::Clubs));
        }
        Role::Dean => {}
    }
    topics
}

/// Whether `user` may listen on `topic`. Mirrors [`permits`]: you can hear
/// what you could have been sent.
pub fn may_join(user: &SessionUser, topic: Topic, subscribed_clubs: &[i32]) -> bool {
    match topic {
        Topic::User(id) => id == user.id,
        Topic::Club(id) => match user.role {
            Role::Student => subscribed_clubs.contains(&id),
            Role::Club => id == user.id,
            Role::Admin | Role::Dean => false,
        },
        Topic::Broadcast(audience) => {
            user.role == Role::Admin || user.role.audience() == Some(audience)
        }
    }
}

async fn target_facts(
    conn: &mut AsyncPgConnection,
    sender: &SessionUser,
    addressing: Addressing,
) -> AppResult<TargetFacts> {
    let receiver_id = match addressing {
        Addressing::Direct { receiver_id } => receiver_id,
        Addressing::ClubRoom { club_id } => club_id,
        Addressing::Broadcast { .. } => return Ok(TargetFacts::default()),
    };

    let receiver = users::table
        .find(receiver_id)
        .select((users::role, users::is_verified))
        .first::<(Role, bool)>(conn)
        .await
        .optional()?;
    let Some(receiver) = receiver else {
        return Err(MessagingError::UnknownRecipient.rejection());
    };

    let subscribed = match subscription_pair(sender, addressing, Some(receiver.0)) {
        Some((student_id, club_id)) => queries::is_subscribed(conn, student_id, club_id).await?,
        None => false,
    };
    Ok(TargetFacts {
        receiver: Some(receiver),
        subscribed,
    })
}

/// Validates, authorizes, stores and publishes a message.
pub async fn send(
    conn: &mut AsyncPgConnection,
    hub: &Hub,
    sender: &SessionUser,
    req: &SendMessage,
) -> AppResult<Message> {
    let text = req.text().map_err(MessagingError::rejection)?;
    let addressing = req.addressing().map_err(MessagingError::rejection)?;

    let facts = target_facts(conn, sender, addressing).await?;
    if !permits(sender, addressing, facts) {
        return Err(MessagingError::NotAllowed.rejection());
    }

    let (receiver_id, club_id, admin_target) = match addressing {
        Addressing::Direct { receiver_id } => (Some(receiver_id), None, None),
        Addressing::ClubRoom { club_id } => (None, Some(club_id), None),
        Addressing::Broadcast { audience } => (None, None, Some(audience)),
    };
    let message = diesel::insert_into(messages::table)
        .values((
            messages::sender_id.eq(sender.id),
            messages::receiver_id.eq(receiver_id),
            messages::club_id.eq(club_id),
            messages::message.eq(text),
            messages::message_type.eq(addressing.message_type()),
            messages::admin_target.eq(admin_target),
        ))
        .get_result::<Message>(conn)
        .await?;

    let delivered = match addressing {
        Addressing::Direct { receiver_id } => {
            hub.message(Topic::User(receiver_id), message.clone()).await
                + hub.message(Topic::User(sender.id), message.clone()).await
        }
        Addressing::ClubRoom { club_id } => hub.message(Topic::Club(club_id), message.clone()).await,
        Addressing::Broadcast { audience } => {
            hub.message(Topic::Broadcast(audience), message.clone()).await
        }
    };
    tracing::debug!(id = message.id, sender = sender.id, ?addressing, delivered, "message sent");

    Ok(message)
}

/// Both directions of a one-to-one conversation, oldest first.
pub async fn direct_history(
    conn: &mut AsyncPgConnection,
    me: i32,
    other: i32,
) -> AppResult<Vec<Message>> {
    let mut history = messages::table
        .filter(messages::message_type.eq(MessageType::Direct))
        .filter(
            messages::sender_id
                .eq(me)
                .and(messages::receiver_id.eq(other))
                .or(messages::sender_id.eq(other).and(messages::receiver_id.eq(me))),
        )
        .order(messages::created_at.desc())
        .limit(HISTORY_LIMIT)
        .load::<Message>(conn)
        .await?;
    history.reverse();
    Ok(history)
}

pub async fn club_history(conn: &mut AsyncPgConnection, club_id: i32) -> AppResult<Vec<Message>> {
    let mut history = messages::table
        .filter(messages::message_type.eq(MessageType::Group))
        .filter(messages::club_id.eq(club_id))
        .order(messages::created_at.desc())
        .limit(HISTORY_LIMIT)
        .load::<Message>(conn)
        .await?;
    history.reverse();
    Ok(history)
}

/// Broadcasts to `audiences`, oldest first.
pub async fn broadcast_history(
    conn: &mut AsyncPgConnection,
    audiences: &[Audience],
) -> AppResult<Vec<Message>> {
    let mut history = messages::table
        .filter(messages::message_type.eq(MessageType::Broadcast))
        .filter(messages::admin_target.eq_any(audiences.to_vec()))
        .order(messages::created_at.desc())
        .limit(HISTORY_LIMIT)
        .load::<Message>(conn)
        .await?;
    history.reverse();
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i32, role: Role) -> SessionUser {
        SessionUser {
            id,
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
            role,
        }
    }

    fn facts(role: Role, verified: bool, subscribed: bool) -> TargetFacts {
        TargetFacts {
            receiver: Some((role, verified)),
            subscribed,
        }
    }

    fn request(receiver_id: Option<i32>, club_id: Option<i32>, admin_target: Option<Audience>) -> SendMessage {
        SendMessage {
            receiver_id,
            club_id,
            admin_target,
            message: "hello".into(),
        }
    }

    #[test]
    fn exactly_one_address_is_required() {
        assert_eq!(
            request(Some(2), None, None).addressing(),
            Ok(Addressing::Direct { receiver_id: 2 })
        );
        assert_eq!(
            request(None, None, Some(Audience::Clubs)).addressing(),
            Ok(Addressing::Broadcast { audience: Audience::Clubs })
        );
        assert_eq!(request(None, None, None).addressing(), Err(MessagingError::Addressing));
        assert_eq!(
            request(Some(2), Some(3), None).addressing(),
            Err(MessagingError::Addressing)
        );
    }

    #[test]
    fn blank_and_oversized_messages_are_refused() {
        let mut req = request(Some(2), None, None);
        req.message = "   ".into();
        assert_eq!(req.text(), Err(MessagingError::Empty));
        req.message = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert_eq!(req.text(), Err(MessagingError::TooLong));
        req.message = "  see you there ".into();
        assert_eq!(req.text(), Ok("see you there"));
    }

    #[test]
    fn students_reach_subscribed_clubs_only() {
        let student = user(1, Role::Student);
        let direct = Addressing::Direct { receiver_id: 5 };
        let room = Addressing::ClubRoom { club_id: 5 };

        assert!(permits(&student, direct, facts(Role::Club, true, true)));
        assert!(permits(&student, room, facts(Role::Club, true, true)));
        assert!(!permits(&student, direct, facts(Role::Club, true, false)));
        assert!(!permits(&student, direct, facts(Role::Student, true, true)));
        assert!(!permits(&student, direct, facts(Role::Admin, true, false)));
        assert!(!permits(
            &student,
            Addressing::Broadcast { audience: Audience::Students },
            TargetFacts::default()
        ));
    }

    #[test]
    fn clubs_reach_subscribers_admins_and_their_room() {
        let club = user(5, Role::Club);
        let direct = Addressing::Direct { receiver_id: 1 };

        assert!(permits(&club, direct, facts(Role::Student, true, true)));
        assert!(!permits(&club, direct, facts(Role::Student, true, false)));
        assert!(permits(&club, direct, facts(Role::Admin, true, false)));
        assert!(!permits(&club, direct, facts(Role::Club, true, false)));
        assert!(permits(&club, Addressing::ClubRoom { club_id: 5 }, facts(Role::Club, true, false)));
        assert!(!permits(&club, Addressing::ClubRoom { club_id: 6 }, facts(Role::Club, true, false)));
    }

    #[test]
    fn admins_reach_verified_students_clubs_and_broadcasts() {
        let admin = user(9, Role::Admin);
        let direct = Addressing::Direct { receiver_id: 1 };

        assert!(permits(&admin, direct, facts(Role::Student, true, false)));
        assert!(!permits(&admin, direct, facts(Role::Student, false, false)));
        assert!(permits(&admin, direct, facts(Role::Club, true, false)));
        assert!(!permits(&admin, direct, facts(Role::Dean, true, false)));
        assert!(permits(
            &admin,
            Addressing::Broadcast { audience: Audience::Clubs },
            TargetFacts::default()
        ));
        assert!(!permits(&admin, Addressing::ClubRoom { club_id: 5 }, facts(Role::Club, true, false)));
    }

    #[test]
    fn deans_do_not_message() {
        let dean = user(10, Role::Dean);
        assert!(!permits(&dean, Addressing::Direct { receiver_id: 1 }, facts(Role::Student, true, true)));
        assert!(!permits(
            &dean,
            Addressing::Broadcast { audience: Audience::Students },
            TargetFacts::default()
        ));
    }

    #[test]
    fn subscription_pairs_put_the_student_first() {
        let student = user(1, Role::Student);
        let club = user(5, Role::Club);
        assert_eq!(
            subscription_pair(&student, Addressing::Direct { receiver_id: 5 }, Some(Role::Club)),
            Some((1, 5))
        );
        assert_eq!(
            subscription_pair(&club, Addressing::Direct { receiver_id: 1 }, Some(Role::Student)),
            Some((1, 5))
        );
        assert_eq!(
            subscription_pair(&club, Addressing::Direct { receiver_id: 9 }, Some(Role::Admin)),
            None
        );
    }

    #[test]
    fn joins_follow_the_messaging_rules() {
        let student = user(1, Role::Student);
        let club = user(5, Role::Club);
        let admin = user(9, Role::Admin);

        assert!(may_join(&student, Topic::Club(5), &[5]));
        assert!(!may_join(&student, Topic::Club(6), &[5]));
        assert!(!may_join(&student, Topic::User(2), &[]));
        assert!(may_join(&student, Topic::Broadcast(Audience::Students), &[]));
        assert!(!may_join(&student, Topic::Broadcast(Audience::Clubs), &[]));

        assert!(may_join(&club, Topic::Club(5), &[]));
        assert!(!may_join(&club, Topic::Club(6), &[]));

        assert!(may_join(&admin, Topic::Broadcast(Audience::Clubs), &[]));
        assert!(!may_join(&admin, Topic::Club(5), &[]));
    }

    #[test]
    fn default_topics_by_role() {
        let student = user(1, Role::Student);
        assert_eq!(
            default_topics(&student, &[5, 6]),
            vec![
                Topic::User(1),
                Topic::Broadcast(Audience::Students),
                Topic::Club(5),
                Topic::Club(6)
            ]
        );
        for topic in default_topics(&student, &[5, 6]) {
            assert!(may_join(&student, topic, &[5, 6]));
        }
        assert_eq!(default_topics(&user(10, Role::Dean), &[]), vec![Topic::User(10)]);
    }
}
