//! Relay Session Registry.
//!
//! Keeps three parties in sync for each user: the external chat network,
//! the conversation log, and the live operator sessions joined to the
//! user's room. Everything arrives as a [`RelayEvent`] and goes through
//! [`Relay::dispatch`].
//!
//! Rooms are keyed by user id, live only in memory, and are removed when
//! their last session leaves. A message is always appended to the log before
//! it is emitted to a room.

use std::collections::{HashMap, HashSet};

use herald_shared::protocol::{RoomMessage, ServerFrame};
use herald_shared::{Direction, UserId};
use herald_store::{IdentityProfile, Message, StoreError, User};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::ConversationStore;
use crate::db::SharedDb;
use crate::delivery::UserDelivery;
use crate::ops::OpsNotifier;

pub type SessionId = Uuid;

#[derive(Debug)]
pub enum RelayEvent {
    /// A live session opened; frames for it go to `outbox`.
    Connected {
        session: SessionId,
        outbox: mpsc::Sender<ServerFrame>,
    },
    Disconnected {
        session: SessionId,
    },
    /// A text message from the external chat network.
    InboundMessage {
        profile: IdentityProfile,
        text: String,
    },
    JoinRoom {
        session: SessionId,
        user_id: UserId,
    },
    LeaveRoom {
        session: SessionId,
        user_id: UserId,
    },
    /// An operator message to a user.
    OutboundSend {
        session: SessionId,
        user_id: UserId,
        text: String,
    },
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("User not found")]
    UserNotFound,

    #[error("Unknown session")]
    UnknownSession,

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => RelayError::UserNotFound,
            other => RelayError::Store(other),
        }
    }
}

struct Session {
    outbox: mpsc::Sender<ServerFrame>,
    rooms: HashSet<UserId>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Session>,
    rooms: HashMap<UserId, HashSet<SessionId>>,
}

impl Registry {
    fn join(&mut self, session_id: SessionId, room: UserId) -> Result<usize, RelayError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(RelayError::UnknownSession)?;
        session.rooms.insert(room);

        let members = self.rooms.entry(room).or_default();
        members.insert(session_id);
        Ok(members.len())
    }

    fn leave(&mut self, session_id: SessionId, room: UserId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.rooms.remove(&room);
        }

        let now_empty = match self.rooms.get_mut(&room) {
            Some(members) => {
                members.remove(&session_id);
                members.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.rooms.remove(&room);
            debug!(room = %room, "Removed empty room");
        }
    }

    fn remove_session(&mut self, session_id: SessionId) {
        let Some(session) = self.sessions.remove(&session_id) else {
            return;
        };
        for room in session.rooms {
            self.leave(session_id, room);
        }
    }

    fn is_member(&self, session_id: SessionId, room: UserId) -> bool {
        self.rooms
            .get(&room)
            .is_some_and(|members| members.contains(&session_id))
    }

    /// Queue `frame` for every session in `room` except `except`. Full
    /// queues drop the frame. Returns how many sessions accepted it.
    fn emit(&self, room: UserId, frame: &ServerFrame, except: Option<SessionId>) -> usize {
        let Some(members) = self.rooms.get(&room) else {
            return 0;
        };

        let mut delivered = 0;
        for session_id in members {
            if Some(*session_id) == except {
                continue;
            }
            let Some(session) = self.sessions.get(session_id) else {
                continue;
            };
            if session.outbox.try_send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(room = %room, session = %session_id, "Dropping frame for slow session");
            }
        }
        delivered
    }
}

pub struct Relay {
    registry: RwLock<Registry>,
    db: SharedDb,
    conversations: ConversationStore,
    delivery: UserDelivery,
    ops: OpsNotifier,
}

impl Relay {
    pub fn new(db: SharedDb, delivery: UserDelivery, ops: OpsNotifier) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            conversations: ConversationStore::new(db.clone()),
            db,
            delivery,
            ops,
        }
    }

    pub async fn dispatch(&self, event: RelayEvent) -> Result<(), RelayError> {
        match event {
            RelayEvent::Connected { session, outbox } => {
                self.connect(session, outbox).await;
                Ok(())
            }
            RelayEvent::Disconnected { session } => {
                self.disconnect(session).await;
                Ok(())
            }
            RelayEvent::InboundMessage { profile, text } => {
                self.inbound(&profile, &text).await.map(|_| ())
            }
            RelayEvent::JoinRoom { session, user_id } => self.join(session, user_id).await,
            RelayEvent::LeaveRoom { session, user_id } => {
                self.registry.write().await.leave(session, user_id);
                debug!(session = %session, room = %user_id, "Session left room");
                Ok(())
            }
            RelayEvent::OutboundSend {
                session,
                user_id,
                text,
            } => self.outbound(session, user_id, &text).await.map(|_| ()),
        }
    }

    async fn connect(&self, session: SessionId, outbox: mpsc::Sender<ServerFrame>) {
        let mut registry = self.registry.write().await;
        registry.sessions.insert(
            session,
            Session {
                outbox,
                rooms: HashSet::new(),
            },
        );
        info!(session = %session, sessions = registry.sessions.len(), "Session connected");
    }

    async fn disconnect(&self, session: SessionId) {
        let mut registry = self.registry.write().await;
        registry.remove_session(session);
        info!(session = %session, sessions = registry.sessions.len(), "Session disconnected");
    }

    /// Bind a session to a user's room. Rejoining is allowed.
    async fn join(&self, session: SessionId, user_id: UserId) -> Result<(), RelayError> {
        self.db.lock().await.get_user(user_id)?;
        let members = self.registry.write().await.join(session, user_id)?;
        info!(session = %session, room = %user_id, members, "Session joined room");
        Ok(())
    }

    /// Inbound path: register or refresh the identity, append INCOMING, then
    /// emit to the room.
    pub async fn inbound(
        &self,
        profile: &IdentityProfile,
        text: &str,
    ) -> Result<Message, RelayError> {
        let (user, created) = self.db.lock().await.upsert_identity(profile)?;
        let message = self
            .conversations
            .append(user.id, text, Direction::Incoming)
            .await?;

        let emitted = self
            .registry
            .read()
            .await
            .emit(user.id, &room_frame(&message), None);
        debug!(user = %user.id, emitted, "Inbound message relayed");

        if created {
            info!(user = %user.id, external_id = profile.external_id, "Registered new user");
            self.ops.spawn_notice(registration_notice(&user, profile));
        }
        Ok(message)
    }

    /// Outbound path: persist OUTGOING, emit to the other sessions in the
    /// room, deliver externally, and raise an integrity notice when the
    /// sending session is not in the room. External failures do not undo
    /// the persisted message.
    pub async fn outbound(
        &self,
        session: SessionId,
        user_id: UserId,
        text: &str,
    ) -> Result<Message, RelayError> {
        if text.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let user = self.db.lock().await.get_user(user_id)?;
        let message = self
            .conversations
            .append(user.id, text, Direction::Outgoing)
            .await?;

        let (emitted, in_room) = {
            let registry = self.registry.read().await;
            (
                registry.emit(user.id, &room_frame(&message), Some(session)),
                registry.is_member(session, user.id),
            )
        };
        debug!(user = %user.id, session = %session, emitted, "Outbound message relayed");

        let outcome = self.delivery.deliver_to_user(&user, text, &[]).await;
        if !outcome.is_delivered() {
            warn!(
                user = %user.id,
                outcome = ?outcome.attempt_outcome(),
                "Operator message not delivered externally"
            );
        }

        if !in_room {
            warn!(
                user = %user.id,
                session = %session,
                "Operator sent to a room it has not joined"
            );
            self.ops.spawn_notice(format!(
                "Notice: message for user {} was sent from outside their room",
                user.id
            ));
        }

        Ok(message)
    }

    #[cfg(test)]
    pub async fn room_size(&self, user_id: UserId) -> usize {
        self.registry
            .read()
            .await
            .rooms
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    pub async fn room_count(&self) -> usize {
        self.registry.read().await.rooms.len()
    }

    pub async fn session_count(&self) -> usize {
        self.registry.read().await.sessions.len()
    }
}

fn room_frame(message: &Message) -> ServerFrame {
    ServerFrame::New(RoomMessage {
        id: message.user_id,
        room_id: message.user_id,
        message_id: message.id,
        message: message.content.clone(),
        variant: message.direction,
        created_at: message.created_at,
    })
}

fn registration_notice(user: &User, profile: &IdentityProfile) -> String {
    format!(
        "New user registered\n\nUser: {}\nTelegram ID: {}\nBot: {}\n\
         Name: {}\nUsername: {}\nLanguage: {}",
        user.id,
        profile.external_id,
        if profile.is_bot { "yes" } else { "no" },
        profile.first_name.as_deref().unwrap_or("not set"),
        profile.username.as_deref().unwrap_or("not set"),
        profile.language_code.as_deref().unwrap_or("not set"),
    )
}
