//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use herald_shared::{
    BroadcastId, BroadcastStatus, Direction, ExternalId, GroupId, MessageId, UserId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Account reference on the external chat network, owned by exactly one user.
///
/// `external_id` never changes after registration; the remaining fields are
/// denormalized display data refreshed from inbound events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdentity {
    pub external_id: ExternalId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub language_code: Option<String>,
    pub is_bot: bool,
    pub created_at: DateTime<Utc>,
}

/// Display data carried by an inbound event or a registration request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProfile {
    pub external_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub language_code: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

/// An end-user reachable through the chat network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: Option<String>,
    pub telephone: Option<String>,
    pub region: Option<String>,
    pub comment: Option<String>,
    /// Public handle entered by an operator, used when no identity is linked.
    pub handle: Option<String>,
    /// Set once a delivery reports that the user blocked the bot.
    pub blocked: bool,
    pub identity: Option<ExternalIdentity>,
    pub group_ids: Vec<GroupId>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Public handle to fall back on: the identity's username first, then
    /// the operator-entered handle.
    pub fn public_handle(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .and_then(|identity| identity.username.as_deref())
            .or(self.handle.as_deref())
            .filter(|handle| !handle.trim().is_empty())
    }

    /// Best human-readable label for logs and operator notices.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.identity.as_ref().and_then(|i| i.first_name.clone()))
            .or_else(|| self.public_handle().map(|h| format!("@{}", h.trim_start_matches('@'))))
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: Option<String>,
    pub telephone: Option<String>,
    pub region: Option<String>,
    pub comment: Option<String>,
    pub handle: Option<String>,
    pub identity: Option<IdentityProfile>,
    #[serde(default)]
    pub group_ids: Vec<GroupId>,
}

/// Partial update. `None` leaves a field untouched; `group_ids` replaces the
/// whole membership set when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub name: Option<String>,
    pub telephone: Option<String>,
    pub region: Option<String>,
    pub comment: Option<String>,
    pub handle: Option<String>,
    pub group_ids: Option<Vec<GroupId>>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A named collection of users targeted by broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub member_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Broadcast {
    pub id: BroadcastId,
    pub name: String,
    pub message: String,
    /// Durable media URLs attached to the message.
    pub images: Vec<String>,
    pub status: BroadcastStatus,
    /// Groups originally targeted. Groups deleted since are absent.
    pub group_ids: Vec<GroupId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub name: String,
    pub message: String,
    pub images: Vec<String>,
    pub status: BroadcastStatus,
    pub group_ids: Vec<GroupId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastUpdate {
    pub name: Option<String>,
    pub message: Option<String>,
    pub group_ids: Option<Vec<GroupId>>,
}

/// Outcome of one recipient attempt within a broadcast.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Delivered,
    Blocked,
    Transient,
    Unknown,
    /// The user had no external identity to deliver to.
    Unreachable,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Blocked => "blocked",
            Self::Transient => "transient",
            Self::Unknown => "unknown",
            Self::Unreachable => "unreachable",
        }
    }
}

impl FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(Self::Delivered),
            "blocked" => Ok(Self::Blocked),
            "transient" => Ok(Self::Transient),
            "unknown" => Ok(Self::Unknown),
            "unreachable" => Ok(Self::Unreachable),
            other => Err(format!("unknown attempt outcome: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub broadcast_id: BroadcastId,
    pub user_id: UserId,
    pub outcome: AttemptOutcome,
    pub detail: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One entry of a user's conversation log. Only `is_read` changes after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub user_id: UserId,
    pub content: String,
    pub direction: Direction,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
