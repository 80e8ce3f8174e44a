use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a user record. Also the key of the user's relay room.
    UserId
);
uuid_id!(GroupId);
uuid_id!(BroadcastId);
uuid_id!(MessageId);

/// Numeric account id on the external chat network (a Telegram user id).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ExternalId(pub i64);

impl ExternalId {
    /// Deep link that opens a private chat with this account.
    pub fn deep_link(&self) -> String {
        format!("tg://user?id={}", self.0)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public profile link for a handle, with or without a leading `@`.
pub fn handle_link(handle: &str) -> String {
    format!("https://t.me/{}", handle.trim_start_matches('@'))
}

/// Which side of the conversation a message came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Sent by the end-user through the chat network.
    Incoming,
    /// Sent by an operator.
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "INCOMING",
            Self::Outgoing => "OUTGOING",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCOMING" => Ok(Self::Incoming),
            "OUTGOING" => Ok(Self::Outgoing),
            other => Err(format!("unknown message direction: {other}")),
        }
    }
}

/// Aggregate outcome of a broadcast. `InProgress` is the only non-terminal
/// state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastStatus {
    InProgress,
    Completed,
    Failed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl FromStr for BroadcastStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown broadcast status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_parse_trims_whitespace() {
        let id = UserId::new();
        let parsed: UserId = format!("  {id} ").parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_user_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn test_links() {
        assert_eq!(ExternalId(42).deep_link(), "tg://user?id=42");
        assert_eq!(handle_link("@alice"), "https://t.me/alice");
        assert_eq!(handle_link("bob"), "https://t.me/bob");
    }

    #[test]
    fn test_status_strings() {
        for status in [
            BroadcastStatus::InProgress,
            BroadcastStatus::Completed,
            BroadcastStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<BroadcastStatus>(), Ok(status));
        }
        assert!(!BroadcastStatus::InProgress.is_terminal());
        assert!(BroadcastStatus::Failed.is_terminal());
    }

    #[test]
    fn test_direction_serializes_uppercase() {
        let json = serde_json::to_string(&Direction::Outgoing).unwrap();
        assert_eq!(json, "\"OUTGOING\"");
    }
}
