//! The single "deliver to user" capability shared by the broadcast fan-out
//! and the relay's outbound path.
//!
//! [`ChatNetwork`] is the seam to the external chat network. The
//! [`DeliveryGateway`] turns one logical send into network calls and reports
//! a classified [`DeliveryFailure`]; it never retries. [`UserDelivery`] adds
//! the user-level policy on top: identity lookup and the `blocked` flag.

use std::sync::Arc;

use async_trait::async_trait;
use herald_shared::constants::MAX_CAPTION_LEN;
use herald_shared::ExternalId;
use herald_store::{AttemptOutcome, User};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::SharedDb;

/// Classified failure of a single outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    /// The recipient blocked the bot.
    #[error("recipient blocked the bot")]
    Blocked,

    /// Timeouts, connection errors, rate limiting and 5xx responses.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Unknown(String),
}

impl DeliveryFailure {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            DeliveryFailure::Blocked => AttemptOutcome::Blocked,
            DeliveryFailure::Transient(_) => AttemptOutcome::Transient,
            DeliveryFailure::Unknown(_) => AttemptOutcome::Unknown,
        }
    }
}

/// Inline URL button attached below a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

/// Minimal surface of a chat-network bot client.
#[async_trait]
pub trait ChatNetwork: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), DeliveryFailure>;

    /// Send one or more images, the first carrying `caption`.
    async fn send_photos(
        &self,
        chat_id: i64,
        urls: &[String],
        caption: Option<&str>,
    ) -> Result<(), DeliveryFailure>;
}

/// Stand-in used when no bot token is configured.
pub struct DisabledNetwork;

#[async_trait]
impl ChatNetwork for DisabledNetwork {
    async fn send_message(
        &self,
        chat_id: i64,
        _text: &str,
        _button: Option<&LinkButton>,
    ) -> Result<(), DeliveryFailure> {
        debug!(chat_id, "Chat network disabled, dropping message");
        Err(DeliveryFailure::Unknown("network disabled".into()))
    }

    async fn send_photos(
        &self,
        chat_id: i64,
        _urls: &[String],
        _caption: Option<&str>,
    ) -> Result<(), DeliveryFailure> {
        debug!(chat_id, "Chat network disabled, dropping media");
        Err(DeliveryFailure::Unknown("network disabled".into()))
    }
}

#[derive(Clone)]
pub struct DeliveryGateway {
    network: Arc<dyn ChatNetwork>,
}

impl DeliveryGateway {
    pub fn new(network: Arc<dyn ChatNetwork>) -> Self {
        Self { network }
    }

    /// Send `text` and optional image URLs to an external identity.
    ///
    /// Text that does not fit a caption follows the media as its own message.
    pub async fn send(
        &self,
        identity: ExternalId,
        text: &str,
        attachments: &[String],
    ) -> Result<(), DeliveryFailure> {
        if attachments.is_empty() {
            return self.network.send_message(identity.0, text, None).await;
        }

        // The caption limit counts UTF-16 code units.
        let fits_caption = text.encode_utf16().count() <= MAX_CAPTION_LEN;
        let caption = (fits_caption && !text.is_empty()).then_some(text);
        self.network
            .send_photos(identity.0, attachments, caption)
            .await?;

        if !fits_caption {
            self.network.send_message(identity.0, text, None).await?;
        }
        Ok(())
    }
}

/// Result of delivering to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The user has no external identity.
    Unreachable,
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            DeliveryOutcome::Delivered => AttemptOutcome::Delivered,
            DeliveryOutcome::Unreachable => AttemptOutcome::Unreachable,
            DeliveryOutcome::Failed(failure) => failure.outcome(),
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::Unreachable => Some("user has no external identity".into()),
            DeliveryOutcome::Failed(failure) => Some(failure.to_string()),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Gateway plus the user-state policy: a `Blocked` failure sets
/// `User.blocked`, a later success clears it.
#[derive(Clone)]
pub struct UserDelivery {
    gateway: DeliveryGateway,
    db: SharedDb,
}

impl UserDelivery {
    pub fn new(gateway: DeliveryGateway, db: SharedDb) -> Self {
        Self { gateway, db }
    }

    /// Deliver to one user. Failures are logged and returned, never raised.
    pub async fn deliver_to_user(
        &self,
        user: &User,
        text: &str,
        attachments: &[String],
    ) -> DeliveryOutcome {
        let Some(identity) = &user.identity else {
            warn!(user = %user.id, name = %user.display_name(), "User has no external identity");
            return DeliveryOutcome::Unreachable;
        };

        match self.gateway.send(identity.external_id, text, attachments).await {
            Ok(()) => {
                debug!(
                    user = %user.id,
                    external_id = identity.external_id.0,
                    "Message delivered"
                );
                if user.blocked {
                    self.set_blocked(user, false).await;
                }
                DeliveryOutcome::Delivered
            }
            Err(DeliveryFailure::Blocked) => {
                warn!(
                    user = %user.id,
                    external_id = identity.external_id.0,
                    "User has blocked the bot"
                );
                self.set_blocked(user, true).await;
                DeliveryOutcome::Failed(DeliveryFailure::Blocked)
            }
            Err(failure) => {
                warn!(
                    user = %user.id,
                    external_id = identity.external_id.0,
                    error = %failure,
                    "Failed to deliver message"
                );
                DeliveryOutcome::Failed(failure)
            }
        }
    }

    async fn set_blocked(&self, user: &User, blocked: bool) {
        let db = self.db.lock().await;
        match db.set_user_blocked(user.id, blocked) {
            Ok(true) => info!(user = %user.id, blocked, "Updated blocked flag"),
            Ok(false) => debug!(user = %user.id, "User vanished before blocked flag update"),
            Err(e) => warn!(user = %user.id, error = %e, "Failed to update blocked flag"),
        }
    }
}
