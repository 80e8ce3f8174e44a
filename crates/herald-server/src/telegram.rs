//! Telegram Bot API client over reqwest.
//!
//! One [`TelegramClient`] exists per bot identity and is constructed once at
//! startup. The user-facing bot carries the outbound [`Throttle`]; the admin
//! bot does not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_shared::constants::BLOCKED_ERROR_CODE;
use herald_store::IdentityProfile;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::delivery::{ChatNetwork, DeliveryFailure, LinkButton};
use crate::relay::{Relay, RelayEvent};
use crate::throttle::Throttle;

/// Pause after a failed `getUpdates` call.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub from: Option<TelegramUser>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

impl From<&TelegramUser> for IdentityProfile {
    fn from(user: &TelegramUser) -> Self {
        IdentityProfile {
            external_id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            language_code: user.language_code.clone(),
            is_bot: user.is_bot,
        }
    }
}

pub struct TelegramClient {
    http: reqwest::Client,
    /// `<api url>/bot<token>`
    endpoint: String,
    send_timeout: Duration,
    throttle: Option<Throttle>,
}

impl TelegramClient {
    pub fn new(
        http: reqwest::Client,
        api_url: &str,
        token: &str,
        send_timeout: Duration,
        throttle: Option<Throttle>,
    ) -> Self {
        Self {
            http,
            endpoint: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            send_timeout,
            throttle,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, DeliveryFailure> {
        let response = self
            .http
            .post(format!("{}/{}", self.endpoint, method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            if status.is_success() {
                DeliveryFailure::Unknown(format!("malformed {method} response: {e}"))
            } else {
                classify_api_error(i64::from(status.as_u16()), status.as_str())
            }
        })?;

        if envelope.ok {
            envelope
                .result
                .ok_or_else(|| DeliveryFailure::Unknown(format!("{method} returned no result")))
        } else {
            let code = envelope
                .error_code
                .unwrap_or_else(|| i64::from(status.as_u16()));
            let description = envelope.description.unwrap_or_default();
            Err(classify_api_error(code, &description))
        }
    }

    async fn send(&self, method: &str, body: Value) -> Result<(), DeliveryFailure> {
        if let Some(throttle) = &self.throttle {
            throttle.acquire().await;
        }
        self.call::<Value>(method, &body, self.send_timeout)
            .await
            .map(|_| ())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        poll_timeout: Duration,
    ) -> Result<Vec<Update>, DeliveryFailure> {
        let body = json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &body, poll_timeout + Duration::from_secs(10))
            .await
    }
}

#[async_trait]
impl ChatNetwork for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), DeliveryFailure> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(button) = button {
            body["reply_markup"] = json!({
                "inline_keyboard": [[{ "text": button.label, "url": button.url }]],
            });
        }
        self.send("sendMessage", body).await
    }

    async fn send_photos(
        &self,
        chat_id: i64,
        urls: &[String],
        caption: Option<&str>,
    ) -> Result<(), DeliveryFailure> {
        match urls {
            [] => Ok(()),
            [url] => {
                let mut body = json!({ "chat_id": chat_id, "photo": url });
                if let Some(caption) = caption {
                    body["caption"] = json!(caption);
                }
                self.send("sendPhoto", body).await
            }
            _ => {
                let media: Vec<Value> = urls
                    .iter()
                    .enumerate()
                    .map(|(i, url)| {
                        let mut item = json!({ "type": "photo", "media": url });
                        if i == 0 {
                            if let Some(caption) = caption {
                                item["caption"] = json!(caption);
                            }
                        }
                        item
                    })
                    .collect();
                self.send("sendMediaGroup", json!({ "chat_id": chat_id, "media": media }))
                    .await
            }
        }
    }
}

fn classify_transport(err: reqwest::Error) -> DeliveryFailure {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        DeliveryFailure::Transient(err.to_string())
    } else {
        DeliveryFailure::Unknown(err.to_string())
    }
}

/// Map a Bot API error code onto the failure taxonomy.
pub fn classify_api_error(code: i64, description: &str) -> DeliveryFailure {
    match code {
        BLOCKED_ERROR_CODE => DeliveryFailure::Blocked,
        429 | 500..=599 => DeliveryFailure::Transient(format!("{code}: {description}")),
        _ => DeliveryFailure::Unknown(format!("{code}: {description}")),
    }
}

/// Text messages become relay events; bot commands are left to the command
/// menu.
pub fn inbound_event(update: &Update) -> Option<RelayEvent> {
    let message = update.message.as_ref()?;
    let from = message.from.as_ref()?;
    let text = message.text.as_deref()?.trim();

    if text.is_empty() || text.starts_with('/') || from.is_bot {
        return None;
    }

    Some(RelayEvent::InboundMessage {
        profile: IdentityProfile::from(from),
        text: text.to_string(),
    })
}

/// Long-poll the user bot forever, feeding inbound messages into the relay.
pub async fn run_poller(client: Arc<TelegramClient>, relay: Arc<Relay>, poll_timeout: Duration) {
    info!("Inbound poller started");
    let mut offset = 0i64;

    loop {
        let updates = match client.get_updates(offset, poll_timeout).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "getUpdates failed, backing off");
                tokio::time::sleep(POLL_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);

            let Some(event) = inbound_event(&update) else {
                debug!(update_id = update.update_id, "Skipping non-text update");
                continue;
            };
            if let Err(e) = relay.dispatch(event).await {
                warn!(update_id = update.update_id, error = %e, "Failed to relay inbound message");
            }
        }
    }
}
