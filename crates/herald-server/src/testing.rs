//! Scripted in-process chat network and fixtures for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use herald_store::{Database, IdentityProfile, NewUser, User};

use crate::db::{shared, SharedDb};
use crate::delivery::{ChatNetwork, DeliveryFailure, LinkButton};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: Option<String>,
    pub media: Vec<String>,
    pub button: Option<LinkButton>,
}

#[derive(Default)]
struct Script {
    sent: Vec<SentMessage>,
    per_chat: HashMap<i64, DeliveryFailure>,
    per_url: HashMap<String, DeliveryFailure>,
    all: Option<DeliveryFailure>,
    delay: Option<Duration>,
}

/// Records every call. Failures can be scripted per chat, per button URL,
/// or for every call.
#[derive(Default)]
pub struct MockNetwork {
    script: Mutex<Script>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.script.lock().unwrap().sent.clone()
    }

    /// Wait until at least `count` calls are recorded, for sends made on
    /// background tasks.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<SentMessage> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    /// Hold every `send_message` call for `delay` before recording it.
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().unwrap().delay = Some(delay);
    }

    pub fn fail_chat(&self, chat_id: i64, failure: DeliveryFailure) {
        self.script.lock().unwrap().per_chat.insert(chat_id, failure);
    }

    pub fn fail_button_url(&self, url: &str, failure: DeliveryFailure) {
        self.script
            .lock()
            .unwrap()
            .per_url
            .insert(url.to_string(), failure);
    }

    pub fn fail_all(&self, failure: DeliveryFailure) {
        self.script.lock().unwrap().all = Some(failure);
    }

    pub fn clear_failures(&self) {
        let mut script = self.script.lock().unwrap();
        script.per_chat.clear();
        script.per_url.clear();
        script.all = None;
    }

    fn record(&self, message: SentMessage) -> Result<(), DeliveryFailure> {
        let mut script = self.script.lock().unwrap();
        let failure = script
            .all
            .clone()
            .or_else(|| script.per_chat.get(&message.chat_id).cloned())
            .or_else(|| {
                message
                    .button
                    .as_ref()
                    .and_then(|b| script.per_url.get(&b.url).cloned())
            });
        script.sent.push(message);
        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatNetwork for MockNetwork {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), DeliveryFailure> {
        let delay = self.script.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(SentMessage {
            chat_id,
            text: Some(text.to_string()),
            media: Vec::new(),
            button: button.cloned(),
        })
    }

    async fn send_photos(
        &self,
        chat_id: i64,
        urls: &[String],
        caption: Option<&str>,
    ) -> Result<(), DeliveryFailure> {
        self.record(SentMessage {
            chat_id,
            text: caption.map(str::to_string),
            media: urls.to_vec(),
            button: None,
        })
    }
}

pub fn test_db() -> SharedDb {
    shared(Database::open_in_memory().unwrap())
}

pub async fn user_with_identity(
    db: &SharedDb,
    external_id: i64,
    username: Option<&str>,
) -> User {
    db.lock()
        .await
        .create_user(&NewUser {
            identity: Some(IdentityProfile {
                external_id,
                username: username.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap()
}
