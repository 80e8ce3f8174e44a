//! # herald-server
//!
//! Operator backend for reaching end-users over a Telegram bot.
//!
//! This binary provides:
//! - **Broadcast fan-out**: a message to the deduplicated members of a set
//!   of groups, with per-recipient delivery audit
//! - **Message relay** between Telegram users, their persisted conversation
//!   log, and live operator sessions over WebSocket
//! - **Contact resolution** that hands the operator a direct or handle link
//!   through the admin bot
//! - **REST API** (axum) for users, groups, broadcasts and messages

mod api;
mod broadcast;
mod config;
mod contact;
mod conversation;
mod db;
mod delivery;
mod error;
mod ops;
mod recipients;
mod relay;
mod telegram;
mod throttle;
mod upload;
mod ws;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::broadcast::BroadcastEngine;
use crate::config::ServerConfig;
use crate::contact::ContactResolver;
use crate::conversation::ConversationStore;
use crate::delivery::{ChatNetwork, DeliveryGateway, DisabledNetwork, UserDelivery};
use crate::ops::OpsNotifier;
use crate::relay::Relay;
use crate::telegram::TelegramClient;
use crate::throttle::Throttle;
use crate::upload::{ImgbbUploader, Uploader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,herald_server=debug")),
        )
        .init();

    info!("Starting Herald server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store (fails dispatches left IN_PROGRESS by a crash)
    // -----------------------------------------------------------------------
    let db = db::open(&config.database_path)?;

    // -----------------------------------------------------------------------
    // 4. Chat-network clients, one per bot identity
    // -----------------------------------------------------------------------
    let http = reqwest::Client::builder()
        .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let user_bot = config.bot_token.as_deref().map(|token| {
        Arc::new(TelegramClient::new(
            http.clone(),
            &config.telegram_api_url,
            token,
            config.send_timeout,
            Some(Throttle::new(config.send_rate, config.send_burst)),
        ))
    });
    let network: Arc<dyn ChatNetwork> = match &user_bot {
        Some(client) => client.clone() as Arc<dyn ChatNetwork>,
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set, chat-network delivery disabled");
            Arc::new(DisabledNetwork)
        }
    };

    let ops = match (&config.admin_token, config.admin_chat_id) {
        (Some(token), Some(chat_id)) => OpsNotifier::new(
            Arc::new(TelegramClient::new(
                http.clone(),
                &config.telegram_api_url,
                token,
                config.send_timeout,
                None,
            )),
            chat_id,
        ),
        _ => {
            warn!("Admin bot not configured, ops notices go to the log only");
            OpsNotifier::disabled()
        }
    };

    let uploader: Option<Arc<dyn Uploader>> = config.imgbb_api_key.clone().map(|key| {
        Arc::new(ImgbbUploader::new(http.clone(), key)) as Arc<dyn Uploader>
    });

    // -----------------------------------------------------------------------
    // 5. Core services
    // -----------------------------------------------------------------------
    let delivery = UserDelivery::new(DeliveryGateway::new(network), db.clone());
    let engine = Arc::new(BroadcastEngine::new(
        db.clone(),
        delivery.clone(),
        uploader,
        config.broadcast_concurrency,
    ));
    let relay = Arc::new(Relay::new(db.clone(), delivery, ops.clone()));
    let contacts = Arc::new(ContactResolver::new(ops));

    let app_state = AppState {
        conversations: ConversationStore::new(db.clone()),
        db,
        engine,
        relay: relay.clone(),
        contacts,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 6. Spawn the inbound poller
    // -----------------------------------------------------------------------
    if let Some(client) = user_bot {
        tokio::spawn(telegram::run_poller(client, relay, config.poll_timeout));
    }

    // -----------------------------------------------------------------------
    // 7. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
