use std::sync::Arc;

use tracing::{info, warn};

use crate::delivery::{ChatNetwork, DeliveryFailure, LinkButton};

/// Posts operational notices to the admin chat through the admin bot.
/// Without an admin bot the notices only reach the log.
#[derive(Clone)]
pub struct OpsNotifier {
    channel: Option<(Arc<dyn ChatNetwork>, i64)>,
}

impl OpsNotifier {
    pub fn new(network: Arc<dyn ChatNetwork>, chat_id: i64) -> Self {
        Self {
            channel: Some((network, chat_id)),
        }
    }

    pub fn disabled() -> Self {
        Self { channel: None }
    }

    pub async fn send(
        &self,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), DeliveryFailure> {
        let Some((network, chat_id)) = &self.channel else {
            let link = button.map(|b| &b.url);
            info!(notice = %text, link = ?link, "Ops notice (no admin channel)");
            return Err(DeliveryFailure::Unknown("admin channel disabled".into()));
        };
        network.send_message(*chat_id, text, button).await
    }

    /// Fire-and-forget variant: failures are logged.
    pub async fn notice(&self, text: &str) {
        if let Err(e) = self.send(text, None).await {
            if self.channel.is_some() {
                warn!(error = %e, "Failed to post ops notice");
            }
        }
    }

    /// Posts the notice on a background task so the caller never waits on
    /// the admin bot.
    pub fn spawn_notice(&self, text: String) {
        let ops = self.clone();
        tokio::spawn(async move { ops.notice(&text).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::MockNetwork;

    #[tokio::test]
    async fn posts_into_admin_chat() {
        let network = MockNetwork::new();
        let ops = OpsNotifier::new(network.clone(), -100);

        ops.notice("heads up").await;

        let sent = network.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, -100);
    }

    #[tokio::test]
    async fn disabled_channel_reports_failure() {
        let ops = OpsNotifier::disabled();
        assert!(ops.send("heads up", None).await.is_err());
        ops.notice("still fine").await;
    }

    #[tokio::test]
    async fn spawned_notice_does_not_wait_for_admin_bot() {
        let network = MockNetwork::new();
        network.set_delay(Duration::from_secs(30));
        let ops = OpsNotifier::new(network.clone(), -100);

        let started = std::time::Instant::now();
        ops.spawn_notice("slow".into());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(network.sent().is_empty());
    }
}
