//! Contact Resolver: tells the operator how to reach a user personally.
//!
//! A user is reached through an ordered [`ReachPlan`]: the direct deep link
//! to their external identity first, then their public handle. Each strategy
//! is a notice posted to the admin chat with the link as a button; the first
//! one that posts wins.

use herald_shared::{ExternalId, UserId};
use herald_store::User;
use serde::Serialize;
use tracing::{info, warn};

use crate::delivery::LinkButton;
use crate::ops::OpsNotifier;

const BUTTON_LABEL: &str = "Message on Telegram";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReachStrategy {
    Direct(ExternalId),
    Handle(String),
}

impl ReachStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            ReachStrategy::Direct(_) => "direct",
            ReachStrategy::Handle(_) => "handle",
        }
    }

    pub fn link(&self) -> String {
        match self {
            ReachStrategy::Direct(id) => id.deep_link(),
            ReachStrategy::Handle(handle) => herald_shared::handle_link(handle),
        }
    }
}

/// Strategies in the order they are tried. Empty means unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachPlan {
    pub strategies: Vec<ReachStrategy>,
}

impl ReachPlan {
    pub fn is_unreachable(&self) -> bool {
        self.strategies.is_empty()
    }
}

pub fn resolve(user: &User) -> ReachPlan {
    let mut strategies = Vec::new();
    if let Some(identity) = &user.identity {
        strategies.push(ReachStrategy::Direct(identity.external_id));
    }
    if let Some(handle) = user.public_handle() {
        strategies.push(ReachStrategy::Handle(handle.trim_start_matches('@').to_string()));
    }
    ReachPlan { strategies }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyAttempt {
    pub strategy: &'static str,
    pub link: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContactReport {
    pub user_id: UserId,
    pub attempts: Vec<StrategyAttempt>,
    /// Kind of the winning strategy.
    pub reached_via: Option<&'static str>,
    pub unreachable: bool,
}

#[derive(Clone)]
pub struct ContactResolver {
    ops: OpsNotifier,
}

impl ContactResolver {
    pub fn new(ops: OpsNotifier) -> Self {
        Self { ops }
    }

    /// Try each strategy in order, stopping at the first success. Never
    /// fails: the outcome is in the report.
    pub async fn notify_operator(&self, user: &User) -> ContactReport {
        let plan = resolve(user);
        let mut report = ContactReport {
            user_id: user.id,
            attempts: Vec::new(),
            reached_via: None,
            unreachable: plan.is_unreachable(),
        };

        if plan.is_unreachable() {
            warn!(user = %user.id, "User has neither an external identity nor a public handle");
            return report;
        }

        let notice = contact_notice(user);
        for strategy in &plan.strategies {
            let button = LinkButton {
                label: BUTTON_LABEL.to_string(),
                url: strategy.link(),
            };

            match self.ops.send(&notice, Some(&button)).await {
                Ok(()) => {
                    info!(user = %user.id, strategy = strategy.kind(), "Contact notice sent");
                    report.attempts.push(StrategyAttempt {
                        strategy: strategy.kind(),
                        link: button.url,
                        succeeded: true,
                        error: None,
                    });
                    report.reached_via = Some(strategy.kind());
                    return report;
                }
                Err(e) => {
                    warn!(
                        user = %user.id,
                        strategy = strategy.kind(),
                        error = %e,
                        "Contact strategy failed"
                    );
                    report.attempts.push(StrategyAttempt {
                        strategy: strategy.kind(),
                        link: button.url,
                        succeeded: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        warn!(user = %user.id, attempts = report.attempts.len(), "Every contact strategy failed");
        report
    }
}

fn contact_notice(user: &User) -> String {
    let handle = user
        .public_handle()
        .map(|h| format!("@{}", h.trim_start_matches('@')))
        .unwrap_or_else(|| "no username".to_string());
    format!(
        "Contact details\n\nName: {}\nHandle: {}",
        user.display_name(),
        handle
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryFailure;
    use crate::testing::{test_db, user_with_identity, MockNetwork};
    use herald_store::NewUser;

    #[tokio::test]
    async fn plan_orders_direct_before_handle() {
        let db = test_db();
        let user = user_with_identity(&db, 9, Some("ann")).await;

        let plan = resolve(&user);
        assert_eq!(
            plan.strategies,
            vec![
                ReachStrategy::Direct(ExternalId(9)),
                ReachStrategy::Handle("ann".into())
            ]
        );
    }

    #[tokio::test]
    async fn handle_only_user_resolves_via_handle() {
        let db = test_db();
        let user = db
            .lock()
            .await
            .create_user(&NewUser {
                handle: Some("@bob".into()),
                ..Default::default()
            })
            .unwrap();

        let network = MockNetwork::new();
        let resolver = ContactResolver::new(OpsNotifier::new(network.clone(), 1));
        let report = resolver.notify_operator(&user).await;

        assert_eq!(report.reached_via, Some("handle"));
        assert!(!report.unreachable);
        let sent = network.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].button.as_ref().map(|b| b.url.as_str()),
            Some("https://t.me/bob")
        );
    }

    #[tokio::test]
    async fn user_without_identity_or_handle_is_unreachable() {
        let db = test_db();
        let user = db.lock().await.create_user(&NewUser::default()).unwrap();

        let network = MockNetwork::new();
        let resolver = ContactResolver::new(OpsNotifier::new(network.clone(), 1));
        let report = resolver.notify_operator(&user).await;

        assert!(report.unreachable);
        assert!(report.attempts.is_empty());
        assert!(network.sent().is_empty());
    }

    #[tokio::test]
    async fn falls_back_when_direct_link_fails() {
        let db = test_db();
        let user = user_with_identity(&db, 9, Some("ann")).await;

        let network = MockNetwork::new();
        network.fail_button_url(
            "tg://user?id=9",
            DeliveryFailure::Unknown("400: BUTTON_USER_PRIVACY_RESTRICTED".into()),
        );
        let resolver = ContactResolver::new(OpsNotifier::new(network.clone(), 1));
        let report = resolver.notify_operator(&user).await;

        assert_eq!(report.attempts.len(), 2);
        assert!(!report.attempts[0].succeeded);
        assert_eq!(report.reached_via, Some("handle"));
    }

    #[tokio::test]
    async fn total_failure_is_reported_not_raised() {
        let db = test_db();
        let user = user_with_identity(&db, 9, None).await;

        let network = MockNetwork::new();
        network.fail_all(DeliveryFailure::Transient("timeout".into()));
        let resolver = ContactResolver::new(OpsNotifier::new(network.clone(), 1));
        let report = resolver.notify_operator(&user).await;

        assert_eq!(report.attempts.len(), 1);
        assert!(report.reached_via.is_none());
        assert!(!report.unreachable);
    }
}
