//! Broadcast Engine: create a broadcast, fan it out to the deduplicated
//! members of its groups, and record the aggregate status.
//!
//! Lifecycle: `IN_PROGRESS -> COMPLETED | FAILED`, terminal either way.
//! Systemic failures (attachment upload, recipient resolution) produce a
//! `FAILED` record. Per-recipient failures are recorded as delivery attempts
//! and never change the aggregate status.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use herald_shared::{BroadcastId, BroadcastStatus, GroupId};
use herald_store::{Broadcast, NewBroadcast, StoreError, User};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::SharedDb;
use crate::delivery::{DeliveryOutcome, UserDelivery};
use crate::recipients::resolve_recipients;
use crate::upload::{Upload, UploadError, Uploader};

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub name: String,
    pub message: String,
    pub group_ids: Vec<GroupId>,
    pub attachments: Vec<Upload>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchTally {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct BroadcastEngine {
    db: SharedDb,
    delivery: UserDelivery,
    uploader: Option<Arc<dyn Uploader>>,
    concurrency: usize,
}

impl BroadcastEngine {
    pub fn new(
        db: SharedDb,
        delivery: UserDelivery,
        uploader: Option<Arc<dyn Uploader>>,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            delivery,
            uploader,
            concurrency: concurrency.max(1),
        }
    }

    /// Run a broadcast to completion and return the stored record with its
    /// final status. Only store failures are returned as errors.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<Broadcast, StoreError> {
        info!(
            name = %request.name,
            groups = request.group_ids.len(),
            attachments = request.attachments.len(),
            "Dispatching broadcast"
        );

        let images = match self.upload_all(&request.attachments).await {
            Ok(urls) => urls,
            Err(e) => {
                error!(name = %request.name, error = %e, "Attachment upload failed");
                let group_ids = self.known_groups(&request.group_ids).await?;
                return self.record_failed(&request, Vec::new(), group_ids).await;
            }
        };

        let resolved = {
            let db = self.db.lock().await;
            resolve_recipients(&db, &request.group_ids)
        };
        let recipients = match resolved {
            Ok(recipients) => recipients,
            Err(e) => {
                error!(name = %request.name, error = %e, "Recipient resolution failed");
                return self.record_failed(&request, images, Vec::new()).await;
            }
        };

        // The record exists before the first send.
        let broadcast = self.db.lock().await.create_broadcast(&NewBroadcast {
            name: request.name.clone(),
            message: request.message.clone(),
            images,
            status: BroadcastStatus::InProgress,
            group_ids: recipients.groups.iter().map(|g| g.id).collect(),
        })?;

        let tally = self.fan_out(&broadcast, recipients.users).await;

        let db = self.db.lock().await;
        db.set_broadcast_status(broadcast.id, BroadcastStatus::Completed)?;
        info!(
            broadcast = %broadcast.id,
            attempted = tally.attempted,
            delivered = tally.delivered,
            failed = tally.failed,
            "Broadcast completed"
        );
        db.get_broadcast(broadcast.id)
    }

    async fn upload_all(&self, files: &[Upload]) -> Result<Vec<String>, UploadError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let uploader = self.uploader.as_ref().ok_or(UploadError::Unavailable)?;
        futures::future::try_join_all(files.iter().map(|file| uploader.upload(file))).await
    }

    async fn known_groups(&self, ids: &[GroupId]) -> Result<Vec<GroupId>, StoreError> {
        let groups = self.db.lock().await.find_groups(ids)?;
        Ok(groups.into_iter().map(|g| g.id).collect())
    }

    async fn record_failed(
        &self,
        request: &DispatchRequest,
        images: Vec<String>,
        group_ids: Vec<GroupId>,
    ) -> Result<Broadcast, StoreError> {
        let broadcast = self.db.lock().await.create_broadcast(&NewBroadcast {
            name: request.name.clone(),
            message: request.message.clone(),
            images,
            status: BroadcastStatus::Failed,
            group_ids,
        })?;
        warn!(broadcast = %broadcast.id, "Broadcast recorded as FAILED");
        Ok(broadcast)
    }

    /// Attempt every recipient exactly once with bounded concurrency.
    async fn fan_out(&self, broadcast: &Broadcast, users: Vec<User>) -> DispatchTally {
        let outcomes: Vec<DeliveryOutcome> = stream::iter(users)
            .map(|user| async move {
                let outcome = self
                    .delivery
                    .deliver_to_user(&user, &broadcast.message, &broadcast.images)
                    .await;
                self.record_attempt(broadcast.id, &user, &outcome).await;
                outcome
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let delivered = outcomes.iter().filter(|o| o.is_delivered()).count();
        DispatchTally {
            attempted: outcomes.len(),
            delivered,
            failed: outcomes.len() - delivered,
        }
    }

    async fn record_attempt(
        &self,
        broadcast_id: BroadcastId,
        user: &User,
        outcome: &DeliveryOutcome,
    ) {
        let detail = outcome.detail();
        let db = self.db.lock().await;
        if let Err(e) = db.record_delivery_attempt(
            broadcast_id,
            user.id,
            outcome.attempt_outcome(),
            detail.as_deref(),
        ) {
            warn!(
                broadcast = %broadcast_id,
                user = %user.id,
                error = %e,
                "Failed to record delivery attempt"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use herald_store::{AttemptOutcome, NewUser};

    use crate::delivery::{DeliveryFailure, DeliveryGateway};
    use crate::testing::{test_db, user_with_identity, MockNetwork};

    struct FixedUploader(Result<String, String>);

    #[async_trait]
    impl Uploader for FixedUploader {
        async fn upload(&self, _file: &Upload) -> Result<String, UploadError> {
            self.0.clone().map_err(UploadError::Rejected)
        }
    }

    fn engine(
        db: &SharedDb,
        network: &Arc<MockNetwork>,
        uploader: Option<Arc<dyn Uploader>>,
    ) -> BroadcastEngine {
        let delivery = UserDelivery::new(DeliveryGateway::new(network.clone()), db.clone());
        BroadcastEngine::new(db.clone(), delivery, uploader, 4)
    }

    fn request(group_ids: Vec<GroupId>) -> DispatchRequest {
        DispatchRequest {
            name: "Promo".into(),
            message: "Hi".into(),
            group_ids,
            attachments: Vec::new(),
        }
    }

    fn image() -> Upload {
        Upload {
            file_name: "a.png".into(),
            bytes: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn promo_completes_even_when_a_recipient_blocked() {
        let db = test_db();
        let network = MockNetwork::new();
        let u1 = user_with_identity(&db, 1, None).await;
        let u2 = user_with_identity(&db, 2, None).await;
        let g1 = db.lock().await.create_group("G1", &[u1.id, u2.id]).unwrap();
        network.fail_chat(1, DeliveryFailure::Blocked);

        let broadcast = engine(&db, &network, None)
            .dispatch(request(vec![g1.id]))
            .await
            .unwrap();

        assert_eq!(broadcast.status, BroadcastStatus::Completed);
        assert_eq!(broadcast.group_ids, vec![g1.id]);

        let mut chats: Vec<_> = network.sent().iter().map(|s| s.chat_id).collect();
        chats.sort();
        assert_eq!(chats, vec![1, 2]);

        let db = db.lock().await;
        assert!(db.get_user(u1.id).unwrap().blocked);
        assert!(!db.get_user(u2.id).unwrap().blocked);

        let attempts = db.list_delivery_attempts(broadcast.id).unwrap();
        assert_eq!(attempts.len(), 2);
        let blocked: Vec<_> = attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Blocked)
            .map(|a| a.user_id)
            .collect();
        assert_eq!(blocked, vec![u1.id]);
    }

    #[tokio::test]
    async fn overlapping_groups_visit_each_user_once() {
        let db = test_db();
        let network = MockNetwork::new();
        let shared = user_with_identity(&db, 1, None).await;
        let other = user_with_identity(&db, 2, None).await;
        let (g1, g2) = {
            let mut db = db.lock().await;
            (
                db.create_group("G1", &[shared.id]).unwrap(),
                db.create_group("G2", &[shared.id, other.id]).unwrap(),
            )
        };

        let broadcast = engine(&db, &network, None)
            .dispatch(request(vec![g1.id, g2.id, g1.id]))
            .await
            .unwrap();

        assert_eq!(network.sent().len(), 2);
        let attempts = db.lock().await.list_delivery_attempts(broadcast.id).unwrap();
        assert_eq!(attempts.len(), 2);
    }

    #[tokio::test]
    async fn unresolvable_groups_fail_without_sending() {
        let db = test_db();
        let network = MockNetwork::new();
        user_with_identity(&db, 1, None).await;

        let broadcast = engine(&db, &network, None)
            .dispatch(request(vec![GroupId::new()]))
            .await
            .unwrap();

        assert_eq!(broadcast.status, BroadcastStatus::Failed);
        assert!(broadcast.group_ids.is_empty());
        assert!(network.sent().is_empty());
        assert!(db
            .lock()
            .await
            .list_delivery_attempts(broadcast.id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn every_send_failing_still_completes() {
        let db = test_db();
        let network = MockNetwork::new();
        let u1 = user_with_identity(&db, 1, None).await;
        let u2 = user_with_identity(&db, 2, None).await;
        let g1 = db.lock().await.create_group("G1", &[u1.id, u2.id]).unwrap();
        network.fail_all(DeliveryFailure::Transient("timeout".into()));

        let broadcast = engine(&db, &network, None)
            .dispatch(request(vec![g1.id]))
            .await
            .unwrap();

        assert_eq!(broadcast.status, BroadcastStatus::Completed);
        assert_eq!(network.sent().len(), 2);
    }

    #[tokio::test]
    async fn recipient_without_identity_is_recorded_unreachable() {
        let db = test_db();
        let network = MockNetwork::new();
        let bare = db.lock().await.create_user(&NewUser::default()).unwrap();
        let g1 = db.lock().await.create_group("G1", &[bare.id]).unwrap();

        let broadcast = engine(&db, &network, None)
            .dispatch(request(vec![g1.id]))
            .await
            .unwrap();

        assert_eq!(broadcast.status, BroadcastStatus::Completed);
        let attempts = db.lock().await.list_delivery_attempts(broadcast.id).unwrap();
        assert_eq!(attempts[0].outcome, AttemptOutcome::Unreachable);
    }

    #[tokio::test]
    async fn upload_failure_is_systemic() {
        let db = test_db();
        let network = MockNetwork::new();
        let u1 = user_with_identity(&db, 1, None).await;
        let g1 = db.lock().await.create_group("G1", &[u1.id]).unwrap();
        let uploader: Arc<dyn Uploader> = Arc::new(FixedUploader(Err("quota".into())));

        let mut req = request(vec![g1.id]);
        req.attachments.push(image());
        let broadcast = engine(&db, &network, Some(uploader))
            .dispatch(req)
            .await
            .unwrap();

        assert_eq!(broadcast.status, BroadcastStatus::Failed);
        assert_eq!(broadcast.group_ids, vec![g1.id]);
        assert!(network.sent().is_empty());
    }

    #[tokio::test]
    async fn attachments_without_uploader_fail() {
        let db = test_db();
        let network = MockNetwork::new();
        let g1 = db.lock().await.create_group("G1", &[]).unwrap();

        let mut req = request(vec![g1.id]);
        req.attachments.push(image());
        let broadcast = engine(&db, &network, None).dispatch(req).await.unwrap();

        assert_eq!(broadcast.status, BroadcastStatus::Failed);
    }

    #[tokio::test]
    async fn uploaded_images_are_sent_as_media() {
        let db = test_db();
        let network = MockNetwork::new();
        let u1 = user_with_identity(&db, 1, None).await;
        let g1 = db.lock().await.create_group("G1", &[u1.id]).unwrap();
        let uploader: Arc<dyn Uploader> =
            Arc::new(FixedUploader(Ok("https://i.example/a.png".into())));

        let mut req = request(vec![g1.id]);
        req.attachments.push(image());
        let broadcast = engine(&db, &network, Some(uploader))
            .dispatch(req)
            .await
            .unwrap();

        assert_eq!(broadcast.images, vec!["https://i.example/a.png".to_string()]);
        let sent = network.sent();
        assert_eq!(sent[0].media, broadcast.images);
        assert_eq!(sent[0].text.as_deref(), Some("Hi"));
    }
}
