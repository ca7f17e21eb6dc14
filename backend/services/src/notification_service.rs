use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use layerscope_shared::{Changeset, NotificationQueueMessage};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};

use crate::entity::{notification_messages, subscriptions};
use crate::image_store::ImageStore;
use crate::queue_service::{QueueName, QueueService};

pub const DEFAULT_NOTIFICATION_RETRIES: i32 = 5;

/// Writes one unsent delivery task per subscription to `image_name`.
/// Runs on whatever connection or transaction the caller is using.
pub async fn stage_messages<C: ConnectionTrait>(
    conn: &C,
    image_name: &str,
    changeset: &Changeset,
) -> Result<Vec<notification_messages::Model>, DbErr> {
    let subscriptions = subscriptions::Entity::find()
        .filter(subscriptions::Column::ImageName.eq(image_name))
        .order_by_asc(subscriptions::Column::Id)
        .all(conn)
        .await?;

    if subscriptions.is_empty() {
        return Ok(Vec::new());
    }

    let message = serde_json::to_value(changeset).map_err(|e| DbErr::Json(e.to_string()))?;
    log::info!(
        "Generating {} notifications for image {}",
        subscriptions.len(),
        image_name
    );

    let mut staged = Vec::with_capacity(subscriptions.len());
    for subscription in subscriptions {
        let model = notification_messages::ActiveModel {
            subscription_id: Set(subscription.id),
            image_name: Set(subscription.image_name),
            webhook_url: Set(subscription.webhook_url),
            message: Set(message.clone()),
            attempts: Set(0),
            status_code: Set(0),
            response: Set(String::new()),
            sent_at: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        staged.push(model.insert(conn).await?);
    }

    Ok(staged)
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub success: bool,
    pub attempts: i32,
}

#[derive(Clone)]
pub struct NotificationService {
    store: ImageStore,
    queue: Arc<dyn QueueService>,
    client: reqwest::Client,
    max_attempts: i32,
}

impl NotificationService {
    pub fn new(
        store: ImageStore,
        queue: Arc<dyn QueueService>,
        timeout: Duration,
        max_attempts: i32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build webhook client: {}", e))?;

        Ok(Self {
            store,
            queue,
            client,
            max_attempts,
        })
    }

    /// Queues staged tasks for delivery. A task that can't be queued stays in
    /// the table unsent; the failure is logged.
    pub async fn enqueue(&self, messages: &[notification_messages::Model]) -> usize {
        let mut queued = 0;
        for message in messages {
            match self.queue.send_notification(message.id).await {
                Ok(()) => queued += 1,
                Err(e) => log::error!(
                    "Failed to queue notification {} for {}: {}",
                    message.id,
                    message.image_name,
                    e
                ),
            }
        }
        queued
    }

    /// Queues again any staged task that was never attempted and is older
    /// than `min_age`, covering sends that failed after their reconciliation
    /// committed. Returns how many were queued.
    pub async fn requeue_unsent(&self, min_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(min_age)?;

        let unsent = notification_messages::Entity::find()
            .filter(notification_messages::Column::Attempts.eq(0))
            .filter(notification_messages::Column::SentAt.is_null())
            .filter(notification_messages::Column::CreatedAt.lt(cutoff.fixed_offset()))
            .order_by_asc(notification_messages::Column::Id)
            .all(self.store.connection())
            .await
            .context("Failed to find unsent notification messages")?;

        if unsent.is_empty() {
            return Ok(0);
        }

        log::warn!("Requeueing {} unsent notifications", unsent.len());
        Ok(self.enqueue(&unsent).await)
    }

    pub async fn get_message(&self, id: i64) -> Result<Option<notification_messages::Model>> {
        notification_messages::Entity::find_by_id(id)
            .one(self.store.connection())
            .await
            .with_context(|| format!("Failed to get notification message {}", id))
    }

    /// Posts the stored message to its webhook and records the attempt.
    /// Success means a 2xx response.
    pub async fn send_notification(&self, id: i64) -> Result<Delivery> {
        let message = self
            .get_message(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Notification message {} not found", id))?;

        let (status_code, response) = self.post_message(&message).await;
        let success = (200..=299).contains(&status_code);
        if !success {
            log::info!("Notification response {} for ID {}", status_code, id);
        }

        let attempts = message.attempts + 1;
        let mut active: notification_messages::ActiveModel = message.into();
        active.attempts = Set(attempts);
        active.status_code = Set(status_code);
        active.response = Set(response);
        active.sent_at = Set(Some(Utc::now().fixed_offset()));
        active
            .update(self.store.connection())
            .await
            .with_context(|| format!("Failed to save notification message {}", id))?;

        Ok(Delivery { success, attempts })
    }

    /// Status code and body of the webhook call; 0 and the error text when
    /// no response came back.
    async fn post_message(&self, message: &notification_messages::Model) -> (i32, String) {
        let result = self
            .client
            .post(&message.webhook_url)
            .json(&message.message)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16() as i32;
                let body = response.text().await.unwrap_or_default();
                (status, body)
            }
            Err(e) => {
                log::error!("Error sending notification {}: {}", message.id, e);
                (0, e.to_string())
            }
        }
    }

    /// Handles at most one queued notification. The queue entry is removed on
    /// success or once the attempt ceiling is reached; otherwise it is left to
    /// come back after its visibility timeout. Returns whether a message was
    /// received.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(received) = self.queue.receive(QueueName::Notify).await? else {
            return Ok(false);
        };

        let note: NotificationQueueMessage = match received.parse() {
            Ok(note) => note,
            Err(e) => {
                log::error!("Dropping malformed notification message: {}", e);
                self.queue.delete(QueueName::Notify, &received).await?;
                return Ok(true);
            }
        };

        let id = note.notification_message_id;
        let Some(message) = self.get_message(id).await? else {
            log::error!("Notification message {} no longer exists", id);
            self.queue.delete(QueueName::Notify, &received).await?;
            return Ok(true);
        };

        // A requeued task can arrive after an earlier copy already finished
        if message.delivered() || message.attempts >= self.max_attempts {
            log::debug!("Notification {} already handled", id);
            self.queue.delete(QueueName::Notify, &received).await?;
            return Ok(true);
        }

        log::info!("Sending notification for: {}", id);

        match self.send_notification(id).await {
            Ok(delivery) => {
                if delivery.success || delivery.attempts >= self.max_attempts {
                    log::info!(
                        "Notification {} stopping after {} attempts",
                        id,
                        delivery.attempts
                    );
                    self.queue.delete(QueueName::Notify, &received).await?;
                }
            }
            Err(e) => log::error!("Error sending notification for {}: {:#}", id, e),
        }

        Ok(true)
    }
}
