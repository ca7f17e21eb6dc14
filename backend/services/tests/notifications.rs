mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Harness, harness, harness_with_visibility};
use layerscope_services::notification_service::stage_messages;
use layerscope_services::{QueueName, QueueService};
use layerscope_shared::{Changeset, TagRef};

fn changeset() -> Changeset {
    Changeset {
        text: "MicroBadger: Docker Hub image org/app has changed".to_string(),
        image_name: "org/app".to_string(),
        new_tags: vec![TagRef::new("org/app", "beta", "v2")],
        changed_tags: vec![],
        deleted_tags: vec![],
    }
}

/// Stages one task per subscriber and queues them, the way a committed
/// reconciliation does.
async fn notify(h: &Harness, image_name: &str) -> usize {
    let staged = stage_messages(h.store.connection(), image_name, &changeset())
        .await
        .unwrap();
    h.notifications.enqueue(&staged).await
}

#[actix_web::test]
async fn delivered_notification_is_recorded() {
    let h = harness(None).await;
    h.store.get_or_create_image("org/app").await.unwrap();
    h.store
        .create_subscription(1, "org/app", &format!("{}/hooks/ok", h.base_url))
        .await
        .unwrap();

    assert_eq!(notify(&h, "org/app").await, 1);
    assert_eq!(h.queue.len(QueueName::Notify).await, 1);

    assert!(h.notifications.process_next().await.unwrap());
    assert!(h.queue.is_empty(QueueName::Notify).await);
    assert!(!h.notifications.process_next().await.unwrap());

    let bodies = h.fake.webhook_bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["new_tags"][0]["tag"], "beta");

    let sent = h.notifications.get_message(1).await.unwrap().unwrap();
    assert_eq!(sent.attempts, 1);
    assert_eq!(sent.status_code, 200);
    assert_eq!(sent.response, "thanks");
    assert!(sent.sent_at.is_some());
}

#[actix_web::test]
async fn failing_webhook_stops_at_the_attempt_ceiling() {
    // Zero visibility makes an undeleted message available again at once
    let h = harness_with_visibility(None, Duration::ZERO).await;
    h.fake.webhook_status.store(500, Ordering::SeqCst);
    h.store.get_or_create_image("org/app").await.unwrap();
    h.store
        .create_subscription(1, "org/app", &format!("{}/hooks/broken", h.base_url))
        .await
        .unwrap();
    notify(&h, "org/app").await;

    assert!(h.notifications.process_next().await.unwrap());
    assert_eq!(h.queue.len(QueueName::Notify).await, 1);
    assert!(h.notifications.process_next().await.unwrap());
    assert_eq!(h.queue.len(QueueName::Notify).await, 1);

    // The harness allows three attempts
    assert!(h.notifications.process_next().await.unwrap());
    assert!(h.queue.is_empty(QueueName::Notify).await);

    let message = h.notifications.get_message(1).await.unwrap().unwrap();
    assert_eq!(message.attempts, 3);
    assert_eq!(message.status_code, 500);
    assert_eq!(h.fake.webhook_bodies().len(), 3);
}

#[actix_web::test]
async fn unreachable_webhook_records_no_status() {
    let h = harness(None).await;
    h.store.get_or_create_image("org/app").await.unwrap();
    h.store
        .create_subscription(1, "org/app", "http://127.0.0.1:1/hooks/nowhere")
        .await
        .unwrap();
    notify(&h, "org/app").await;

    let delivery = h.notifications.send_notification(1).await.unwrap();
    assert!(!delivery.success);
    assert_eq!(delivery.attempts, 1);

    let message = h.notifications.get_message(1).await.unwrap().unwrap();
    assert_eq!(message.status_code, 0);
    assert!(!message.response.is_empty());
}

#[actix_web::test]
async fn nothing_to_send_without_subscribers() {
    let h = harness(None).await;
    h.store.get_or_create_image("org/other").await.unwrap();

    assert_eq!(notify(&h, "org/other").await, 0);
    assert!(h.queue.is_empty(QueueName::Notify).await);
}

#[actix_web::test]
async fn unqueued_messages_are_swept_up() {
    let h = harness(None).await;
    h.store.get_or_create_image("org/app").await.unwrap();
    h.store
        .create_subscription(1, "org/app", &format!("{}/hooks/ok", h.base_url))
        .await
        .unwrap();

    h.unreliable.fail_next_sends(1);
    assert_eq!(notify(&h, "org/app").await, 0);
    assert!(h.queue.is_empty(QueueName::Notify).await);

    // Too recent to be considered lost
    assert_eq!(
        h.notifications.requeue_unsent(Duration::from_secs(3600)).await.unwrap(),
        0
    );

    assert_eq!(h.notifications.requeue_unsent(Duration::ZERO).await.unwrap(), 1);
    assert!(h.notifications.process_next().await.unwrap());
    assert_eq!(h.fake.webhook_bodies().len(), 1);
    assert!(h.notifications.get_message(1).await.unwrap().unwrap().delivered());
}

#[actix_web::test]
async fn duplicate_queue_entries_deliver_once() {
    let h = harness(None).await;
    h.store.get_or_create_image("org/app").await.unwrap();
    h.store
        .create_subscription(1, "org/app", &format!("{}/hooks/ok", h.base_url))
        .await
        .unwrap();

    notify(&h, "org/app").await;
    h.queue
        .send(QueueName::Notify, r#"{"notification_message_id":1}"#.to_string())
        .await
        .unwrap();

    assert!(h.notifications.process_next().await.unwrap());
    assert!(h.notifications.process_next().await.unwrap());
    assert!(h.queue.is_empty(QueueName::Notify).await);
    assert_eq!(h.fake.webhook_bodies().len(), 1);
    assert_eq!(h.notifications.get_message(1).await.unwrap().unwrap().attempts, 1);
}

#[actix_web::test]
async fn deleted_message_is_dropped_from_the_queue() {
    let h = harness(None).await;
    h.queue
        .send(QueueName::Notify, r#"{"notification_message_id":404}"#.to_string())
        .await
        .unwrap();

    assert!(h.notifications.process_next().await.unwrap());
    assert!(h.queue.is_empty(QueueName::Notify).await);
}
