use layerscope_services::{Inspector, NotificationService, QueueName};

use crate::config::Config;

pub struct WorkerService {
    inspector: Inspector,
    notifications: NotificationService,
    config: Config,
}

impl WorkerService {
    pub fn new(inspector: Inspector, notifications: NotificationService, config: Config) -> Self {
        Self {
            inspector,
            notifications,
            config,
        }
    }

    pub async fn start(&self) {
        log::info!("Worker service starting with configuration:");
        log::info!("  - Poll interval: {:?}", self.config.poll_interval);
        log::info!("  - Inspect loop: {}", self.config.enable_inspect);
        log::info!("  - Size loop: {}", self.config.enable_size);
        log::info!("  - Notify loop: {}", self.config.enable_notify);
        log::info!("  - Notification retries: {}", self.config.notification_retries);

        let inspect_task = self.start_image_loop(QueueName::Inspect);
        let size_task = self.start_image_loop(QueueName::Size);
        let notify_task = self.start_notify_loop();

        // Loops run forever; reaching a branch means one of them died
        tokio::select! {
            _ = inspect_task, if self.config.enable_inspect => log::error!("Inspect loop exited"),
            _ = size_task, if self.config.enable_size => log::error!("Size loop exited"),
            _ = notify_task, if self.config.enable_notify => log::error!("Notify loop exited"),
            else => log::warn!("No worker loops enabled"),
        }
    }

    // Inspect and size loops - one queued image at a time
    async fn start_image_loop(&self, queue: QueueName) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            // Drain whatever is waiting before sleeping again
            loop {
                match self.inspector.process_next(queue).await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        log::error!("Failed to process {} queue: {:#}", queue, e);
                        break;
                    }
                }
            }
        }
    }

    // Notify loop - webhook deliveries, plus a periodic sweep for staged
    // messages that never reached the queue
    async fn start_notify_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let sweep_every = self.config.queue_visibility_timeout;
        let mut last_sweep = tokio::time::Instant::now();

        loop {
            ticker.tick().await;

            if last_sweep.elapsed() >= sweep_every {
                last_sweep = tokio::time::Instant::now();
                if let Err(e) = self.notifications.requeue_unsent(sweep_every).await {
                    log::error!("Failed to requeue unsent notifications: {:#}", e);
                }
            }

            loop {
                match self.notifications.process_next().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        log::error!("Failed to process notify queue: {:#}", e);
                        break;
                    }
                }
            }
        }
    }
}
