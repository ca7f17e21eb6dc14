mod config;
mod worker_service;

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use config::Config;
use layerscope_services::{
    EnvelopeSecrets, HubService, ImageStore, Inspector, MemoryQueue, NotificationService,
    QueueService, RedisQueue, RegistryClient, SecretsService, create_connection,
};
use worker_service::WorkerService;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env();

    log::info!("Starting registry inspection worker");

    // Initialize database connection
    let db = create_connection(&config.database_url)
        .await
        .expect("Failed to connect to database");

    log::info!("Database connection established");

    let queue: Arc<dyn QueueService> = match &config.redis_url {
        Some(url) => {
            log::info!("Using redis queues with prefix {}", config.queue_prefix);
            Arc::new(
                RedisQueue::new(url, &config.queue_prefix, config.queue_visibility_timeout)
                    .expect("Failed to initialize redis queue"),
            )
        }
        None => {
            log::warn!("REDIS_URL not set, using in-process queues");
            Arc::new(MemoryQueue::new(config.queue_visibility_timeout))
        }
    };

    let secrets: Option<Arc<dyn SecretsService>> = match &config.secrets_master_key {
        Some(key) => Some(Arc::new(
            EnvelopeSecrets::from_base64(key).expect("SECRETS_MASTER_KEY is not a valid key"),
        )),
        None => {
            log::warn!("SECRETS_MASTER_KEY not set, private images are inspected anonymously");
            None
        }
    };

    let store = ImageStore::new(db, &config.site_url);
    let registry = RegistryClient::new(config.registry_config())
        .expect("Failed to initialize registry client");
    let hub = HubService::new(&config.hub_url, config.http_timeout)
        .expect("Failed to initialize hub client");
    let notifications = NotificationService::new(
        store.clone(),
        queue.clone(),
        config.http_timeout,
        config.notification_retries,
    )
    .expect("Failed to initialize notification service");

    let inspector = Inspector::new(
        store,
        registry,
        hub,
        queue,
        notifications.clone(),
        secrets,
    );

    // Create and start worker service
    let worker_service = WorkerService::new(inspector, notifications, config.clone());

    // Start the worker in a background task
    tokio::spawn(async move {
        worker_service.start().await;
    });

    // Start a minimal HTTP server for health checks
    HttpServer::new(move || {
        App::new()
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(format!("{}:{}", config.server_host, config.server_port))?
    .run()
    .await
}
