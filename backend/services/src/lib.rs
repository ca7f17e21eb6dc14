pub mod database;
pub mod entity;
pub mod fingerprint;
pub mod hub_service;
pub mod image_name;
pub mod image_store;
pub mod inspector;
pub mod labels;
pub mod lineage_service;
pub mod notification_service;
pub mod queue_service;
pub mod reconcile;
pub mod registry;
pub mod secrets;

pub use database::create_connection;
pub use hub_service::HubService;
pub use image_store::ImageStore;
pub use inspector::{InspectError, InspectOutcome, Inspector};
pub use lineage_service::LineageService;
pub use notification_service::NotificationService;
pub use queue_service::{MemoryQueue, QueueMessage, QueueName, QueueService, RedisQueue};
pub use reconcile::{InspectedVersion, Reconciled, diff_tags};
pub use registry::{RegistryClient, RegistryConfig, RegistryError};
pub use secrets::{EnvelopeSecrets, SecretsService};

// Re-export entities for convenience
pub use entity::image_versions;
pub use entity::images;
pub use entity::notification_messages;
pub use entity::registry_credentials;
pub use entity::subscriptions;
pub use entity::tags;
pub use entity::user_image_permissions;
