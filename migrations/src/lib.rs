use sea_orm_migration::prelude::*;

pub mod m20250301_000001_create_images;
pub mod m20250301_000002_create_image_versions;
pub mod m20250301_000003_create_tags;
pub mod m20250301_000004_create_subscriptions;
pub mod m20250301_000005_create_notification_messages;
pub mod m20250301_000006_create_registry_credentials;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_images::Migration),
            Box::new(m20250301_000002_create_image_versions::Migration),
            Box::new(m20250301_000003_create_tags::Migration),
            Box::new(m20250301_000004_create_subscriptions::Migration),
            Box::new(m20250301_000005_create_notification_messages::Migration),
            Box::new(m20250301_000006_create_registry_credentials::Migration),
        ]
    }
}
