pub mod image_versions;
pub mod images;
pub mod notification_messages;
pub mod registry_credentials;
pub mod subscriptions;
pub mod tags;
pub mod user_image_permissions;
