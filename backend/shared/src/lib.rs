pub mod models;

pub use models::{
    Changeset, Credentials, HubInfo, ImageLayer, ImageQueueMessage, ImageStatus, License,
    NotificationQueueMessage, RegistryImage, RelatedVersion, TagRef, User, VersionControl,
    VersionDetail, Viewer, OFFICIAL_NAMESPACE,
};
