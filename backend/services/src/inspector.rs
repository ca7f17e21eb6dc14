use std::collections::HashMap;
use std::sync::Arc;

use layerscope_shared::{
    Changeset, Credentials, HubInfo, ImageQueueMessage, ImageStatus, RegistryImage, Viewer,
};
use sea_orm::DbErr;
use thiserror::Error;

use crate::entity::images;
use crate::fingerprint::fingerprint;
use crate::hub_service::HubService;
use crate::image_store::ImageStore;
use crate::notification_service::NotificationService;
use crate::queue_service::{QueueName, QueueService};
use crate::reconcile::InspectedVersion;
use crate::registry::{Manifest, RegistryClient, RegistryError};
use crate::secrets::SecretsService;

#[derive(Debug, Error)]
pub enum InspectError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Reconciliation failed: {0}")]
    Reconciliation(#[source] DbErr),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl InspectError {
    /// Whether the work item should stay queued for another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            InspectError::Registry(e) => e.is_transient(),
            InspectError::Reconciliation(_) | InspectError::Store(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InspectOutcome {
    /// Hub metadata shows nothing new since the last full inspection.
    Unchanged,
    /// The registry could not be read; the image was parked in this status.
    Failed(ImageStatus),
    Inspected {
        status: ImageStatus,
        changeset: Changeset,
    },
}

/// Copies hub metadata onto the image. Returns false, leaving the image
/// untouched, when it is already `INSPECTED` and the hub's last-updated time
/// matches what we stored.
pub fn apply_hub_info(image: &mut images::Model, hub: &HubInfo, badges_installed: i32) -> bool {
    let last_updated = hub.last_updated.map(|t| t.fixed_offset());

    if image.status == ImageStatus::Inspected.as_str() && last_updated == image.last_updated {
        log::info!("Image {} is unchanged since we last looked at {:?}", image.name, last_updated);
        return false;
    }

    if let (Some(theirs), Some(ours)) = (last_updated, image.last_updated) {
        if theirs < ours {
            log::error!("Image {} last updated is older than our own record", image.name);
        }
    }

    image.last_updated = last_updated;
    image.is_private = hub.is_private;
    image.is_automated = hub.is_automated;
    image.description = hub.description.clone().unwrap_or_default();
    image.pull_count = hub.pull_count;
    image.star_count = hub.star_count;
    image.badges_installed = badges_installed;
    true
}

/// The version tagged `latest`, otherwise the most recently created one.
pub fn select_latest(versions: &[InspectedVersion]) -> Option<String> {
    if let Some(v) = versions.iter().find(|v| v.tags.iter().any(|t| t == "latest")) {
        return Some(v.sha.clone());
    }

    versions
        .iter()
        .filter(|v| v.created.is_some())
        .max_by_key(|v| v.created)
        .map(|v| v.sha.clone())
}

/// Status an image is parked in when its registry data can't be read.
/// Unauthorized or missing repositories have most likely been deleted or made
/// private.
pub fn failure_status(error: &RegistryError) -> ImageStatus {
    match error {
        RegistryError::Unauthorized(_) | RegistryError::NotFound(_) => ImageStatus::Missing,
        _ => ImageStatus::FailedInspection,
    }
}

fn status_of(image: &images::Model) -> ImageStatus {
    image.status.parse().unwrap_or(ImageStatus::Missing)
}

/// Drives images through submission, metadata inspection and the size phase.
#[derive(Clone)]
pub struct Inspector {
    store: ImageStore,
    registry: RegistryClient,
    hub: HubService,
    queue: Arc<dyn QueueService>,
    notifications: NotificationService,
    secrets: Option<Arc<dyn SecretsService>>,
}

impl Inspector {
    pub fn new(
        store: ImageStore,
        registry: RegistryClient,
        hub: HubService,
        queue: Arc<dyn QueueService>,
        notifications: NotificationService,
        secrets: Option<Arc<dyn SecretsService>>,
    ) -> Self {
        Self {
            store,
            registry,
            hub,
            queue,
            notifications,
            secrets,
        }
    }

    /// First stored credential for the image, optionally restricted to one
    /// user's.
    async fn stored_credentials(
        &self,
        image_name: &str,
        user_id: Option<i64>,
    ) -> anyhow::Result<Option<Credentials>> {
        let Some(secrets) = &self.secrets else {
            return Ok(None);
        };

        let stored = self
            .store
            .registry_credentials_for_image(image_name)
            .await?
            .into_iter()
            .find(|c| user_id.is_none_or(|id| c.user_id == id));

        let Some(stored) = stored else {
            return Ok(None);
        };

        let password = secrets.decrypt(&stored.encrypted_key, &stored.encrypted_password)?;
        Ok(Some(Credentials {
            user: stored.user,
            password,
        }))
    }

    /// The image with stored credentials attached, or anonymous access when
    /// there are none or they can't be read.
    async fn registry_image(&self, image_name: &str, user_id: Option<i64>) -> RegistryImage {
        match self.stored_credentials(image_name, user_id).await {
            Ok(Some(credentials)) => RegistryImage {
                name: image_name.to_string(),
                credentials: Some(credentials),
            },
            Ok(None) => RegistryImage::anonymous(image_name),
            Err(e) => {
                log::error!("Error getting registry credentials for {}: {:#}", image_name, e);
                RegistryImage::anonymous(image_name)
            }
        }
    }

    /// Asks for an image to be inspected. Private images need an
    /// authenticated viewer. If the registry knows the repository the image is
    /// queued and becomes `SUBMITTED`, otherwise it is `MISSING`.
    pub async fn submit(&self, image_name: &str, viewer: &Viewer) -> Result<ImageStatus, InspectError> {
        let mut image = self.store.get_or_create_image(image_name).await?;

        let user_id = if image.is_private {
            match viewer.user_id() {
                Some(user_id) => Some(user_id),
                None => {
                    log::info!("Ignoring anonymous request to submit private image");
                    return Ok(status_of(&image));
                }
            }
        } else {
            None
        };

        let registry_image = self.registry_image(image_name, user_id).await;
        let exists = match self.registry.repository(&registry_image).await {
            Ok(mut repository) => repository.list_tags().await.is_ok(),
            Err(e) => {
                log::debug!("Couldn't get auth for {}: {}", image_name, e);
                false
            }
        };

        if exists {
            // Saving resets updated_at, so a SITEMAP image's processing time starts now
            match self.queue.send_image(QueueName::Inspect, image_name).await {
                Ok(()) => {
                    image.status = ImageStatus::Submitted.to_string();
                    log::debug!("Image {} now submitted", image_name);
                }
                Err(e) => log::error!("Failed to queue {} for inspection: {:#}", image_name, e),
            }
        } else {
            log::debug!("Image {} doesn't exist on the registry", image_name);
            image.status = ImageStatus::Missing.to_string();
        }

        let image = self.store.put_image_only(&image).await?;
        Ok(status_of(&image))
    }

    /// Walks every tag, collecting each distinct version once. Tags whose
    /// manifest has gone missing are skipped.
    async fn fetch_versions(
        &self,
        image: &RegistryImage,
    ) -> Result<Vec<InspectedVersion>, RegistryError> {
        let mut repository = self.registry.repository(image).await?;

        let tags = repository.list_tags().await?;
        if tags.is_empty() {
            return Err(RegistryError::EmptyRepository(image.name.clone()));
        }
        log::debug!("{} tags for {}", tags.len(), image.name);

        let mut versions: Vec<InspectedVersion> = Vec::new();
        let mut by_sha: HashMap<String, usize> = HashMap::new();

        for tag in tags {
            let (manifest, body) = match repository.get_manifest(&tag).await {
                Ok(found) => found,
                Err(RegistryError::NotFound(url)) => {
                    log::warn!("Listed tag {} of {} has no manifest at {}", tag, image.name, url);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let info = manifest.version_info()?;
            if let Some(&index) = by_sha.get(&info.sha) {
                versions[index].tags.push(tag);
                continue;
            }

            by_sha.insert(info.sha.clone(), versions.len());
            versions.push(InspectedVersion {
                sha: info.sha,
                author: info.author,
                labels: info.labels,
                created: info.created,
                layer_count: info.layer_count,
                manifest: body,
                tags: vec![tag],
            });
        }

        Ok(versions)
    }

    /// Reads hub and registry metadata for one image and reconciles it with
    /// what is stored. Any tag change moves the image to `SIZE`, notifies
    /// subscribers and queues the size phase. So do versions whose manifest
    /// the size phase hasn't processed yet. Otherwise the image goes straight
    /// to `INSPECTED`.
    pub async fn inspect(&self, image_name: &str) -> Result<InspectOutcome, InspectError> {
        log::debug!("Inspecting {}", image_name);

        let mut image = self.store.get_or_create_image(image_name).await?;
        let registry_image = self.registry_image(image_name, None).await;

        match self.hub.info(&registry_image).await {
            Ok(info) => {
                let badges = self
                    .hub
                    .badges_installed(info.full_description.as_deref().unwrap_or_default());
                if !apply_hub_info(&mut image, &info, badges) {
                    return Ok(InspectOutcome::Unchanged);
                }
            }
            Err(e) => log::error!("Failed to get hub info for {}: {:#}", image_name, e),
        }

        let versions = match self.fetch_versions(&registry_image).await {
            Ok(versions) => versions,
            Err(e) => {
                log::error!("Failed to get metadata using registry for {}: {}", image_name, e);
                let status = failure_status(&e);
                image.status = status.to_string();
                image.badge_count = 0;
                self.store.put_image_only(&image).await?;

                if e.is_transient() {
                    return Err(e.into());
                }
                return Ok(InspectOutcome::Failed(status));
            }
        };
        log::debug!("{} versions found for {}", versions.len(), image_name);

        image.status = ImageStatus::Size.to_string();
        image.latest = select_latest(&versions);
        // One badge for the hub link
        image.badge_count = 1;

        let reconciled = self
            .store
            .put_image(&image, &versions)
            .await
            .map_err(InspectError::Reconciliation)?;

        // An earlier pass may have committed new versions without getting
        // the size job queued; their manifests are still waiting
        let size_pending = !self.store.versions_with_manifests(image_name).await?.is_empty();

        let status = if reconciled.changeset.is_empty() && !size_pending {
            image.status = ImageStatus::Inspected.to_string();
            self.store.put_image_only(&image).await?;
            ImageStatus::Inspected
        } else {
            self.notifications.enqueue(&reconciled.notifications).await;
            self.queue.send_image(QueueName::Size, image_name).await?;
            ImageStatus::Size
        };

        log::info!(
            "Inspected {}: status {}, latest {}",
            image_name,
            status,
            image.latest.as_deref().unwrap_or("none")
        );

        Ok(InspectOutcome::Inspected {
            status,
            changeset: reconciled.changeset,
        })
    }

    /// Fills in download sizes, layers and fingerprints for versions that
    /// still hold a manifest. A rate limit or other transient failure stops
    /// the batch and leaves the image in `SIZE`; versions that fail for other
    /// reasons are skipped. Losing registry access altogether parks the image
    /// in the matching failure status.
    pub async fn inspect_size(&self, image_name: &str) -> Result<(), InspectError> {
        log::debug!("Inspecting size of {}", image_name);

        let image = match self.store.get_image(image_name).await? {
            Some(image) if image.status != ImageStatus::Missing.as_str() => image,
            _ => {
                log::info!("Image {} no longer available", image_name);
                return Ok(());
            }
        };

        let versions = self.store.versions_with_manifests(image_name).await?;
        let registry_image = self.registry_image(image_name, None).await;
        let mut repository = match self.registry.repository(&registry_image).await {
            Ok(repository) => repository,
            Err(e) if e.is_transient() => return Err(e.into()),
            Err(e) => {
                log::error!("Failed to get registry access to size {}: {}", image_name, e);
                self.store.set_status(&image, failure_status(&e)).await?;
                return Ok(());
            }
        };

        for version in versions {
            if !version.needs_size_or_layers() {
                self.store.clear_manifest(version).await?;
                continue;
            }

            let manifest = match Manifest::parse_str(&version.manifest) {
                Ok(manifest) => manifest,
                Err(e) => {
                    log::error!("Bad manifest for {} version {}: {}", image_name, version.sha, e);
                    continue;
                }
            };

            let (download_size, layer_sizes) = match repository.compute_download_size(&manifest).await {
                Ok(sizes) => sizes,
                Err(e) if e.is_transient() => {
                    log::info!("Stopping size inspection of {}: {}", image_name, e);
                    return Err(e.into());
                }
                Err(e) => {
                    log::info!("Couldn't get download size for {} version {}: {}", image_name, version.sha, e);
                    continue;
                }
            };

            // Layer data waits for the next pass unless every history entry has a size
            let layers = if layer_sizes.len() == manifest.history.len() {
                manifest
                    .layers(&layer_sizes)
                    .map_err(|e| log::error!("Error getting layer info for {}: {}", image_name, e))
                    .ok()
            } else {
                None
            };
            let layer_fingerprint = layers.as_deref().map(fingerprint);

            log::debug!("Updating {} version {} with size {}", image_name, version.sha, download_size);
            self.store
                .save_version_size(version, download_size, layers.as_deref(), layer_fingerprint)
                .await?;
        }

        self.store.set_status(&image, ImageStatus::Inspected).await?;
        Ok(())
    }

    /// Handles at most one message from the inspect or size queue. The
    /// message is deleted once handled or when the failure is permanent, and
    /// left for redelivery when it is worth retrying. Returns whether a
    /// message was received.
    pub async fn process_next(&self, queue: QueueName) -> anyhow::Result<bool> {
        if queue == QueueName::Notify {
            anyhow::bail!("Inspector doesn't consume the {} queue", queue);
        }

        let Some(received) = self.queue.receive(queue).await? else {
            return Ok(false);
        };

        let message: ImageQueueMessage = match received.parse() {
            Ok(message) => message,
            Err(e) => {
                log::error!("Dropping malformed message on {}: {:#}", queue, e);
                self.queue.delete(queue, &received).await?;
                return Ok(true);
            }
        };

        let result = match queue {
            QueueName::Size => self.inspect_size(&message.image_name).await,
            _ => self.inspect(&message.image_name).await.map(|_| ()),
        };

        match result {
            Ok(()) => self.queue.delete(queue, &received).await?,
            Err(e) if e.is_retryable() => {
                log::warn!("{} of {} failed, leaving it queued: {}", queue, message.image_name, e);
            }
            Err(e) => {
                log::error!("{} of {} failed: {}", queue, message.image_name, e);
                self.queue.delete(queue, &received).await?;
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use reqwest::StatusCode;

    fn image(status: ImageStatus) -> images::Model {
        let now = Utc::now().fixed_offset();
        images::Model {
            name: "org/app".to_string(),
            status: status.to_string(),
            latest: None,
            is_private: false,
            is_automated: false,
            description: String::new(),
            pull_count: 0,
            star_count: 0,
            badge_count: 0,
            badges_installed: 0,
            last_updated: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().fixed_offset()),
            created_at: now,
            updated_at: now,
        }
    }

    fn hub(last_updated: chrono::DateTime<Utc>) -> HubInfo {
        HubInfo {
            name: "app".to_string(),
            namespace: "org".to_string(),
            description: Some("An app".to_string()),
            pull_count: 10,
            star_count: 2,
            is_private: true,
            last_updated: Some(last_updated),
            ..Default::default()
        }
    }

    fn version(sha: &str, tags: &[&str], day: Option<u32>) -> InspectedVersion {
        InspectedVersion {
            sha: sha.to_string(),
            author: String::new(),
            labels: String::new(),
            created: day.map(|d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()),
            layer_count: 1,
            manifest: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn unchanged_inspected_image_short_circuits() {
        let mut stored = image(ImageStatus::Inspected);
        let same = hub(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(!apply_hub_info(&mut stored, &same, 0));
        assert_eq!(stored.pull_count, 0);
    }

    #[test]
    fn hub_info_is_applied_otherwise() {
        let newer = hub(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());

        let mut stored = image(ImageStatus::Inspected);
        assert!(apply_hub_info(&mut stored, &newer, 3));
        assert_eq!(stored.pull_count, 10);
        assert_eq!(stored.description, "An app");
        assert_eq!(stored.badges_installed, 3);
        assert!(stored.is_private);

        // Same timestamp but a previous inspection never finished
        let mut stored = image(ImageStatus::Size);
        let same = hub(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(apply_hub_info(&mut stored, &same, 0));
    }

    #[test]
    fn latest_prefers_tag_then_most_recent() {
        let versions = vec![
            version("a", &["1.0"], Some(5)),
            version("b", &["latest"], Some(1)),
        ];
        assert_eq!(select_latest(&versions).as_deref(), Some("b"));

        let versions = vec![
            version("a", &["1.0"], Some(5)),
            version("b", &["2.0"], Some(9)),
            version("c", &["0.1"], None),
        ];
        assert_eq!(select_latest(&versions).as_deref(), Some("b"));

        assert_eq!(select_latest(&[version("c", &["x"], None)]), None);
    }

    #[test]
    fn failure_statuses() {
        assert_eq!(
            failure_status(&RegistryError::Unauthorized("u".to_string())),
            ImageStatus::Missing
        );
        assert_eq!(
            failure_status(&RegistryError::EmptyRepository("org/app".to_string())),
            ImageStatus::FailedInspection
        );
        assert_eq!(
            failure_status(&RegistryError::UnexpectedStatus {
                status: StatusCode::BAD_GATEWAY,
                url: "u".to_string()
            }),
            ImageStatus::FailedInspection
        );
    }

    #[test]
    fn retryable_errors() {
        assert!(InspectError::Registry(RegistryError::RateLimited).is_retryable());
        assert!(!InspectError::Registry(RegistryError::Unauthorized("u".to_string())).is_retryable());
        assert!(!InspectError::Registry(RegistryError::Auth("bad".to_string())).is_retryable());
        assert!(InspectError::Reconciliation(DbErr::Custom("boom".to_string())).is_retryable());
    }
}
