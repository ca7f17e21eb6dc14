use anyhow::{Context, Result};
use chrono::Utc;
use layerscope_shared::{ImageLayer, ImageStatus, Viewer};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::entity::{
    image_versions, images, registry_credentials, subscriptions, tags, user_image_permissions,
};
use crate::image_name;

/// Registry id that Docker Hub credentials are stored under.
pub const DOCKER_HUB_REGISTRY: &str = "docker";

/// Row-level persistence for images and everything hanging off them.
#[derive(Clone)]
pub struct ImageStore {
    db: DatabaseConnection,
    site_url: String,
}

/// Every column of an image row marked for writing, with a fresh `updated_at`.
pub(crate) fn image_active_model(image: &images::Model) -> images::ActiveModel {
    images::ActiveModel {
        name: Set(image.name.clone()),
        status: Set(image.status.clone()),
        latest: Set(image.latest.clone()),
        is_private: Set(image.is_private),
        is_automated: Set(image.is_automated),
        description: Set(image.description.clone()),
        pull_count: Set(image.pull_count),
        star_count: Set(image.star_count),
        badge_count: Set(image.badge_count),
        badges_installed: Set(image.badges_installed),
        last_updated: Set(image.last_updated),
        created_at: Set(image.created_at),
        updated_at: Set(Utc::now().fixed_offset()),
    }
}

impl ImageStore {
    pub fn new(db: DatabaseConnection, site_url: &str) -> Self {
        Self {
            db,
            site_url: site_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn page_url(&self, image: &images::Model) -> String {
        image_name::page_url(&self.site_url, &image.name, image.is_private)
    }

    pub async fn get_image(&self, name: &str) -> Result<Option<images::Model>> {
        images::Entity::find_by_id(name.to_string())
            .one(&self.db)
            .await
            .with_context(|| format!("Failed to get image {}", name))
    }

    /// Fetches the image, creating it as `MISSING` on first reference.
    pub async fn get_or_create_image(&self, name: &str) -> Result<images::Model> {
        if let Some(image) = self.get_image(name).await? {
            return Ok(image);
        }

        let now = Utc::now().fixed_offset();
        let image = images::ActiveModel {
            name: Set(name.to_string()),
            status: Set(ImageStatus::Missing.to_string()),
            latest: Set(None),
            is_private: Set(false),
            is_automated: Set(false),
            description: Set(String::new()),
            pull_count: Set(0),
            star_count: Set(0),
            badge_count: Set(0),
            badges_installed: Set(0),
            last_updated: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // A concurrent creator may win; either way the row exists afterwards
        images::Entity::insert(image)
            .on_conflict(OnConflict::column(images::Column::Name).do_nothing().to_owned())
            .exec_without_returning(&self.db)
            .await
            .with_context(|| format!("Failed to create image {}", name))?;

        log::debug!("Created image {}", name);
        self.get_image(name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Image {} vanished after creation", name))
    }

    /// Saves the image row alone, leaving versions and tags untouched.
    pub async fn put_image_only(&self, image: &images::Model) -> Result<images::Model> {
        image_active_model(image)
            .update(&self.db)
            .await
            .with_context(|| format!("Failed to save image {}", image.name))
    }

    pub async fn set_status(&self, image: &images::Model, status: ImageStatus) -> Result<images::Model> {
        let mut image = image.clone();
        image.status = status.to_string();
        self.put_image_only(&image).await
    }

    pub async fn image_version(&self, name: &str, sha: &str) -> Result<Option<image_versions::Model>> {
        image_versions::Entity::find_by_id((name.to_string(), sha.to_string()))
            .one(&self.db)
            .await
            .with_context(|| format!("Failed to get version {} of {}", sha, name))
    }

    /// Versions, tagged or not, that still hold an unprocessed manifest.
    pub async fn versions_with_manifests(&self, name: &str) -> Result<Vec<image_versions::Model>> {
        image_versions::Entity::find()
            .filter(image_versions::Column::ImageName.eq(name))
            .filter(image_versions::Column::Manifest.ne(""))
            .order_by_asc(image_versions::Column::Sha)
            .all(&self.db)
            .await
            .with_context(|| format!("Failed to get versions with manifests for {}", name))
    }

    /// Stores the size phase results and drops the raw manifest.
    pub async fn save_version_size(
        &self,
        version: image_versions::Model,
        download_size: i64,
        layers: Option<&[ImageLayer]>,
        fingerprint: Option<String>,
    ) -> Result<image_versions::Model> {
        let name = version.image_name.clone();
        let sha = version.sha.clone();
        let mut active: image_versions::ActiveModel = version.into();

        active.download_size = Set(download_size);
        if let Some(layers) = layers {
            active.layers = Set(Some(serde_json::to_value(layers)?));
        }
        if fingerprint.is_some() {
            active.fingerprint = Set(fingerprint);
        }
        active.manifest = Set(String::new());

        active
            .update(&self.db)
            .await
            .with_context(|| format!("Failed to save size of version {} of {}", sha, name))
    }

    pub async fn clear_manifest(&self, version: image_versions::Model) -> Result<()> {
        let mut active: image_versions::ActiveModel = version.into();
        active.manifest = Set(String::new());
        active.update(&self.db).await?;
        Ok(())
    }

    /// Versions sharing `fingerprint`, excluding the version `(image_name, sha)` itself.
    pub async fn versions_by_fingerprint(
        &self,
        fingerprint: &str,
        sha: &str,
        image_name: &str,
    ) -> Result<Vec<image_versions::Model>> {
        let versions = image_versions::Entity::find()
            .filter(image_versions::Column::Fingerprint.eq(fingerprint))
            .filter(
                Condition::any()
                    .add(image_versions::Column::Sha.ne(sha))
                    .add(image_versions::Column::ImageName.ne(image_name)),
            )
            .order_by_asc(image_versions::Column::ImageName)
            .order_by_asc(image_versions::Column::Sha)
            .all(&self.db)
            .await
            .context("Failed to get versions by fingerprint")?;

        log::debug!("Found {} other versions with fingerprint {}", versions.len(), fingerprint);
        Ok(versions)
    }

    pub async fn tags_for_image(&self, name: &str) -> Result<Vec<tags::Model>> {
        tags::Entity::find()
            .filter(tags::Column::ImageName.eq(name))
            .order_by_asc(tags::Column::Tag)
            .all(&self.db)
            .await
            .with_context(|| format!("Failed to get tags for {}", name))
    }

    pub async fn tag_names_for_version(&self, name: &str, sha: &str) -> Result<Vec<String>> {
        let tags = tags::Entity::find()
            .filter(tags::Column::ImageName.eq(name))
            .filter(tags::Column::Sha.eq(sha))
            .order_by_asc(tags::Column::Tag)
            .all(&self.db)
            .await
            .with_context(|| format!("Failed to get tags for version {} of {}", sha, name))?;

        Ok(tags.into_iter().map(|t| t.tag).collect())
    }

    /// The image if `viewer` may see it. Public images are visible to all;
    /// private ones need a permission row for the viewer. Unknown images
    /// are an error.
    pub async fn image_for_viewer(&self, name: &str, viewer: &Viewer) -> Result<Option<images::Model>> {
        let image = self
            .get_image(name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Image {} not found", name))?;

        if !image.is_private {
            return Ok(Some(image));
        }

        match viewer.user_id() {
            Some(user_id) if self.has_image_permission(user_id, name).await? => Ok(Some(image)),
            _ => Ok(None),
        }
    }

    pub async fn has_image_permission(&self, user_id: i64, name: &str) -> Result<bool> {
        let permission = user_image_permissions::Entity::find_by_id((user_id, name.to_string()))
            .one(&self.db)
            .await
            .context("Failed to check image permission")?;
        Ok(permission.is_some())
    }

    pub async fn grant_image_permission(&self, user_id: i64, name: &str) -> Result<()> {
        let permission = user_image_permissions::ActiveModel {
            user_id: Set(user_id),
            image_name: Set(name.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        };

        user_image_permissions::Entity::insert(permission)
            .on_conflict(
                OnConflict::columns([
                    user_image_permissions::Column::UserId,
                    user_image_permissions::Column::ImageName,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("Failed to grant image permission")?;
        Ok(())
    }

    /// Stored Docker Hub credentials of every user holding a permission on the image.
    pub async fn registry_credentials_for_image(
        &self,
        name: &str,
    ) -> Result<Vec<registry_credentials::Model>> {
        let user_ids: Vec<i64> = user_image_permissions::Entity::find()
            .filter(user_image_permissions::Column::ImageName.eq(name))
            .order_by_asc(user_image_permissions::Column::CreatedAt)
            .all(&self.db)
            .await
            .context("Failed to get image permissions")?
            .into_iter()
            .map(|p| p.user_id)
            .collect();

        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        registry_credentials::Entity::find()
            .filter(registry_credentials::Column::RegistryId.eq(DOCKER_HUB_REGISTRY))
            .filter(registry_credentials::Column::UserId.is_in(user_ids))
            .all(&self.db)
            .await
            .with_context(|| format!("Failed to get registry credentials for {}", name))
    }

    pub async fn save_registry_credentials(
        &self,
        user_id: i64,
        user: &str,
        encrypted_key: &str,
        encrypted_password: &str,
    ) -> Result<()> {
        let credentials = registry_credentials::ActiveModel {
            registry_id: Set(DOCKER_HUB_REGISTRY.to_string()),
            user_id: Set(user_id),
            user: Set(user.to_string()),
            encrypted_password: Set(encrypted_password.to_string()),
            encrypted_key: Set(encrypted_key.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        };

        registry_credentials::Entity::insert(credentials)
            .on_conflict(
                OnConflict::columns([
                    registry_credentials::Column::RegistryId,
                    registry_credentials::Column::UserId,
                ])
                .update_columns([
                    registry_credentials::Column::User,
                    registry_credentials::Column::EncryptedPassword,
                    registry_credentials::Column::EncryptedKey,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("Failed to save registry credentials")?;
        Ok(())
    }

    pub async fn create_subscription(
        &self,
        user_id: i64,
        name: &str,
        webhook_url: &str,
    ) -> Result<subscriptions::Model> {
        let subscription = subscriptions::ActiveModel {
            user_id: Set(user_id),
            image_name: Set(name.to_string()),
            webhook_url: Set(webhook_url.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };

        subscription
            .insert(&self.db)
            .await
            .with_context(|| format!("Failed to subscribe user {} to {}", user_id, name))
    }
}
