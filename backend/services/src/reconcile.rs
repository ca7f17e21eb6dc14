use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use layerscope_shared::{Changeset, TagRef};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, Set, TransactionTrait,
};

use crate::entity::{image_versions, images, notification_messages, tags};
use crate::image_name::display_name;
use crate::image_store::{ImageStore, image_active_model};
use crate::notification_service;

/// One distinct version found while walking an image's tags.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectedVersion {
    pub sha: String,
    pub author: String,
    pub labels: String,
    pub created: Option<DateTime<Utc>>,
    pub layer_count: i32,
    pub manifest: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub new_tags: Vec<TagRef>,
    pub changed_tags: Vec<TagRef>,
    pub deleted_tags: Vec<TagRef>,
}

/// Result of a committed reconciliation, with the delivery tasks that were
/// written in the same transaction.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub changeset: Changeset,
    pub notifications: Vec<notification_messages::Model>,
}

/// Classifies tags by name. Incoming tags absent from `old` are new, those
/// present with a different sha are changed, and old tags missing from
/// `incoming` are deleted. Unchanged tags appear in no list.
pub fn diff_tags(old: &[TagRef], incoming: &[TagRef]) -> TagDiff {
    let old_by_name: HashMap<&str, &TagRef> = old.iter().map(|t| (t.tag.as_str(), t)).collect();
    let incoming_names: HashSet<&str> = incoming.iter().map(|t| t.tag.as_str()).collect();
    let mut diff = TagDiff::default();

    for tag in incoming {
        match old_by_name.get(tag.tag.as_str()) {
            None => diff.new_tags.push(tag.clone()),
            Some(existing) if existing.sha != tag.sha => diff.changed_tags.push(tag.clone()),
            Some(_) => {}
        }
    }

    diff.deleted_tags = old
        .iter()
        .filter(|t| !incoming_names.contains(t.tag.as_str()))
        .cloned()
        .collect();

    diff
}

/// Flattens versions into tag refs. A tag name claimed twice keeps its first
/// version.
pub fn incoming_tags(image_name: &str, versions: &[InspectedVersion]) -> Vec<TagRef> {
    let mut seen = HashSet::new();
    versions
        .iter()
        .flat_map(|v| v.tags.iter().map(move |tag| (v, tag)))
        .filter(|(_, tag)| seen.insert(tag.as_str()))
        .map(|(v, tag)| TagRef::new(image_name, tag, &v.sha))
        .collect()
}

pub fn changeset_text(image_name: &str, page_url: &str) -> String {
    format!(
        "MicroBadger: Docker Hub image {} has changed {}",
        display_name(image_name),
        page_url
    )
}

impl ImageStore {
    /// Saves the image row, its versions and its tags as one unit of work and
    /// reports how the tag set moved. Any failure rolls everything back.
    ///
    /// Versions are never deleted. A version that already exists keeps its
    /// stored size, layers and fingerprint; its manifest is only refreshed when
    /// the size phase still has work to do on it.
    pub async fn put_image(
        &self,
        image: &images::Model,
        versions: &[InspectedVersion],
    ) -> Result<Reconciled, DbErr> {
        let txn = self.connection().begin().await?;

        let old: Vec<TagRef> = tags::Entity::find()
            .filter(tags::Column::ImageName.eq(image.name.as_str()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|t| TagRef::new(&t.image_name, &t.tag, &t.sha))
            .collect();
        log::debug!("There are currently {} tags for {}", old.len(), image.name);

        image_active_model(image).update(&txn).await?;

        for version in versions {
            let existing = image_versions::Entity::find_by_id((image.name.clone(), version.sha.clone()))
                .one(&txn)
                .await?;

            match existing {
                None => {
                    log::debug!("Saving new version {} of {}", version.sha, image.name);
                    let model = image_versions::ActiveModel {
                        image_name: Set(image.name.clone()),
                        sha: Set(version.sha.clone()),
                        author: Set(version.author.clone()),
                        labels: Set(version.labels.clone()),
                        layer_count: Set(version.layer_count),
                        download_size: Set(0),
                        created: Set(version.created.map(|c| c.fixed_offset())),
                        layers: Set(None),
                        manifest: Set(version.manifest.clone()),
                        fingerprint: Set(None),
                    };
                    image_versions::Entity::insert(model)
                        .exec_without_returning(&txn)
                        .await?;
                }
                Some(existing) if existing.needs_size_or_layers() && existing.manifest.is_empty() => {
                    let mut active: image_versions::ActiveModel = existing.into();
                    active.manifest = Set(version.manifest.clone());
                    active.update(&txn).await?;
                }
                Some(_) => {}
            }
        }

        let incoming = incoming_tags(&image.name, versions);
        let diff = diff_tags(&old, &incoming);

        for tag in &diff.new_tags {
            log::debug!("Tag {} is new", tag.tag);
            let model = tags::ActiveModel {
                image_name: Set(tag.image_name.clone()),
                tag: Set(tag.tag.clone()),
                sha: Set(tag.sha.clone()),
            };
            tags::Entity::insert(model).exec_without_returning(&txn).await?;
        }

        for tag in &diff.changed_tags {
            log::debug!("Tag {} moved to {}", tag.tag, tag.sha);
            tags::Entity::update_many()
                .col_expr(tags::Column::Sha, Expr::value(tag.sha.clone()))
                .filter(tags::Column::ImageName.eq(tag.image_name.as_str()))
                .filter(tags::Column::Tag.eq(tag.tag.as_str()))
                .exec(&txn)
                .await?;
        }

        for tag in &diff.deleted_tags {
            log::debug!("Deleting tag {} for version {} of {}", tag.tag, tag.sha, tag.image_name);
            tags::Entity::delete_many()
                .filter(tags::Column::ImageName.eq(tag.image_name.as_str()))
                .filter(tags::Column::Tag.eq(tag.tag.as_str()))
                .exec(&txn)
                .await?;
        }

        let changeset = Changeset {
            text: changeset_text(&image.name, &self.page_url(image)),
            image_name: display_name(&image.name).to_string(),
            new_tags: diff.new_tags,
            changed_tags: diff.changed_tags,
            deleted_tags: diff.deleted_tags,
        };

        let notifications = if changeset.is_empty() {
            Vec::new()
        } else {
            notification_service::stage_messages(&txn, &image.name, &changeset).await?
        };

        txn.commit().await?;

        Ok(Reconciled {
            changeset,
            notifications,
        })
    }
}
