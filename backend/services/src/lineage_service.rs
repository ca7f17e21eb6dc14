use anyhow::{Context, Result};
use chrono::Utc;
use layerscope_shared::{ImageLayer, RelatedVersion, VersionDetail, Viewer};

use crate::entity::image_versions;
use crate::fingerprint::fingerprint;
use crate::image_name::{display_name, is_official};
use crate::image_store::ImageStore;
use crate::labels::parse_labels;

/// When any match comes from an official image, matches before the first
/// official one and non-official matches after it are dropped. Without
/// official matches the list is returned unchanged.
pub fn prefer_official(matches: Vec<image_versions::Model>) -> Vec<image_versions::Model> {
    let mut kept = Vec::with_capacity(matches.len());
    let mut found_official = false;

    for candidate in matches {
        if is_official(&candidate.image_name) {
            if !found_official && !kept.is_empty() {
                log::debug!("Discarding {} unofficial matched images", kept.len());
                kept.clear();
            }
            found_official = true;
            kept.push(candidate);
        } else if found_official {
            log::debug!("Discarding an unofficial matched image");
        } else {
            kept.push(candidate);
        }
    }

    kept
}

/// Finds which stored versions share a layer stack with a given one.
#[derive(Clone)]
pub struct LineageService {
    store: ImageStore,
}

impl LineageService {
    pub fn new(store: ImageStore) -> Self {
        Self { store }
    }

    /// Versions whose fingerprint equals that of `layers`, excluding the
    /// version `(image_name, sha)` itself, filtered by official preference and
    /// by what `viewer` is allowed to see.
    pub async fn identical_versions(
        &self,
        layers: &[ImageLayer],
        sha: &str,
        image_name: &str,
        viewer: &Viewer,
    ) -> Result<Vec<RelatedVersion>> {
        let fingerprint = fingerprint(layers);
        let matches = self
            .store
            .versions_by_fingerprint(&fingerprint, sha, image_name)
            .await?;

        let mut related = Vec::new();
        for candidate in prefer_official(matches) {
            let image = match self.store.image_for_viewer(&candidate.image_name, viewer).await {
                Ok(Some(image)) => image,
                Ok(None) => {
                    log::debug!("Discarding a matching image that the viewer doesn't have permission to access");
                    continue;
                }
                Err(e) => {
                    log::error!("Error looking up matched image {}: {}", candidate.image_name, e);
                    continue;
                }
            };

            let tags = self
                .store
                .tag_names_for_version(&candidate.image_name, &candidate.sha)
                .await?;

            related.push(RelatedVersion {
                image_name: candidate.image_name,
                sha: candidate.sha,
                tags,
                page_url: self.store.page_url(&image),
                layers: layers.to_vec(),
            });
        }

        Ok(related)
    }

    /// Longest proper prefix of `layers` that matches other versions. On a
    /// match the prefix is removed from `layers`, leaving the layers this
    /// version adds on top of its parents.
    pub async fn parents(
        &self,
        layers: &mut Vec<ImageLayer>,
        sha: &str,
        image_name: &str,
        viewer: &Viewer,
    ) -> Result<Vec<RelatedVersion>> {
        for prefix_len in (1..layers.len()).rev() {
            let parents = self
                .identical_versions(&layers[..prefix_len], sha, image_name, viewer)
                .await?;

            if !parents.is_empty() {
                if parents.len() > 1 {
                    log::info!("More than one identical parent for {} version {}", image_name, sha);
                }
                layers.drain(..prefix_len);
                return Ok(parents);
            }
        }

        Ok(Vec::new())
    }

    /// A version as a viewer sees it, with labels parsed and its lineage
    /// worked out. `None` when the version doesn't exist or the viewer may not
    /// see its image.
    pub async fn version_detail(
        &self,
        image_name: &str,
        sha: &str,
        viewer: &Viewer,
    ) -> Result<Option<VersionDetail>> {
        if self.store.image_for_viewer(image_name, viewer).await?.is_none() {
            return Ok(None);
        }

        let Some(version) = self.store.image_version(image_name, sha).await? else {
            return Ok(None);
        };

        let parsed = parse_labels(&version.labels);
        let tags = self.store.tag_names_for_version(image_name, sha).await?;

        let mut layers: Vec<ImageLayer> = match &version.layers {
            Some(value) => serde_json::from_value(value.clone())
                .with_context(|| format!("Bad layers stored for {} version {}", image_name, sha))?,
            None => Vec::new(),
        };

        let (identical, parents) = if layers.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let identical = self
                .identical_versions(&layers, sha, image_name, viewer)
                .await?;
            if !identical.is_empty() {
                log::info!("Identical images found for {} version {}", image_name, sha);
            }
            let parents = self.parents(&mut layers, sha, image_name, viewer).await?;
            (identical, parents)
        };

        Ok(Some(VersionDetail {
            image_name: display_name(&version.image_name).to_string(),
            sha: version.sha,
            author: version.author,
            created: version.created.map(|c| c.with_timezone(&Utc)),
            layer_count: version.layer_count,
            download_size: version.download_size,
            tags,
            labels: parsed.labels,
            license: parsed.license,
            version_control: parsed.version_control,
            layers,
            parents,
            identical,
        }))
    }
}
