use chrono::{DateTime, Utc};
use layerscope_shared::ImageLayer;
use serde::{Deserialize, Serialize};

use super::error::RegistryError;

/// Schema v1 image manifest as served by the registry. Entry `i` of
/// `history` describes the layer whose blob is `fs_layers[i]`, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub history: Vec<History>,
    #[serde(default)]
    pub fs_layers: Vec<FsLayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: String,
}

/// The JSON document embedded as a string in each history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct V1Compatibility {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub throwaway: bool,
    #[serde(default)]
    pub config: Option<ImageConfig>,
    #[serde(default)]
    pub container_config: Option<ContainerConfig>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "Labels", default)]
    pub labels: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
}

/// Version-level metadata taken from the newest history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub sha: String,
    pub author: String,
    pub labels: String,
    pub created: Option<DateTime<Utc>>,
    pub layer_count: i32,
}

impl Manifest {
    pub fn from_slice(body: &[u8]) -> Result<Self, RegistryError> {
        serde_json::from_slice(body).map_err(|e| RegistryError::InvalidManifest(e.to_string()))
    }

    pub fn parse_str(body: &str) -> Result<Self, RegistryError> {
        Self::from_slice(body.as_bytes())
    }

    fn compatibility(&self, index: usize) -> Result<V1Compatibility, RegistryError> {
        let history = self
            .history
            .get(index)
            .ok_or_else(|| RegistryError::InvalidManifest(format!("no history entry {}", index)))?;

        serde_json::from_str(&history.v1_compatibility)
            .map_err(|e| RegistryError::InvalidManifest(format!("Error unmarshalling history: {}", e)))
    }

    /// Version identity and metadata. The version sha is the id of the newest
    /// history entry; an unparseable creation time is logged and left empty.
    pub fn version_info(&self) -> Result<VersionInfo, RegistryError> {
        if self.history.is_empty() {
            return Err(RegistryError::InvalidManifest(
                "No history for this image".to_string(),
            ));
        }

        let v1c = self.compatibility(0)?;
        if v1c.id.is_empty() {
            return Err(RegistryError::InvalidManifest(
                "Newest history entry has no id".to_string(),
            ));
        }

        let created = v1c.created.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| log::info!("Couldn't get created time for {} from string {}", self.name, raw))
                .ok()
        });

        let labels = match v1c.config.and_then(|c| c.labels) {
            Some(serde_json::Value::Null) | None => String::new(),
            Some(value) => value.to_string(),
        };

        Ok(VersionInfo {
            sha: v1c.id,
            author: v1c.author.unwrap_or_default(),
            labels,
            created,
            layer_count: self.fs_layers.len() as i32,
        })
    }

    /// Builds the layer list, oldest (base) layer first. `layer_sizes` must
    /// be in manifest order and have one entry per history entry.
    pub fn layers(&self, layer_sizes: &[i64]) -> Result<Vec<ImageLayer>, RegistryError> {
        if layer_sizes.len() != self.history.len() || self.fs_layers.len() != self.history.len() {
            return Err(RegistryError::InvalidManifest(format!(
                "{} history entries, {} blobs and {} sizes",
                self.history.len(),
                self.fs_layers.len(),
                layer_sizes.len()
            )));
        }

        let mut layers = Vec::with_capacity(self.history.len());
        for (i, fs_layer) in self.fs_layers.iter().enumerate() {
            let v1c = self.compatibility(i)?;
            let cmd = v1c
                .container_config
                .and_then(|c| c.cmd)
                .unwrap_or_default();

            layers.push(ImageLayer {
                blob_sum: fs_layer.blob_sum.clone(),
                command: format_history(&cmd),
                download_size: layer_sizes[i],
            });
        }

        layers.reverse();
        Ok(layers)
    }
}

/// Turns a raw history command into something Dockerfile-shaped.
///
/// `/bin/sh -c #(nop) ENV x` becomes `ENV x`, anything else run through the
/// shell becomes `RUN ...`, and an empty command stays empty.
pub fn format_history(input: &[String]) -> String {
    let cmd = input.join(" ");
    let cmd = cmd.trim();
    let cmd = cmd.strip_prefix("/bin/sh -c").unwrap_or(cmd).trim();

    if let Some(directive) = cmd.strip_prefix("#(nop)") {
        let directive = directive.trim();
        // COPY and ADD carry a printf template in front
        directive
            .strip_prefix("%s %s in %s")
            .unwrap_or(directive)
            .trim()
            .to_string()
    } else if !cmd.is_empty() {
        format!("RUN {}", cmd)
    } else {
        String::new()
    }
}
