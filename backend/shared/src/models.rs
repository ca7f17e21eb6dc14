use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Namespace that official images live under on Docker Hub.
pub const OFFICIAL_NAMESPACE: &str = "library";

/// Lifecycle of an image as it moves through inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageStatus {
    Missing,
    Sitemap,
    Submitted,
    FailedInspection,
    Size,
    Inspected,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Missing => "MISSING",
            ImageStatus::Sitemap => "SITEMAP",
            ImageStatus::Submitted => "SUBMITTED",
            ImageStatus::FailedInspection => "FAILED_INSPECTION",
            ImageStatus::Size => "SIZE",
            ImageStatus::Inspected => "INSPECTED",
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MISSING" => Ok(ImageStatus::Missing),
            "SITEMAP" => Ok(ImageStatus::Sitemap),
            "SUBMITTED" => Ok(ImageStatus::Submitted),
            "FAILED_INSPECTION" => Ok(ImageStatus::FailedInspection),
            "SIZE" => Ok(ImageStatus::Size),
            "INSPECTED" => Ok(ImageStatus::Inspected),
            other => Err(format!("unknown image status: {}", other)),
        }
    }
}

/// One filesystem layer of an image version, base layer first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLayer {
    pub blob_sum: String,
    pub command: String,
    pub download_size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub tag: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub sha: String,
}

impl TagRef {
    pub fn new(image_name: &str, tag: &str, sha: &str) -> Self {
        Self {
            tag: tag.to_string(),
            image_name: image_name.to_string(),
            sha: sha.to_string(),
        }
    }
}

/// Tag-level differences between two successive inspections of one image.
/// This is also the JSON body posted to subscriber webhooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub text: String,
    pub image_name: String,
    pub new_tags: Vec<TagRef>,
    pub changed_tags: Vec<TagRef>,
    pub deleted_tags: Vec<TagRef>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.new_tags.is_empty() && self.changed_tags.is_empty() && self.deleted_tags.is_empty()
    }
}

/// Repository summary returned by the hub metadata service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub full_description: Option<String>,
    #[serde(default)]
    pub is_automated: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pull_count: i64,
    #[serde(default)]
    pub star_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// An image to talk to the registry about, with optional stored credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryImage {
    pub name: String,
    pub credentials: Option<Credentials>,
}

impl RegistryImage {
    pub fn anonymous(name: &str) -> Self {
        Self {
            name: name.to_string(),
            credentials: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

/// Who is looking at lineage data. Produced by the session lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Authenticated(User),
    Anonymous,
}

impl Viewer {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Viewer::Authenticated(user) => Some(user.id),
            Viewer::Anonymous => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub code: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionControl {
    pub vcs_type: String,
    pub url: String,
    pub commit: String,
}

/// A version from another image that shares some or all of our layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedVersion {
    pub image_name: String,
    pub sha: String,
    pub tags: Vec<String>,
    pub page_url: String,
    pub layers: Vec<ImageLayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDetail {
    pub image_name: String,
    pub sha: String,
    pub author: String,
    pub created: Option<DateTime<Utc>>,
    pub layer_count: i32,
    pub download_size: i64,
    pub tags: Vec<String>,
    pub labels: HashMap<String, String>,
    pub license: Option<License>,
    pub version_control: Option<VersionControl>,
    pub layers: Vec<ImageLayer>,
    pub parents: Vec<RelatedVersion>,
    pub identical: Vec<RelatedVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageQueueMessage {
    pub image_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationQueueMessage {
    pub notification_message_id: i64,
}
