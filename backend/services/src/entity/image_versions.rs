use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "image_versions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub image_name: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub sha: String,
    #[sea_orm(column_type = "Text")]
    pub author: String,
    /// Raw label JSON exactly as the registry reported it
    #[sea_orm(column_type = "Text")]
    pub labels: String,
    pub layer_count: i32,
    #[sea_orm(column_type = "BigInteger")]
    pub download_size: i64,
    pub created: Option<DateTimeWithTimeZone>,
    /// Base-first layer list, filled in by the size phase
    #[sea_orm(column_type = "Json", nullable)]
    pub layers: Option<Json>,
    /// Raw manifest, cleared once size and layer data are extracted
    #[sea_orm(column_type = "Text")]
    pub manifest: String,
    pub fingerprint: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// True while download size, layers or the fingerprint are still missing.
    pub fn needs_size_or_layers(&self) -> bool {
        self.download_size == 0 || self.layers.is_none() || self.fingerprint.is_none()
    }
}
