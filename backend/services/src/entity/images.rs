use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "images")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub status: String,
    pub latest: Option<String>,
    pub is_private: bool,
    pub is_automated: bool,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "BigInteger")]
    pub pull_count: i64,
    #[sea_orm(column_type = "BigInteger")]
    pub star_count: i64,
    pub badge_count: i32,
    pub badges_installed: i32,
    pub last_updated: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
