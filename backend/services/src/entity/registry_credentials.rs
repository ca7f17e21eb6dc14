use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "registry_credentials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub registry_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    pub user: String,
    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text")]
    pub encrypted_password: String,
    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text")]
    pub encrypted_key: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
