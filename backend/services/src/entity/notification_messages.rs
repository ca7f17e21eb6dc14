use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(column_type = "BigInteger")]
    pub subscription_id: i64,
    pub image_name: String,
    #[sea_orm(column_type = "Text")]
    pub webhook_url: String,
    #[sea_orm(column_type = "Json")]
    pub message: Json,
    pub attempts: i32,
    pub status_code: i32,
    #[sea_orm(column_type = "Text")]
    pub response: String,
    pub sent_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A webhook call has already come back with a 2xx status.
    pub fn delivered(&self) -> bool {
        self.sent_at.is_some() && (200..=299).contains(&self.status_code)
    }
}
