use sea_orm_migration::prelude::*;

use crate::m20250301_000004_create_subscriptions::Subscriptions;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationMessages::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(NotificationMessages::SubscriptionId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationMessages::ImageName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationMessages::WebhookUrl)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationMessages::Message)
                            .json()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationMessages::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(NotificationMessages::StatusCode)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(NotificationMessages::Response)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(NotificationMessages::SentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationMessages::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notification_messages_subscription")
                            .from(NotificationMessages::Table, NotificationMessages::SubscriptionId)
                            .to(Subscriptions::Table, Subscriptions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_messages_subscription")
                    .table(NotificationMessages::Table)
                    .col(NotificationMessages::SubscriptionId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(NotificationMessages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum NotificationMessages {
    Table,
    Id,
    SubscriptionId,
    ImageName,
    WebhookUrl,
    Message,
    Attempts,
    StatusCode,
    Response,
    SentAt,
    CreatedAt,
}
