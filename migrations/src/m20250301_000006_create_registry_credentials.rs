use sea_orm_migration::prelude::*;

use crate::m20250301_000001_create_images::Images;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RegistryCredentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RegistryCredentials::RegistryId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RegistryCredentials::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RegistryCredentials::User)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RegistryCredentials::EncryptedPassword)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RegistryCredentials::EncryptedKey)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RegistryCredentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(RegistryCredentials::RegistryId)
                            .col(RegistryCredentials::UserId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserImagePermissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserImagePermissions::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserImagePermissions::ImageName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserImagePermissions::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(UserImagePermissions::UserId)
                            .col(UserImagePermissions::ImageName),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_image_permissions_image")
                            .from(UserImagePermissions::Table, UserImagePermissions::ImageName)
                            .to(Images::Table, Images::Name)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_image_permissions_image")
                    .table(UserImagePermissions::Table)
                    .col(UserImagePermissions::ImageName)
                    .to_owned(),
            )
            .await?;

        log::info!("Created registry credential and image permission tables");

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserImagePermissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RegistryCredentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RegistryCredentials {
    Table,
    RegistryId,
    UserId,
    User,
    EncryptedPassword,
    EncryptedKey,
    CreatedAt,
}

#[derive(DeriveIden)]
enum UserImagePermissions {
    Table,
    UserId,
    ImageName,
    CreatedAt,
}
