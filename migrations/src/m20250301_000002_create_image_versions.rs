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
                    .table(ImageVersions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ImageVersions::ImageName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ImageVersions::Sha)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ImageVersions::Author)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ImageVersions::Labels)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ImageVersions::LayerCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImageVersions::DownloadSize)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImageVersions::Created)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ImageVersions::Layers).json().null())
                    .col(
                        ColumnDef::new(ImageVersions::Manifest)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ImageVersions::Fingerprint)
                            .string_len(64)
                            .null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(ImageVersions::ImageName)
                            .col(ImageVersions::Sha),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_image_versions_image")
                            .from(ImageVersions::Table, ImageVersions::ImageName)
                            .to(Images::Table, Images::Name)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Lineage lookups match versions across every image by fingerprint
        manager
            .create_index(
                Index::create()
                    .name("idx_image_versions_fingerprint")
                    .table(ImageVersions::Table)
                    .col(ImageVersions::Fingerprint)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ImageVersions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ImageVersions {
    Table,
    ImageName,
    Sha,
    Author,
    Labels,
    LayerCount,
    DownloadSize,
    Created,
    Layers,
    Manifest,
    Fingerprint,
}
