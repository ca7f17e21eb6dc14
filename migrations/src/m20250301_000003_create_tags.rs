use sea_orm_migration::prelude::*;

use crate::m20250301_000002_create_image_versions::ImageVersions;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tags::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tags::ImageName).string_len(255).not_null())
                    .col(ColumnDef::new(Tags::Tag).string_len(255).not_null())
                    .col(ColumnDef::new(Tags::Sha).string_len(255).not_null())
                    .primary_key(Index::create().col(Tags::ImageName).col(Tags::Tag))
                    // A tag can only ever point at a version of its own image
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tags_image_version")
                            .from_tbl(Tags::Table)
                            .from_col(Tags::ImageName)
                            .from_col(Tags::Sha)
                            .to_tbl(ImageVersions::Table)
                            .to_col(ImageVersions::ImageName)
                            .to_col(ImageVersions::Sha)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tags_image_version")
                    .table(Tags::Table)
                    .col(Tags::ImageName)
                    .col(Tags::Sha)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tags::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tags {
    Table,
    ImageName,
    Tag,
    Sha,
}
