use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Track::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Track::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Track::Uuid).string().not_null().unique_key())
                    .col(ColumnDef::new(Track::Path).string().not_null().unique_key())
                    .col(ColumnDef::new(Track::Extension).string().not_null())
                    .col(ColumnDef::new(Track::Title).string().not_null())
                    .col(ColumnDef::new(Track::Artist).string().not_null())
                    .col(ColumnDef::new(Track::Album).string().not_null())
                    .col(ColumnDef::new(Track::Genre).string().not_null())
                    .col(ColumnDef::new(Track::Year).integer().not_null().default(0))
                    .col(ColumnDef::new(Track::DurationSeconds).integer().not_null().default(0))
                    .col(ColumnDef::new(Track::SourceType).string().not_null().default("local"))
                    .col(ColumnDef::new(Track::CoverArt).binary().null())
                    .col(ColumnDef::new(Track::CoverArtMime).string().null())
                    .col(ColumnDef::new(Track::AddedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-track-genre")
                    .table(Track::Table)
                    .col(Track::Genre)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Track::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Track {
    Table,
    Id,
    Uuid,
    Path,
    Extension,
    Title,
    Artist,
    Album,
    Genre,
    Year,
    DurationSeconds,
    SourceType,
    CoverArt,
    CoverArtMime,
    AddedAt,
}
