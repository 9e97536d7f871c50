use sea_orm_migration::prelude::*;

use super::m20240607_224721_create_table_track::Track;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Playlist::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Playlist::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Playlist::Name).string().not_null().unique_key())
                    .col(ColumnDef::new(Playlist::IsUserCreated).boolean().not_null().default(true))
                    .col(ColumnDef::new(Playlist::CreatedBy).string().not_null().default("system"))
                    .col(ColumnDef::new(Playlist::CreatedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PlaylistTrack::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PlaylistTrack::PlaylistId).integer().not_null())
                    .col(ColumnDef::new(PlaylistTrack::TrackId).integer().not_null())
                    .primary_key(
                        Index::create()
                            .col(PlaylistTrack::PlaylistId)
                            .col(PlaylistTrack::TrackId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-playlist_track-playlist_id")
                            .from(PlaylistTrack::Table, PlaylistTrack::PlaylistId)
                            .to(Playlist::Table, Playlist::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-playlist_track-track_id")
                            .from(PlaylistTrack::Table, PlaylistTrack::TrackId)
                            .to(Track::Table, Track::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PlaylistTrack::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Playlist::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Playlist {
    Table,
    Id,
    Name,
    IsUserCreated,
    CreatedBy,
    CreatedAt,
}

#[derive(DeriveIden)]
enum PlaylistTrack {
    Table,
    PlaylistId,
    TrackId,
}
