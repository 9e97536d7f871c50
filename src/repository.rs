use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use sea_query::OnConflict;
use uuid::Uuid;

use entity::prelude::{Playlist, PlaylistTrack, Track};
use entity::{playlist, playlist_track, track};

use crate::error::RepositoryError;
use crate::library::{GenreCount, PlaylistRecord, TrackMetadata, LOCAL_SOURCE};

/// Rows per INSERT statement; keeps bind parameters well under SQLite's limit.
const TRACK_INSERT_CHUNK: usize = 50;
const MEMBERSHIP_INSERT_CHUNK: usize = 500;

/// The persistent catalog as seen by the synchronizer and the playlist builder.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn existing_source_paths(&self) -> Result<HashSet<String>, RepositoryError>;

    /// Inserts all records in one transaction. Rows whose path already exists
    /// are left alone; returns how many rows were actually written.
    async fn bulk_insert_tracks(&self, records: &[TrackMetadata]) -> Result<u64, RepositoryError>;

    async fn find_or_create_playlist(
        &self,
        name: &str,
        is_user_created: bool,
        created_by: &str,
    ) -> Result<PlaylistRecord, RepositoryError>;

    async fn clear_membership(&self, playlist_id: i32) -> Result<(), RepositoryError>;

    async fn bulk_insert_membership(
        &self,
        playlist_id: i32,
        track_ids: &BTreeSet<i32>,
    ) -> Result<u64, RepositoryError>;

    async fn all_track_ids(&self) -> Result<BTreeSet<i32>, RepositoryError>;

    /// Genres ordered by track count descending, then by name.
    async fn top_genres_by_count(&self, limit: u64) -> Result<Vec<GenreCount>, RepositoryError>;

    /// The lowest `limit` track ids in `genre`.
    async fn track_ids_by_genre(
        &self,
        genre: &str,
        limit: u64,
    ) -> Result<BTreeSet<i32>, RepositoryError>;

    /// System playlists other than `excluding`.
    async fn count_system_playlists(&self, excluding: &str) -> Result<u64, RepositoryError>;
}

#[derive(Clone)]
pub struct SeaOrmRepository {
    db: DatabaseConnection,
}

impl SeaOrmRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn system_playlist(&self, playlist_id: i32) -> Result<playlist::Model, RepositoryError> {
        let model = Playlist::find_by_id(playlist_id)
            .one(&self.db)
            .await?
            .ok_or(RepositoryError::PlaylistNotFound(playlist_id))?;
        if model.is_user_created {
            return Err(RepositoryError::Protected(model.name));
        }
        Ok(model)
    }
}

fn to_active_model(record: &TrackMetadata, added_at: DateTime<Utc>) -> track::ActiveModel {
    let (cover_art, cover_art_mime) = match &record.cover_art {
        Some(cover) => (Some(cover.data.clone()), Some(cover.mime.clone())),
        None => (None, None),
    };

    track::ActiveModel {
        id: NotSet,
        uuid: Set(Uuid::new_v4().to_string()),
        path: Set(record.source_path.clone()),
        extension: Set(record.extension.clone()),
        title: Set(record.title.clone()),
        artist: Set(record.artist.clone()),
        album: Set(record.album.clone()),
        genre: Set(record.genre.clone()),
        year: Set(i32::try_from(record.year).unwrap_or(0)),
        duration_seconds: Set(i32::try_from(record.duration_seconds).unwrap_or(i32::MAX)),
        source_type: Set(LOCAL_SOURCE.to_string()),
        cover_art: Set(cover_art),
        cover_art_mime: Set(cover_art_mime),
        added_at: Set(added_at),
    }
}

#[async_trait]
impl CatalogRepository for SeaOrmRepository {
    async fn existing_source_paths(&self) -> Result<HashSet<String>, RepositoryError> {
        let paths: Vec<String> = Track::find()
            .select_only()
            .column(track::Column::Path)
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(paths.into_iter().collect())
    }

    async fn bulk_insert_tracks(&self, records: &[TrackMetadata]) -> Result<u64, RepositoryError> {
        if records.is_empty() {
            return Ok(0);
        }

        let added_at = Utc::now();
        let txn = self.db.begin().await?;
        let mut inserted = 0;
        for chunk in records.chunks(TRACK_INSERT_CHUNK) {
            let on_conflict = OnConflict::column(track::Column::Path)
                .do_nothing()
                .to_owned();
            inserted += Track::insert_many(chunk.iter().map(|r| to_active_model(r, added_at)))
                .on_conflict(on_conflict)
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;

        Ok(inserted)
    }

    async fn find_or_create_playlist(
        &self,
        name: &str,
        is_user_created: bool,
        created_by: &str,
    ) -> Result<PlaylistRecord, RepositoryError> {
        let existing = Playlist::find()
            .filter(playlist::Column::Name.eq(name))
            .one(&self.db)
            .await?;
        if let Some(model) = existing {
            return Ok(model.into());
        }

        let model = playlist::ActiveModel {
            id: NotSet,
            name: Set(name.to_string()),
            is_user_created: Set(is_user_created),
            created_by: Set(created_by.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&self.db)
        .await?;

        Ok(model.into())
    }

    async fn clear_membership(&self, playlist_id: i32) -> Result<(), RepositoryError> {
        self.system_playlist(playlist_id).await?;

        PlaylistTrack::delete_many()
            .filter(playlist_track::Column::PlaylistId.eq(playlist_id))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn bulk_insert_membership(
        &self,
        playlist_id: i32,
        track_ids: &BTreeSet<i32>,
    ) -> Result<u64, RepositoryError> {
        self.system_playlist(playlist_id).await?;
        if track_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i32> = track_ids.iter().copied().collect();
        let txn = self.db.begin().await?;
        let mut inserted = 0;
        for chunk in ids.chunks(MEMBERSHIP_INSERT_CHUNK) {
            let rows = chunk.iter().map(|track_id| playlist_track::ActiveModel {
                playlist_id: Set(playlist_id),
                track_id: Set(*track_id),
            });
            let on_conflict = OnConflict::columns([
                playlist_track::Column::PlaylistId,
                playlist_track::Column::TrackId,
            ])
            .do_nothing()
            .to_owned();
            inserted += PlaylistTrack::insert_many(rows)
                .on_conflict(on_conflict)
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;

        Ok(inserted)
    }

    async fn all_track_ids(&self) -> Result<BTreeSet<i32>, RepositoryError> {
        let ids: Vec<i32> = Track::find()
            .select_only()
            .column(track::Column::Id)
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(ids.into_iter().collect())
    }

    async fn top_genres_by_count(&self, limit: u64) -> Result<Vec<GenreCount>, RepositoryError> {
        let rows: Vec<(String, i64)> = Track::find()
            .select_only()
            .column(track::Column::Genre)
            .column_as(track::Column::Id.count(), "track_count")
            .group_by(track::Column::Genre)
            .order_by_desc(track::Column::Id.count())
            .order_by_asc(track::Column::Genre)
            .limit(limit)
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(genre, count)| GenreCount {
                genre,
                track_count: u64::try_from(count).unwrap_or(0),
            })
            .collect())
    }

    async fn track_ids_by_genre(
        &self,
        genre: &str,
        limit: u64,
    ) -> Result<BTreeSet<i32>, RepositoryError> {
        let ids: Vec<i32> = Track::find()
            .select_only()
            .column(track::Column::Id)
            .filter(track::Column::Genre.eq(genre))
            .order_by_asc(track::Column::Id)
            .limit(limit)
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(ids.into_iter().collect())
    }

    async fn count_system_playlists(&self, excluding: &str) -> Result<u64, RepositoryError> {
        let count = Playlist::find()
            .filter(playlist::Column::IsUserCreated.eq(false))
            .filter(playlist::Column::Name.ne(excluding))
            .count(&self.db)
            .await?;

        Ok(count)
    }
}
