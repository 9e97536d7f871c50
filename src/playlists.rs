use std::sync::Arc;

use log::{error, info, warn};

use crate::error::RepositoryError;
use crate::library::{GenreFailure, GenrePlaylistSummary, RebuildReport};
use crate::repository::CatalogRepository;

pub const ALL_TRACKS_PLAYLIST: &str = "All Tracks";
pub const SYSTEM_OWNER: &str = "system";
pub const GENRE_PLAYLIST_COUNT: u64 = 5;
pub const GENRE_PLAYLIST_SIZE: u64 = 50;

pub fn genre_playlist_name(genre: &str) -> String {
    format!("{} Hits", genre)
}

/// Recomputes the system-managed playlists from the current catalog.
/// Playlists flagged as user-created are never modified.
pub struct PlaylistBuilder {
    repository: Arc<dyn CatalogRepository>,
}

impl PlaylistBuilder {
    pub fn new(repository: Arc<dyn CatalogRepository>) -> Self {
        Self { repository }
    }

    pub async fn rebuild_derived_playlists(&self) -> Result<RebuildReport, RepositoryError> {
        let mut report = RebuildReport {
            all_tracks_members: self.rebuild_all_tracks().await?,
            ..RebuildReport::default()
        };

        let existing = self.repository.count_system_playlists(ALL_TRACKS_PLAYLIST).await?;
        if existing >= GENRE_PLAYLIST_COUNT {
            info!("{} genre playlists already exist, skipping genre rebuild", existing);
            return Ok(report);
        }

        let genres = self.repository.top_genres_by_count(GENRE_PLAYLIST_COUNT).await?;
        for genre in genres {
            match self.rebuild_genre(&genre.genre).await {
                Ok(Some(summary)) => {
                    info!(
                        "Rebuilt {} with {} of {} tracks",
                        summary.name, summary.members, genre.track_count
                    );
                    report.genre_playlists.push(summary);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error rebuilding playlist for genre {}: {}", genre.genre, e);
                    report.genre_failures.push(GenreFailure {
                        genre: genre.genre,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn rebuild_all_tracks(&self) -> Result<usize, RepositoryError> {
        let playlist = self
            .repository
            .find_or_create_playlist(ALL_TRACKS_PLAYLIST, false, SYSTEM_OWNER)
            .await?;
        if playlist.is_user_created {
            warn!("'{}' is a user playlist, not rebuilding it", playlist.name);
            return Ok(0);
        }

        self.repository.clear_membership(playlist.id).await?;
        let track_ids = self.repository.all_track_ids().await?;
        self.repository.bulk_insert_membership(playlist.id, &track_ids).await?;
        info!("Rebuilt {} with {} tracks", playlist.name, track_ids.len());

        Ok(track_ids.len())
    }

    async fn rebuild_genre(&self, genre: &str) -> Result<Option<GenrePlaylistSummary>, RepositoryError> {
        let name = genre_playlist_name(genre);
        let playlist = self
            .repository
            .find_or_create_playlist(&name, false, SYSTEM_OWNER)
            .await?;
        if playlist.is_user_created {
            warn!("'{}' is a user playlist, not rebuilding it", playlist.name);
            return Ok(None);
        }

        self.repository.clear_membership(playlist.id).await?;
        let track_ids = self
            .repository
            .track_ids_by_genre(genre, GENRE_PLAYLIST_SIZE)
            .await?;
        self.repository.bulk_insert_membership(playlist.id, &track_ids).await?;

        Ok(Some(GenrePlaylistSummary {
            name,
            members: track_ids.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};

    use sea_orm::ActiveValue::Set;
    use sea_orm::{
        ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
        QueryFilter,
    };

    use entity::prelude::{Playlist, PlaylistTrack, Track};
    use entity::{playlist, playlist_track, track};

    use crate::repository::SeaOrmRepository;
    use crate::test_util::{catalog_db, track_in_genre, HookedRepository};

    async fn seed(repo: &SeaOrmRepository, genres: &[(&str, usize)]) {
        let mut records = Vec::new();
        for (genre, count) in genres {
            for i in 0..*count {
                records.push(track_in_genre(&format!("/music/{}/{:03}.mp3", genre, i), genre));
            }
        }
        repo.bulk_insert_tracks(&records).await.unwrap();
    }

    async fn playlist_named(db: &DatabaseConnection, name: &str) -> playlist::Model {
        Playlist::find()
            .filter(playlist::Column::Name.eq(name))
            .one(db)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("playlist {} exists", name))
    }

    async fn members(db: &DatabaseConnection, playlist_id: i32) -> Vec<i32> {
        PlaylistTrack::find()
            .filter(playlist_track::Column::PlaylistId.eq(playlist_id))
            .all(db)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.track_id)
            .collect()
    }

    async fn genres_of(db: &DatabaseConnection, ids: &[i32]) -> HashSet<String> {
        Track::find()
            .filter(track::Column::Id.is_in(ids.iter().copied()))
            .all(db)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.genre)
            .collect()
    }

    #[tokio::test]
    async fn builds_all_tracks_and_genre_playlists() {
        let (db, _dir) = catalog_db().await;
        let repo = Arc::new(SeaOrmRepository::new(db.clone()));
        seed(&repo, &[("Rock", 10), ("Jazz", 8), ("Pop", 3)]).await;

        let report = PlaylistBuilder::new(repo.clone()).rebuild_derived_playlists().await.unwrap();
        assert_eq!(report.all_tracks_members, 21);
        assert!(report.genre_failures.is_empty());

        let all = playlist_named(&db, ALL_TRACKS_PLAYLIST).await;
        assert!(!all.is_user_created);
        assert_eq!(all.created_by, SYSTEM_OWNER);
        let all_members = members(&db, all.id).await;
        let unique: BTreeSet<i32> = all_members.iter().copied().collect();
        assert_eq!(unique.len(), all_members.len());
        assert_eq!(unique, repo.all_track_ids().await.unwrap());

        for (genre, expected) in [("Rock", 10), ("Jazz", 8), ("Pop", 3)] {
            let playlist = playlist_named(&db, &genre_playlist_name(genre)).await;
            let ids = members(&db, playlist.id).await;
            assert_eq!(ids.len(), expected);
            let genres = genres_of(&db, &ids).await;
            assert_eq!(genres, HashSet::from([genre.to_string()]));
        }
    }

    #[tokio::test]
    async fn failing_genre_does_not_stop_the_others() {
        let (db, _dir) = catalog_db().await;
        let repo = Arc::new(HookedRepository {
            failing_genre: Some("Jazz".to_string()),
            ..HookedRepository::new(db.clone())
        });
        seed(&repo.inner, &[("Rock", 10), ("Jazz", 8), ("Pop", 3)]).await;

        let report = PlaylistBuilder::new(repo.clone())
            .rebuild_derived_playlists()
            .await
            .unwrap();

        let built: Vec<(&str, usize)> = report
            .genre_playlists
            .iter()
            .map(|p| (p.name.as_str(), p.members))
            .collect();
        assert_eq!(built, vec![("Rock Hits", 10), ("Pop Hits", 3)]);
        let failed: Vec<&str> = report.genre_failures.iter().map(|f| f.genre.as_str()).collect();
        assert_eq!(failed, vec!["Jazz"]);
        assert_eq!(report.all_tracks_members, 21);

        let pop = playlist_named(&db, "Pop Hits").await;
        assert_eq!(members(&db, pop.id).await.len(), 3);
    }

    #[tokio::test]
    async fn genre_playlists_are_capped_and_stable() {
        let (db, _dir) = catalog_db().await;
        let repo = Arc::new(SeaOrmRepository::new(db.clone()));
        seed(&repo, &[("Rock", 60), ("Jazz", 2)]).await;
        let builder = PlaylistBuilder::new(repo.clone());

        builder.rebuild_derived_playlists().await.unwrap();
        let rock = playlist_named(&db, "Rock Hits").await;
        let mut first = members(&db, rock.id).await;
        first.sort();
        assert_eq!(first.len(), GENRE_PLAYLIST_SIZE as usize);

        builder.rebuild_derived_playlists().await.unwrap();
        let mut second = members(&db, rock.id).await;
        second.sort();
        assert_eq!(first, second);
        assert_eq!(Playlist::find().count(&db).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn all_tracks_follows_catalog_growth() {
        let (db, _dir) = catalog_db().await;
        let repo = Arc::new(SeaOrmRepository::new(db.clone()));
        let builder = PlaylistBuilder::new(repo.clone());

        seed(&repo, &[("Rock", 2)]).await;
        builder.rebuild_derived_playlists().await.unwrap();
        seed(&repo, &[("Folk", 3)]).await;
        let report = builder.rebuild_derived_playlists().await.unwrap();

        assert_eq!(report.all_tracks_members, 5);
        let all = playlist_named(&db, ALL_TRACKS_PLAYLIST).await;
        assert_eq!(members(&db, all.id).await.len(), 5);
    }

    #[tokio::test]
    async fn user_playlists_are_untouched() {
        let (db, _dir) = catalog_db().await;
        let repo = Arc::new(SeaOrmRepository::new(db.clone()));
        seed(&repo, &[("Rock", 4), ("Jazz", 2)]).await;
        let jazz_id = *repo.track_ids_by_genre("Jazz", 1).await.unwrap().iter().next().unwrap();

        // A user claimed the name the builder would use for the Rock playlist.
        let mine = playlist::ActiveModel {
            name: Set("Rock Hits".to_string()),
            is_user_created: Set(true),
            created_by: Set("user".to_string()),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();
        playlist_track::ActiveModel {
            playlist_id: Set(mine.id),
            track_id: Set(jazz_id),
        }
        .insert(&db)
        .await
        .unwrap();

        let report = PlaylistBuilder::new(repo).rebuild_derived_playlists().await.unwrap();

        let after = playlist_named(&db, "Rock Hits").await;
        assert_eq!(after, mine);
        assert_eq!(members(&db, mine.id).await, vec![jazz_id]);
        let rebuilt: Vec<&str> = report.genre_playlists.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(rebuilt, vec!["Jazz Hits"]);
    }

    #[tokio::test]
    async fn genre_rebuild_is_skipped_once_enough_exist() {
        let (db, _dir) = catalog_db().await;
        let repo = Arc::new(SeaOrmRepository::new(db.clone()));
        seed(&repo, &[("Rock", 1)]).await;
        for genre in ["A", "B", "C", "D", "E"] {
            repo.find_or_create_playlist(&genre_playlist_name(genre), false, SYSTEM_OWNER)
                .await
                .unwrap();
        }

        let report = PlaylistBuilder::new(repo).rebuild_derived_playlists().await.unwrap();

        assert_eq!(report.all_tracks_members, 1);
        assert!(report.genre_playlists.is_empty());
        assert!(Playlist::find()
            .filter(playlist::Column::Name.eq("Rock Hits"))
            .one(&db)
            .await
            .unwrap()
            .is_none());
    }
}
