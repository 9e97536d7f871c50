use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use log::error;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, FromQueryResult, JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait, Select, TransactionTrait,
};
use sea_query::OnConflict;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use entity::prelude::{Playlist, PlaylistTrack, Track};
use entity::{playlist, playlist_track, track};

use crate::library::SyncReport;
use crate::playlists::PlaylistBuilder;
use crate::scanner::{refresh_reserved, Synchronizer};

const DEFAULT_PAGE_SIZE: u64 = 50;
const MAX_PAGE_SIZE: u64 = 100;
const USER_OWNER: &str = "user";

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub music_path: String,
    pub synchronizer: Arc<Synchronizer>,
    pub playlists: Arc<PlaylistBuilder>,
}

#[derive(Deserialize)]
pub struct SongQuery {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub search: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct TrackSummary {
    id: i32,
    uuid: String,
    title: String,
    artist: String,
    album: String,
    genre: String,
    year: i32,
    duration_seconds: i32,
    source_type: String,
    cover_art_mime: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SongResponse {
    pub id: i32,
    pub uuid: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub year: i32,
    pub duration: i32,
    pub source_type: String,
    pub album_art: Option<String>,
}

impl From<TrackSummary> for SongResponse {
    fn from(summary: TrackSummary) -> Self {
        let album_art = summary
            .cover_art_mime
            .map(|_| format!("/songs/{}/cover", summary.id));

        Self {
            id: summary.id,
            uuid: summary.uuid,
            title: summary.title,
            artist: summary.artist,
            album: summary.album,
            genre: summary.genre,
            year: summary.year,
            duration: summary.duration_seconds,
            source_type: summary.source_type,
            album_art,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SongListResponse {
    pub songs: Vec<SongResponse>,
    pub total: u64,
}

#[derive(Debug, Serialize, Deserialize, FromQueryResult)]
pub struct NameCount {
    pub name: String,
    pub song_count: i64,
}

#[derive(Debug, Serialize, Deserialize, FromQueryResult)]
pub struct AlbumCount {
    pub name: String,
    pub artist: String,
    pub song_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistResponse {
    pub id: i32,
    pub name: String,
    pub is_user_created: bool,
    pub created_by: String,
    pub songs: Vec<SongResponse>,
    pub song_count: usize,
}

#[derive(Deserialize)]
pub struct CreatePlaylistRequest {
    pub name: String,
    #[serde(default)]
    pub song_ids: Vec<i32>,
}

#[derive(Deserialize)]
pub struct UpdatePlaylistRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct AddSongsRequest {
    pub song_ids: Vec<i32>,
}

#[derive(Serialize)]
pub struct DetailResponse {
    pub detail: String,
}

#[derive(Serialize)]
pub struct ScanStatusResponse {
    pub running: bool,
    pub last_report: Option<SyncReport>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/songs", get(list_songs))
        .route("/songs/:id", get(get_song))
        .route("/songs/:id/cover", get(get_cover))
        .route("/songs/by_artist/:name", get(list_songs_by_artist))
        .route("/songs/by_album/:name", get(list_songs_by_album))
        .route("/stream/:id", get(stream_song))
        .route("/artists", get(list_artists))
        .route("/albums", get(list_albums))
        .route("/genres", get(list_genres))
        .route("/playlists", get(list_playlists).post(create_playlist))
        .route(
            "/playlists/:id",
            get(get_playlist).put(rename_playlist).delete(delete_playlist),
        )
        .route("/playlists/:id/songs", post(add_songs_to_playlist))
        .route("/rescan", post(rescan_library))
        .route("/scan/status", get(scan_status))
        .with_state(state)
}

fn internal_error(e: DbErr) -> StatusCode {
    error!("Database error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

fn summaries(query: Select<Track>) -> sea_orm::Selector<sea_orm::SelectModel<TrackSummary>> {
    query
        .select_only()
        .columns([
            track::Column::Id,
            track::Column::Uuid,
            track::Column::Title,
            track::Column::Artist,
            track::Column::Album,
            track::Column::Genre,
            track::Column::Year,
            track::Column::DurationSeconds,
            track::Column::SourceType,
            track::Column::CoverArtMime,
        ])
        .into_model::<TrackSummary>()
}

async fn page_songs(
    db: &DatabaseConnection,
    condition: Condition,
    params: &SongQuery,
) -> Result<Json<SongListResponse>, StatusCode> {
    let skip = params.skip.unwrap_or(0);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let query = Track::find().filter(condition);
    let total = query.clone().count(db).await.map_err(internal_error)?;

    let songs = summaries(
        query
            .order_by_asc(track::Column::Title)
            .order_by_asc(track::Column::Id)
            .offset(skip)
            .limit(limit),
    )
    .all(db)
    .await
    .map_err(internal_error)?
    .into_iter()
    .map(SongResponse::from)
    .collect();

    Ok(Json(SongListResponse { songs, total }))
}

// GET /songs - Paginated listing with optional search over title, artist and album
async fn list_songs(
    State(state): State<AppState>,
    Query(params): Query<SongQuery>,
) -> Result<Json<SongListResponse>, StatusCode> {
    let mut condition = Condition::all();
    if let Some(search) = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        condition = condition.add(
            Condition::any()
                .add(track::Column::Title.contains(search))
                .add(track::Column::Artist.contains(search))
                .add(track::Column::Album.contains(search)),
        );
    }

    page_songs(&state.db, condition, &params).await
}

// GET /songs/by_artist/:name
async fn list_songs_by_artist(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<SongQuery>,
) -> Result<Json<SongListResponse>, StatusCode> {
    let condition = Condition::all().add(track::Column::Artist.eq(name));
    page_songs(&state.db, condition, &params).await
}

// GET /songs/by_album/:name
async fn list_songs_by_album(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<SongQuery>,
) -> Result<Json<SongListResponse>, StatusCode> {
    let condition = Condition::all().add(track::Column::Album.eq(name));
    page_songs(&state.db, condition, &params).await
}

// GET /songs/:id
async fn get_song(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<SongResponse>, StatusCode> {
    let summary = summaries(Track::find_by_id(id))
        .one(&state.db)
        .await
        .map_err(internal_error)?;

    match summary {
        Some(summary) => Ok(Json(SongResponse::from(summary))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// GET /songs/:id/cover - Embedded cover art bytes
async fn get_cover(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response<Body>, StatusCode> {
    let cover: Option<(Option<Vec<u8>>, Option<String>)> = Track::find_by_id(id)
        .select_only()
        .column(track::Column::CoverArt)
        .column(track::Column::CoverArtMime)
        .into_tuple()
        .one(&state.db)
        .await
        .map_err(internal_error)?;

    let (data, mime) = match cover {
        Some((Some(data), mime)) => (data, mime),
        _ => return Err(StatusCode::NOT_FOUND),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            mime.unwrap_or_else(|| "application/octet-stream".to_string()),
        )
        .header(header::CONTENT_LENGTH, data.len().to_string())
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(Body::from(data))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// GET /stream/:id - Stream audio file with range support for web browsers
async fn stream_song(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response<Body>, StatusCode> {
    let path: Option<String> = Track::find_by_id(id)
        .select_only()
        .column(track::Column::Path)
        .into_tuple()
        .one(&state.db)
        .await
        .map_err(internal_error)?;

    let file_path = match path {
        Some(path) => PathBuf::from(path),
        None => return Err(StatusCode::NOT_FOUND),
    };

    let metadata = match tokio::fs::metadata(&file_path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(StatusCode::NOT_FOUND),
    };
    let file_size = metadata.len();

    let mime_type = mime_guess::from_path(&file_path)
        .first_or_octet_stream()
        .to_string();

    if let Some(range_value) = headers.get(header::RANGE) {
        let range_str = range_value.to_str().map_err(|_| StatusCode::BAD_REQUEST)?;
        let range_part = range_str
            .strip_prefix("bytes=")
            .ok_or(StatusCode::RANGE_NOT_SATISFIABLE)?;
        let (start, end) = parse_range(range_part, file_size)?;

        let mut file = File::open(&file_path)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let content_length = end - start + 1;
        let mut buffer = vec![0u8; content_length as usize];
        file.read_exact(&mut buffer)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, mime_type)
            .header(header::CONTENT_LENGTH, content_length.to_string())
            .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, file_size))
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from(buffer))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    } else {
        let file_content = tokio::fs::read(&file_path)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime_type)
            .header(header::CONTENT_LENGTH, file_size.to_string())
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from(file_content))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Parses the part of a `Range` header after `bytes=` into an inclusive span.
fn parse_range(range_str: &str, file_size: u64) -> Result<(u64, u64), StatusCode> {
    let (start_str, end_str) = range_str
        .split_once('-')
        .ok_or(StatusCode::RANGE_NOT_SATISFIABLE)?;
    if file_size == 0 {
        return Err(StatusCode::RANGE_NOT_SATISFIABLE);
    }

    let start = if start_str.is_empty() {
        // Suffix range like "-500" (last 500 bytes)
        let suffix_length: u64 = end_str
            .parse()
            .map_err(|_| StatusCode::RANGE_NOT_SATISFIABLE)?;
        file_size.saturating_sub(suffix_length)
    } else {
        start_str
            .parse()
            .map_err(|_| StatusCode::RANGE_NOT_SATISFIABLE)?
    };

    let end = if end_str.is_empty() || start_str.is_empty() {
        file_size - 1
    } else {
        let parsed_end: u64 = end_str
            .parse()
            .map_err(|_| StatusCode::RANGE_NOT_SATISFIABLE)?;
        parsed_end.min(file_size - 1)
    };

    if start <= end {
        Ok((start, end))
    } else {
        Err(StatusCode::RANGE_NOT_SATISFIABLE)
    }
}

// GET /artists - Artist names with track counts
async fn list_artists(State(state): State<AppState>) -> Result<Json<Vec<NameCount>>, StatusCode> {
    let artists = Track::find()
        .select_only()
        .column_as(track::Column::Artist, "name")
        .column_as(track::Column::Id.count(), "song_count")
        .group_by(track::Column::Artist)
        .order_by_asc(track::Column::Artist)
        .into_model::<NameCount>()
        .all(&state.db)
        .await
        .map_err(internal_error)?;

    Ok(Json(artists))
}

// GET /albums - Albums (per artist) with track counts
async fn list_albums(State(state): State<AppState>) -> Result<Json<Vec<AlbumCount>>, StatusCode> {
    let albums = Track::find()
        .select_only()
        .column_as(track::Column::Album, "name")
        .column(track::Column::Artist)
        .column_as(track::Column::Id.count(), "song_count")
        .group_by(track::Column::Album)
        .group_by(track::Column::Artist)
        .order_by_asc(track::Column::Album)
        .order_by_asc(track::Column::Artist)
        .into_model::<AlbumCount>()
        .all(&state.db)
        .await
        .map_err(internal_error)?;

    Ok(Json(albums))
}

// GET /genres - Genre names with track counts
async fn list_genres(State(state): State<AppState>) -> Result<Json<Vec<NameCount>>, StatusCode> {
    let genres = Track::find()
        .select_only()
        .column_as(track::Column::Genre, "name")
        .column_as(track::Column::Id.count(), "song_count")
        .group_by(track::Column::Genre)
        .order_by_asc(track::Column::Genre)
        .into_model::<NameCount>()
        .all(&state.db)
        .await
        .map_err(internal_error)?;

    Ok(Json(genres))
}

async fn playlist_response<C: ConnectionTrait>(
    db: &C,
    model: playlist::Model,
) -> Result<PlaylistResponse, DbErr> {
    let songs: Vec<SongResponse> = summaries(
        Track::find()
            .join(JoinType::InnerJoin, track::Relation::PlaylistTrack.def())
            .filter(playlist_track::Column::PlaylistId.eq(model.id))
            .order_by_asc(track::Column::Title)
            .order_by_asc(track::Column::Id),
    )
    .all(db)
    .await?
    .into_iter()
    .map(SongResponse::from)
    .collect();

    Ok(PlaylistResponse {
        id: model.id,
        name: model.name,
        is_user_created: model.is_user_created,
        created_by: model.created_by,
        song_count: songs.len(),
        songs,
    })
}

async fn find_playlist(db: &DatabaseConnection, id: i32) -> Result<playlist::Model, StatusCode> {
    Playlist::find_by_id(id)
        .one(db)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)
}

/// Same as [`find_playlist`], but system playlists answer 403.
async fn find_user_playlist(db: &DatabaseConnection, id: i32) -> Result<playlist::Model, StatusCode> {
    let model = find_playlist(db, id).await?;
    if !model.is_user_created {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(model)
}

async fn name_taken(db: &DatabaseConnection, name: &str) -> Result<bool, StatusCode> {
    let count = Playlist::find()
        .filter(playlist::Column::Name.eq(name))
        .count(db)
        .await
        .map_err(internal_error)?;
    Ok(count > 0)
}

/// Adds the ids that exist in the catalog; unknown ids and existing members are ignored.
async fn add_members<C: ConnectionTrait>(
    db: &C,
    playlist_id: i32,
    song_ids: &[i32],
) -> Result<(), DbErr> {
    if song_ids.is_empty() {
        return Ok(());
    }

    let known: Vec<i32> = Track::find()
        .select_only()
        .column(track::Column::Id)
        .filter(track::Column::Id.is_in(song_ids.iter().copied()))
        .into_tuple()
        .all(db)
        .await?;
    if known.is_empty() {
        return Ok(());
    }

    let rows = known.into_iter().map(|track_id| playlist_track::ActiveModel {
        playlist_id: Set(playlist_id),
        track_id: Set(track_id),
    });
    let on_conflict = OnConflict::columns([
        playlist_track::Column::PlaylistId,
        playlist_track::Column::TrackId,
    ])
    .do_nothing()
    .to_owned();
    PlaylistTrack::insert_many(rows)
        .on_conflict(on_conflict)
        .exec_without_returning(db)
        .await?;

    Ok(())
}

// POST /playlists - Create a user playlist
async fn create_playlist(
    State(state): State<AppState>,
    Json(request): Json<CreatePlaylistRequest>,
) -> Result<Json<PlaylistResponse>, StatusCode> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if name_taken(&state.db, name).await? {
        return Err(StatusCode::BAD_REQUEST);
    }

    let txn = state.db.begin().await.map_err(internal_error)?;
    let model = playlist::ActiveModel {
        name: Set(name.to_string()),
        is_user_created: Set(true),
        created_by: Set(USER_OWNER.to_string()),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await
    .map_err(|_| StatusCode::BAD_REQUEST)?;
    add_members(&txn, model.id, &request.song_ids)
        .await
        .map_err(internal_error)?;
    txn.commit().await.map_err(internal_error)?;

    let response = playlist_response(&state.db, model)
        .await
        .map_err(internal_error)?;
    Ok(Json(response))
}

// GET /playlists - All playlists with their songs
async fn list_playlists(
    State(state): State<AppState>,
) -> Result<Json<Vec<PlaylistResponse>>, StatusCode> {
    let models = Playlist::find()
        .order_by_asc(playlist::Column::Id)
        .all(&state.db)
        .await
        .map_err(internal_error)?;

    let mut playlists = Vec::with_capacity(models.len());
    for model in models {
        playlists.push(
            playlist_response(&state.db, model)
                .await
                .map_err(internal_error)?,
        );
    }

    Ok(Json(playlists))
}

// GET /playlists/:id
async fn get_playlist(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<PlaylistResponse>, StatusCode> {
    let model = find_playlist(&state.db, id).await?;
    let response = playlist_response(&state.db, model)
        .await
        .map_err(internal_error)?;
    Ok(Json(response))
}

// POST /playlists/:id/songs - Add songs to a user playlist
async fn add_songs_to_playlist(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(request): Json<AddSongsRequest>,
) -> Result<Json<PlaylistResponse>, StatusCode> {
    let model = find_user_playlist(&state.db, id).await?;
    add_members(&state.db, model.id, &request.song_ids)
        .await
        .map_err(internal_error)?;

    let response = playlist_response(&state.db, model)
        .await
        .map_err(internal_error)?;
    Ok(Json(response))
}

// PUT /playlists/:id - Rename a user playlist
async fn rename_playlist(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(request): Json<UpdatePlaylistRequest>,
) -> Result<Json<PlaylistResponse>, StatusCode> {
    let model = find_user_playlist(&state.db, id).await?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if name != model.name && name_taken(&state.db, name).await? {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut active: playlist::ActiveModel = model.into();
    active.name = Set(name.to_string());
    let model = active
        .update(&state.db)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let response = playlist_response(&state.db, model)
        .await
        .map_err(internal_error)?;
    Ok(Json(response))
}

// DELETE /playlists/:id - Delete a user playlist
async fn delete_playlist(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<DetailResponse>, StatusCode> {
    let model = find_user_playlist(&state.db, id).await?;

    let txn = state.db.begin().await.map_err(internal_error)?;
    PlaylistTrack::delete_many()
        .filter(playlist_track::Column::PlaylistId.eq(model.id))
        .exec(&txn)
        .await
        .map_err(internal_error)?;
    Playlist::delete_by_id(model.id)
        .exec(&txn)
        .await
        .map_err(internal_error)?;
    txn.commit().await.map_err(internal_error)?;

    Ok(Json(DetailResponse {
        detail: "Playlist deleted".to_string(),
    }))
}

// POST /rescan - Synchronize the music directory and rebuild derived playlists
async fn rescan_library(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<DetailResponse>), StatusCode> {
    let permit = state
        .synchronizer
        .try_reserve()
        .map_err(|_| StatusCode::CONFLICT)?;

    let root = PathBuf::from(&state.music_path);
    let synchronizer = state.synchronizer.clone();
    let playlists = state.playlists.clone();
    tokio::spawn(async move {
        refresh_reserved(permit, &synchronizer, &playlists, &root).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DetailResponse {
            detail: "Music library rescan initiated".to_string(),
        }),
    ))
}

// GET /scan/status - Whether a pass is running and the outcome of the last one
async fn scan_status(State(state): State<AppState>) -> Json<ScanStatusResponse> {
    Json(ScanStatusResponse {
        running: state.synchronizer.is_running(),
        last_report: state.synchronizer.last_report().await,
    })
}
