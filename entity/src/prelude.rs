pub use super::playlist::Entity as Playlist;
pub use super::playlist_track::Entity as PlaylistTrack;
pub use super::track::Entity as Track;
