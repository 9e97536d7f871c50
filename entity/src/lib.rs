pub mod prelude;

pub mod playlist;
pub mod playlist_track;
pub mod track;
