pub mod playlist_sync;
pub mod remote;
