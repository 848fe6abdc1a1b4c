use std::path::Path;

use crate::track::{TrackId, TrackRef};

/// Port for mapping between local files and remote track ids.
///
/// Implementations live in `track::TrackIndex` (production) or test fixtures.
pub trait TrackResolver: Send + Sync {
    /// Resolve an absolute local path to the track uploaded from it.
    fn by_path(&self, path: &Path) -> Option<TrackRef>;

    /// Resolve a remote track id to the local file it was uploaded from.
    fn by_id(&self, id: TrackId) -> Option<TrackRef>;
}
