use std::collections::{BTreeMap, BTreeSet};

use color_eyre::eyre::Result;

use crate::track::TrackId;

/// What the remote has, as seen by one `list` call.
///
/// Folders only group playlists. System playlists are never listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteListing {
    pub playlists: BTreeSet<String>,
    /// Folder name to the names of the playlists inside it.
    pub folders: BTreeMap<String, Vec<String>>,
}

impl RemoteListing {
    /// `filters` plus every playlist inside a folder one of them names.
    pub fn expand_filters(&self, filters: &[String]) -> Vec<String> {
        let mut expanded = filters.to_vec();
        for (folder, children) in &self.folders {
            if filters.iter().any(|f| f.eq_ignore_ascii_case(folder)) {
                expanded.extend(children.iter().cloned());
            }
        }
        expanded
    }

    pub fn folder_of(&self, name: &str) -> Option<&str> {
        self.folders
            .iter()
            .find(|(_, children)| children.iter().any(|child| child == name))
            .map(|(folder, _)| folder.as_str())
    }
}

/// Port trait wrapping the remote playlist capabilities used by the sync.
///
/// Implementations live in `services::remote::client` (production) or test mocks.
/// Retries and authentication belong to the implementation; callers treat every
/// call as a single operation that either succeeds or fails.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RemotePlaylists: Send + Sync {
    async fn list(&self) -> Result<RemoteListing>;

    /// Current tracks of one playlist, `None` when it does not exist.
    async fn fetch(&self, name: &str) -> Result<Option<Vec<TrackId>>>;

    async fn create(&self, name: &str, tracks: &[TrackId]) -> Result<()>;

    /// Replace membership and order of an existing playlist.
    async fn replace(&self, name: &str, tracks: &[TrackId]) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}
