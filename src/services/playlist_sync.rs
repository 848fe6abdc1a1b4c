use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use futures::{StreamExt, stream};

use crate::error::SyncError;
use crate::m3u::{
    PLAYLIST_EXTENSION, ReadPlaylistError, RelativeTo, discover_playlists, matches_filters,
    read_playlist, write_playlist,
};
use crate::merge::{ConcurrentInserts, MergeOptions, MergeResult, merge_with};
use crate::ports::remote::RemotePlaylists;
use crate::ports::tracks::TrackResolver;
use crate::state::{PlaylistState, StateStore};
use crate::track::{TrackId, TrackRef};

/// Which sides a sync may write to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Local changes go to the remote; the local files are never written.
    Upload,
    /// Remote changes go to the local files; the remote is never written.
    Download,
    #[default]
    Both,
}

impl Direction {
    fn writes_local(self) -> bool {
        self != Direction::Upload
    }

    fn writes_remote(self) -> bool {
        self != Direction::Download
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub direction: Direction,
    /// Apply deletions made on one side to the other side, including deletion of
    /// whole playlists. When off, deleted items and playlists are restored.
    pub propagate_deletions: bool,
    /// Compute and report everything, write nothing.
    pub pretend: bool,
    pub concurrent_inserts: ConcurrentInserts,
    /// Playlists synced at the same time.
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Both,
            propagate_deletions: false,
            pretend: false,
            concurrent_inserts: ConcurrentInserts::default(),
            concurrency: 4,
        }
    }
}

/// Where local playlist files live and what their entries are relative to.
#[derive(Debug, Clone)]
pub struct LocalLayout {
    pub playlist_dir: PathBuf,
    pub library_dir: PathBuf,
    pub relative_to: RelativeTo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoChange,
    Uploaded,
    Downloaded,
    MergedClean,
    /// Conflict markers were written (or are still present) in the local file.
    MergedConflict,
    /// Something deleted on one side was kept because deletions are not propagated.
    RetainedDeletion,
    /// The playlist was removed on both sides and its state forgotten.
    Deleted,
    /// The sync direction prevented a needed write; the base was not advanced.
    HeldByDirection,
    Failed(SyncError),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NoChange => write!(f, "no change"),
            Outcome::Uploaded => write!(f, "uploaded"),
            Outcome::Downloaded => write!(f, "downloaded"),
            Outcome::MergedClean => write!(f, "merged"),
            Outcome::MergedConflict => write!(f, "conflict, resolve it in the playlist file"),
            Outcome::RetainedDeletion => write!(f, "kept deleted tracks"),
            Outcome::Deleted => write!(f, "deleted"),
            Outcome::HeldByDirection => write!(f, "held back by sync direction"),
            Outcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Something worth telling the user that did not stop the sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A playlist line whose file was never uploaded. It is skipped.
    UnresolvedPath(PathBuf),
    /// A remote track with no known local file. It is skipped.
    UnresolvedTrackId(TrackId),
    /// A track deleted on one side only, kept on both.
    RetainedTrack(TrackRef),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::UnresolvedPath(path) => write!(f, "no uploaded track for {}", path.display()),
            Notice::UnresolvedTrackId(id) => write!(f, "remote track {} has no local file", id),
            Notice::RetainedTrack(track) => {
                write!(f, "kept {} (deleted on one side only)", track.path.display())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaylistReport {
    pub name: String,
    pub outcome: Outcome,
    pub notices: Vec<Notice>,
}

impl PlaylistReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

/// Outcome of every playlist a batch looked at, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub reports: Vec<PlaylistReport>,
}

impl SyncSummary {
    fn new(mut reports: Vec<PlaylistReport>) -> Self {
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        Self { reports }
    }

    pub fn failures(&self) -> impl Iterator<Item = &PlaylistReport> {
        self.reports.iter().filter(|report| report.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    #[cfg(test)]
    pub fn report(&self, name: &str) -> Option<&PlaylistReport> {
        self.reports.iter().find(|report| report.name == name)
    }
}

/// Keeps local M3U playlists and remote playlists in step using a three-way
/// merge against the last synced state.
pub struct PlaylistSyncService<R: RemotePlaylists, T: TrackResolver> {
    remote: R,
    tracks: T,
    state: StateStore,
    layout: LocalLayout,
    options: SyncOptions,
}

impl<R: RemotePlaylists, T: TrackResolver> PlaylistSyncService<R, T> {
    pub fn new(
        remote: R,
        tracks: T,
        state: StateStore,
        layout: LocalLayout,
        options: SyncOptions,
    ) -> Self {
        Self {
            remote,
            tracks,
            state,
            layout,
            options,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Sync every playlist whose name matches `filters` (all when empty).
    ///
    /// A playlist is considered when it exists locally, remotely or in the sync
    /// state. A filter naming a remote folder selects the playlists inside it.
    /// Failures are reported per playlist and never stop the batch.
    #[tracing::instrument(skip(self), fields(pretend = self.options.pretend))]
    pub async fn sync(&self, filters: &[String]) -> SyncSummary {
        let listing = match self.remote.list().await {
            Ok(listing) => listing,
            Err(e) => {
                log::error!("Failed to list remote playlists: {:#}", e);
                let mut names = self.state_names(filters).await;
                names.extend(discover_playlists(&self.layout.playlist_dir, filters).into_keys());
                let reports = names
                    .into_iter()
                    .map(|name| PlaylistReport {
                        outcome: Outcome::Failed(SyncError::remote_unavailable(&name, &e)),
                        name,
                        notices: Vec::new(),
                    })
                    .collect();
                return SyncSummary::new(reports);
            }
        };

        let filters = listing.expand_filters(filters);
        let local = discover_playlists(&self.layout.playlist_dir, &filters);
        let mut names = self.state_names(&filters).await;
        names.extend(local.keys().cloned());
        names.extend(
            listing
                .playlists
                .iter()
                .filter(|name| matches_filters(name, &filters))
                .cloned(),
        );

        log::info!("Syncing {} playlist(s)", names.len());
        let reports = stream::iter(names)
            .map(|name| {
                let local_path = local.get(&name).cloned();
                let folder = listing.folder_of(&name).map(str::to_string);
                async move { self.sync_playlist(name, local_path, folder).await }
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        SyncSummary::new(reports)
    }

    async fn state_names(&self, filters: &[String]) -> BTreeSet<String> {
        self.state
            .names()
            .await
            .into_iter()
            .filter(|name| matches_filters(name, filters))
            .collect()
    }

    /// Sync one playlist given its local file (if any).
    ///
    /// The remote tracks are fetched here, right after the local file is read, so
    /// both sides are seen at nearly the same moment. `folder` is the remote
    /// folder holding the playlist; a downloaded file goes into a directory of
    /// that name.
    #[tracing::instrument(skip(self, local_path))]
    pub async fn sync_playlist(
        &self,
        name: String,
        local_path: Option<PathBuf>,
        folder: Option<String>,
    ) -> PlaylistReport {
        let mut notices = Vec::new();
        let outcome = match self
            .run(&name, local_path, folder.as_deref(), &mut notices)
            .await
        {
            Ok(outcome) => {
                log::info!("Playlist '{}': {}", name, outcome);
                outcome
            }
            Err(e) => {
                log::error!("Playlist '{}' failed: {}", name, e);
                Outcome::Failed(e)
            }
        };
        PlaylistReport {
            name,
            outcome,
            notices,
        }
    }

    async fn run(
        &self,
        name: &str,
        local_path: Option<PathBuf>,
        folder: Option<&str>,
        notices: &mut Vec<Notice>,
    ) -> Result<Outcome, SyncError> {
        let state = self.state.get(name).await?;

        let local = match local_path {
            Some(path) => match self.read_local(name, &path, notices)? {
                Some(tracks) => Some((path, tracks)),
                None => {
                    log::warn!(
                        "Playlist '{}' still has unresolved conflicts in {}",
                        name,
                        path.display()
                    );
                    return Ok(Outcome::MergedConflict);
                }
            },
            None => None,
        };
        let remote = self
            .remote
            .fetch(name)
            .await
            .map_err(|e| SyncError::remote_unavailable(name, &e))?
            .map(|ids| self.resolve_remote(ids, notices));

        match (local, remote) {
            (Some((path, local)), Some(remote)) => {
                self.reconcile(name, &path, state, local, remote, notices)
                    .await
            }
            (Some((path, local)), None) => self.remote_missing(name, &path, state, local).await,
            (None, Some(remote)) => {
                self.local_missing(name, folder, state, remote.resolved)
                    .await
            }
            (None, None) => {
                if state.is_none() {
                    return Ok(Outcome::NoChange);
                }
                self.forget(name).await?;
                Ok(Outcome::Deleted)
            }
        }
    }

    async fn reconcile(
        &self,
        name: &str,
        path: &Path,
        state: Option<PlaylistState>,
        local: Vec<TrackRef>,
        remote: RemoteTracks,
        notices: &mut Vec<Notice>,
    ) -> Result<Outcome, SyncError> {
        let base = state.as_ref().map(PlaylistState::base).unwrap_or_default();
        let local_changed = local != base;
        let remote_changed = remote.resolved != base;

        if !local_changed && !remote_changed {
            let settled = state
                .as_ref()
                .is_some_and(|state| state.has_snapshot() && state.pending_conflict.is_none());
            if !settled {
                self.commit(name, local).await?;
            }
            return Ok(Outcome::NoChange);
        }

        let merged = merge_with(base, &local, &remote.resolved, &self.merge_options(&state));
        let Some(tracks) = merged.result.resolved() else {
            log::warn!(
                "Playlist '{}' has {} conflicting region(s); resolve them in {}",
                name,
                merged.result.conflicts().count(),
                path.display()
            );
            self.write_local(path, &merged.result).await?;
            self.record_conflict(name, remote.resolved).await?;
            return Ok(Outcome::MergedConflict);
        };

        for track in &merged.retained {
            log::warn!(
                "Keeping {} in '{}': it was deleted on one side only",
                track.path.display(),
                name
            );
            notices.push(Notice::RetainedTrack(track.clone()));
        }

        let mut held = false;
        if tracks != remote.resolved {
            if self.options.direction.writes_remote() {
                self.push_remote(name, &remote.with_unresolved(&tracks), true)
                    .await?;
            } else {
                held = true;
            }
        }
        if tracks != local {
            if self.options.direction.writes_local() {
                self.write_local(path, &MergeResult::clean(tracks.clone()))
                    .await?;
            } else {
                held = true;
            }
        }
        if held {
            log::info!(
                "Not recording '{}' as synced: the sync direction skipped a write",
                name
            );
            return Ok(Outcome::HeldByDirection);
        }

        self.commit(name, tracks).await?;
        Ok(if !merged.retained.is_empty() {
            Outcome::RetainedDeletion
        } else if !remote_changed {
            Outcome::Uploaded
        } else if !local_changed {
            Outcome::Downloaded
        } else {
            Outcome::MergedClean
        })
    }

    /// The local file exists but the remote playlist does not.
    async fn remote_missing(
        &self,
        name: &str,
        path: &Path,
        state: Option<PlaylistState>,
        local: Vec<TrackRef>,
    ) -> Result<Outcome, SyncError> {
        let Some(state) = state.filter(PlaylistState::has_snapshot) else {
            if !self.options.direction.writes_remote() {
                return Ok(Outcome::HeldByDirection);
            }
            self.push_remote(name, &track_ids(&local), false).await?;
            self.commit(name, local).await?;
            return Ok(Outcome::Uploaded);
        };

        if self.options.propagate_deletions && local == state.base() {
            if !self.options.direction.writes_local() {
                return Ok(Outcome::HeldByDirection);
            }
            self.delete_local(path).await?;
            self.forget(name).await?;
            return Ok(Outcome::Deleted);
        }

        log::warn!(
            "Remote playlist '{}' was deleted; recreating it from {}",
            name,
            path.display()
        );
        if !self.options.direction.writes_remote() {
            return Ok(Outcome::HeldByDirection);
        }
        self.push_remote(name, &track_ids(&local), false).await?;
        self.commit(name, local).await?;
        Ok(Outcome::RetainedDeletion)
    }

    /// The remote playlist exists but there is no local file.
    async fn local_missing(
        &self,
        name: &str,
        folder: Option<&str>,
        state: Option<PlaylistState>,
        remote: Vec<TrackRef>,
    ) -> Result<Outcome, SyncError> {
        let Some(state) = state.filter(PlaylistState::has_snapshot) else {
            if remote.is_empty() {
                return Ok(Outcome::NoChange);
            }
            let path = self.new_playlist_path(name, folder)?;
            if !self.options.direction.writes_local() {
                return Ok(Outcome::HeldByDirection);
            }
            self.write_local(&path, &MergeResult::clean(remote.clone()))
                .await?;
            self.commit(name, remote).await?;
            return Ok(Outcome::Downloaded);
        };

        if self.options.propagate_deletions && remote == state.base() {
            if !self.options.direction.writes_remote() {
                return Ok(Outcome::HeldByDirection);
            }
            self.delete_remote(name).await?;
            self.forget(name).await?;
            return Ok(Outcome::Deleted);
        }

        let path = self.new_playlist_path(name, folder)?;
        log::warn!(
            "Local playlist '{}' was deleted; recreating {}",
            name,
            path.display()
        );
        if !self.options.direction.writes_local() {
            return Ok(Outcome::HeldByDirection);
        }
        self.write_local(&path, &MergeResult::clean(remote.clone()))
            .await?;
        self.commit(name, remote).await?;
        Ok(Outcome::RetainedDeletion)
    }

    fn merge_options(&self, state: &Option<PlaylistState>) -> MergeOptions {
        // A local file written after a conflict is the user's resolution, so
        // whatever it leaves out was dropped on purpose.
        let resolving = state
            .as_ref()
            .is_some_and(|state| state.pending_conflict.is_some());
        MergeOptions {
            propagate_deletions: self.options.propagate_deletions || resolving,
            concurrent_inserts: self.options.concurrent_inserts,
        }
    }

    fn track_prefix(&self, path: &Path) -> PathBuf {
        self.layout
            .relative_to
            .track_prefix(path, &self.layout.library_dir)
    }

    /// Where a playlist that only exists remotely is written:
    /// `<playlist_dir>[/<folder>]/<name>.m3u`.
    fn new_playlist_path(&self, name: &str, folder: Option<&str>) -> Result<PathBuf, SyncError> {
        let mut path = self.layout.playlist_dir.clone();
        if let Some(folder) = folder {
            check_file_name(folder)?;
            path.push(folder);
        }
        check_file_name(name)?;
        path.push(format!("{}.{}", name, PLAYLIST_EXTENSION));
        Ok(path)
    }

    // ---- reading ----

    /// Resolved tracks of the local file, or `None` while it has conflict markers.
    fn read_local(
        &self,
        name: &str,
        path: &Path,
        notices: &mut Vec<Notice>,
    ) -> Result<Option<Vec<TrackRef>>, SyncError> {
        let parsed = read_playlist(path, &self.track_prefix(path)).map_err(|e| match e {
            ReadPlaylistError::Io { path, source } => SyncError::local_io(path, source),
            markers @ ReadPlaylistError::Markers { .. } => {
                SyncError::state_corruption(name, markers)
            }
        })?;
        let Some(paths) = parsed.resolved() else {
            return Ok(None);
        };

        let mut tracks = Vec::with_capacity(paths.len());
        for path in paths {
            match self.tracks.by_path(&path) {
                Some(track) => tracks.push(track),
                None => {
                    log::warn!("Skipping {} in '{}': not uploaded", path.display(), name);
                    notices.push(Notice::UnresolvedPath(path));
                }
            }
        }
        Ok(Some(tracks))
    }

    fn resolve_remote(&self, ids: Vec<TrackId>, notices: &mut Vec<Notice>) -> RemoteTracks {
        let resolved = ids
            .iter()
            .filter_map(|id| {
                let track = self.tracks.by_id(*id);
                if track.is_none() {
                    log::warn!("Skipping remote track {}: no local file known", id);
                    notices.push(Notice::UnresolvedTrackId(*id));
                }
                track
            })
            .collect();
        RemoteTracks { ids, resolved }
    }

    // ---- writing ----

    async fn write_local(
        &self,
        path: &Path,
        playlist: &MergeResult<TrackRef>,
    ) -> Result<(), SyncError> {
        if self.options.pretend {
            log::info!("Would write {}", path.display());
            return Ok(());
        }
        log::debug!("Writing {}", path.display());
        write_playlist(path, playlist, &self.track_prefix(path))
            .map_err(|e| SyncError::local_io(path, format!("{:#}", e)))
    }

    async fn delete_local(&self, path: &Path) -> Result<(), SyncError> {
        if self.options.pretend {
            log::info!("Would delete {}", path.display());
            return Ok(());
        }
        log::info!("Deleting {}", path.display());
        std::fs::remove_file(path).map_err(|e| SyncError::local_io(path, e))
    }

    async fn push_remote(
        &self,
        name: &str,
        ids: &[TrackId],
        exists: bool,
    ) -> Result<(), SyncError> {
        let verb = if exists { "update" } else { "create" };
        if self.options.pretend {
            log::info!(
                "Would {} remote playlist '{}' with {} track(s)",
                verb,
                name,
                ids.len()
            );
            return Ok(());
        }

        log::debug!("Sending {} to remote playlist '{}'", verb, name);
        let result = if exists {
            self.remote.replace(name, ids).await
        } else {
            self.remote.create(name, ids).await
        };
        result.map_err(|e| SyncError::remote_unavailable(name, &e))
    }

    async fn delete_remote(&self, name: &str) -> Result<(), SyncError> {
        if self.options.pretend {
            log::info!("Would delete remote playlist '{}'", name);
            return Ok(());
        }
        log::info!("Deleting remote playlist '{}'", name);
        self.remote
            .delete(name)
            .await
            .map_err(|e| SyncError::remote_unavailable(name, &e))
    }

    async fn commit(&self, name: &str, tracks: Vec<TrackRef>) -> Result<(), SyncError> {
        if self.options.pretend {
            log::debug!("Would record '{}' as synced", name);
            return Ok(());
        }
        self.state.commit(name, tracks).await
    }

    async fn record_conflict(&self, name: &str, remote: Vec<TrackRef>) -> Result<(), SyncError> {
        if self.options.pretend {
            return Ok(());
        }
        self.state.record_conflict(name, remote).await
    }

    async fn forget(&self, name: &str) -> Result<(), SyncError> {
        if self.options.pretend {
            log::info!("Would forget sync state of '{}'", name);
            return Ok(());
        }
        self.state.forget(name).await
    }
}

/// A remote playlist as fetched, and the part of it that maps to local files.
struct RemoteTracks {
    ids: Vec<TrackId>,
    resolved: Vec<TrackRef>,
}

impl RemoteTracks {
    /// Ids to send for `merged`, keeping the remote tracks that have no local file.
    ///
    /// Each of those stays right after the nearest earlier track that survived
    /// the merge, or at the front when there is none.
    fn with_unresolved(&self, merged: &[TrackRef]) -> Vec<TrackId> {
        let known: HashSet<TrackId> = self.resolved.iter().map(|track| track.id).collect();
        let surviving: HashSet<TrackId> = merged.iter().map(|track| track.id).collect();

        let mut attached: HashMap<Option<TrackId>, Vec<TrackId>> = HashMap::new();
        let mut anchor = None;
        for id in &self.ids {
            if !known.contains(id) {
                attached.entry(anchor).or_default().push(*id);
            } else if surviving.contains(id) {
                anchor = Some(*id);
            }
        }

        let mut ids = attached.remove(&None).unwrap_or_default();
        for track in merged {
            ids.push(track.id);
            if let Some(unresolved) = attached.remove(&Some(track.id)) {
                ids.extend(unresolved);
            }
        }
        ids
    }
}

fn track_ids(tracks: &[TrackRef]) -> Vec<TrackId> {
    tracks.iter().map(|track| track.id).collect()
}

fn check_file_name(name: &str) -> Result<(), SyncError> {
    let invalid =
        name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']);
    if invalid {
        return Err(SyncError::InvalidPlaylistName {
            name: name.to_string(),
        });
    }
    Ok(())
}
