use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use color_eyre::eyre::{Result, eyre};
use tempfile::TempDir;

use crate::m3u::RelativeTo;
use crate::ports::remote::{RemoteListing, RemotePlaylists};
use crate::services::playlist_sync::LocalLayout;
use crate::state::StateStore;
use crate::track::{TrackId, TrackIndex, TrackRecord, TrackRef};

pub fn ids(ids: &[u64]) -> Vec<TrackId> {
    ids.iter().copied().map(TrackId).collect()
}

/// A library and playlist directory on disk where track `n` lives at
/// `<library>/<n>.mp3` and was uploaded as remote track `n`.
pub struct Fixture {
    pub dir: TempDir,
    pub playlist_dir: PathBuf,
    pub library_dir: PathBuf,
    pub state_path: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let playlist_dir = dir.path().join("playlists");
        let library_dir = dir.path().join("library");
        std::fs::create_dir_all(&playlist_dir).unwrap();
        std::fs::create_dir_all(&library_dir).unwrap();
        let state_path = dir.path().join("config").join("playlists.json");
        Self {
            dir,
            playlist_dir,
            library_dir,
            state_path,
        }
    }

    pub fn track(&self, id: u64) -> TrackRef {
        TrackRef::new(TrackId(id), self.library_dir.join(format!("{}.mp3", id)))
    }

    /// Index knowing tracks `1..=count`.
    pub fn index(&self, count: u64) -> TrackIndex {
        TrackIndex::from_records((1..=count).map(|id| TrackRecord {
            path: self.track(id).path,
            track_id: TrackId(id),
            uploaded_at: None,
            tag_ids: vec![],
        }))
    }

    pub fn layout(&self) -> LocalLayout {
        LocalLayout {
            playlist_dir: self.playlist_dir.clone(),
            library_dir: self.library_dir.clone(),
            relative_to: RelativeTo::Library,
        }
    }

    pub fn store(&self) -> StateStore {
        StateStore::open(&self.state_path, None, true).unwrap()
    }

    pub fn playlist_path(&self, name: &str) -> PathBuf {
        self.playlist_dir.join(format!("{}.m3u", name))
    }

    pub fn write_playlist(&self, name: &str, ids: &[u64]) -> PathBuf {
        let contents: String = ids.iter().map(|id| format!("{}.mp3\n", id)).collect();
        self.write_raw(name, &contents)
    }

    pub fn write_raw(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.playlist_path(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn read_raw(&self, name: &str) -> String {
        std::fs::read_to_string(self.playlist_path(name)).unwrap()
    }
}

/// In-memory remote service. Clones share the same playlists and call log.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    playlists: Arc<Mutex<BTreeMap<String, Vec<TrackId>>>>,
    folders: Arc<Mutex<BTreeMap<String, Vec<String>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, tracks: &[u64]) -> Self {
        self.set(name, tracks);
        self
    }

    pub fn with_folder(self, folder: &str, children: &[&str]) -> Self {
        self.folders.lock().unwrap().insert(
            folder.to_string(),
            children.iter().map(|child| child.to_string()).collect(),
        );
        self
    }

    /// Change a playlist behind the sync's back.
    pub fn set(&self, name: &str, tracks: &[u64]) {
        self.playlists
            .lock()
            .unwrap()
            .insert(name.to_string(), ids(tracks));
    }

    pub fn remove(&self, name: &str) {
        self.playlists.lock().unwrap().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Vec<u64>> {
        self.playlists
            .lock()
            .unwrap()
            .get(name)
            .map(|tracks| tracks.iter().map(|id| id.0).collect())
    }

    /// Writes performed so far, e.g. `"replace Mix"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: &str, name: &str) {
        self.calls.lock().unwrap().push(format!("{} {}", call, name));
    }
}

#[async_trait::async_trait]
impl RemotePlaylists for MemoryRemote {
    async fn list(&self) -> Result<RemoteListing> {
        Ok(RemoteListing {
            playlists: self.playlists.lock().unwrap().keys().cloned().collect(),
            folders: self.folders.lock().unwrap().clone(),
        })
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<TrackId>>> {
        Ok(self.playlists.lock().unwrap().get(name).cloned())
    }

    async fn create(&self, name: &str, tracks: &[TrackId]) -> Result<()> {
        self.record("create", name);
        let mut playlists = self.playlists.lock().unwrap();
        if playlists.contains_key(name) {
            return Err(eyre!("Playlist '{}' already exists", name));
        }
        playlists.insert(name.to_string(), tracks.to_vec());
        Ok(())
    }

    async fn replace(&self, name: &str, tracks: &[TrackId]) -> Result<()> {
        self.record("replace", name);
        let mut playlists = self.playlists.lock().unwrap();
        let existing = playlists
            .get_mut(name)
            .ok_or_else(|| eyre!("Playlist '{}' not found", name))?;
        *existing = tracks.to_vec();
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.record("delete", name);
        self.playlists
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| eyre!("Playlist '{}' not found", name))
    }
}
