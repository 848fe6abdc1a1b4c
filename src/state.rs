use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::atomic_file::{move_file, write_atomic};
use crate::error::SyncError;
use crate::track::TrackRef;

pub const STATE_VERSION: u32 = 1;

/// Remote content a conflict file was computed against.
///
/// The user resolves the conflict against this sequence, so it stands in as the
/// base on the next sync. The snapshot itself is not advanced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConflict {
    pub remote: Vec<TrackRef>,
    pub detected_at: DateTime<Utc>,
}

/// Everything remembered about one playlist between syncs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaylistState {
    /// The last sequence both sides agreed on.
    pub tracks: Vec<TrackRef>,
    /// `None` until the first sync that completed on both sides.
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_conflict: Option<PendingConflict>,
}

impl PlaylistState {
    pub fn has_snapshot(&self) -> bool {
        self.synced_at.is_some()
    }

    /// The sequence both sides are diffed against.
    pub fn base(&self) -> &[TrackRef] {
        match &self.pending_conflict {
            Some(pending) => &pending.remote,
            None => &self.tracks,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    version: u32,
    #[serde(default)]
    playlists: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
enum Entry {
    Valid(PlaylistState),
    /// Kept verbatim so a later save does not destroy it.
    Corrupt { raw: Value, reason: String },
}

#[derive(Debug)]
enum Contents {
    Loaded(BTreeMap<String, Entry>),
    /// The file as a whole could not be parsed; it is never written.
    Unreadable { reason: String },
}

/// Durable per-playlist sync state backed by a single JSON file.
///
/// Every change rewrites the file atomically, so readers only ever see the
/// previous or the next complete state.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    contents: Mutex<Contents>,
}

impl StateStore {
    /// Open the store at `path`.
    ///
    /// When `path` does not exist but `legacy_path` does, the legacy file is moved
    /// into place if `migrate` is set, and only read otherwise.
    pub fn open(path: &Path, legacy_path: Option<&Path>, migrate: bool) -> Result<Self> {
        let mut source = path.to_path_buf();
        if let Some(legacy) = legacy_path.filter(|legacy| !path.exists() && legacy.exists()) {
            if migrate {
                log::info!(
                    "Moving playlist state from {} to {}",
                    legacy.display(),
                    path.display()
                );
                move_file(legacy, path).wrap_err(format!(
                    "Failed to migrate playlist state from {}",
                    legacy.display()
                ))?;
            } else {
                log::info!(
                    "Would move playlist state from {} to {}",
                    legacy.display(),
                    path.display()
                );
                source = legacy.to_path_buf();
            }
        }

        let contents = load(&source);
        if let Contents::Unreadable { reason } = &contents {
            log::error!("Playlist state file {} is unreadable: {}", source.display(), reason);
        }

        Ok(Self {
            path: path.to_path_buf(),
            contents: Mutex::new(contents),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of every playlist with recorded state, corrupt entries included.
    pub async fn names(&self) -> Vec<String> {
        match &*self.contents.lock().await {
            Contents::Loaded(entries) => entries.keys().cloned().collect(),
            Contents::Unreadable { .. } => Vec::new(),
        }
    }

    pub async fn get(&self, name: &str) -> Result<Option<PlaylistState>, SyncError> {
        match &*self.contents.lock().await {
            Contents::Unreadable { reason } => Err(SyncError::state_corruption(name, reason)),
            Contents::Loaded(entries) => match entries.get(name) {
                None => Ok(None),
                Some(Entry::Valid(state)) => Ok(Some(state.clone())),
                Some(Entry::Corrupt { reason, .. }) => {
                    Err(SyncError::state_corruption(name, reason))
                }
            },
        }
    }

    /// Advance the snapshot to `tracks` and clear any pending conflict.
    pub async fn commit(&self, name: &str, tracks: Vec<TrackRef>) -> Result<(), SyncError> {
        let state = PlaylistState {
            tracks,
            synced_at: Some(Utc::now()),
            pending_conflict: None,
        };
        self.put(name, Some(state)).await
    }

    /// Remember the remote side of an unresolved conflict, keeping the snapshot.
    pub async fn record_conflict(
        &self,
        name: &str,
        remote: Vec<TrackRef>,
    ) -> Result<(), SyncError> {
        let mut state = self.get(name).await?.unwrap_or_default();
        state.pending_conflict = Some(PendingConflict {
            remote,
            detected_at: Utc::now(),
        });
        self.put(name, Some(state)).await
    }

    pub async fn forget(&self, name: &str) -> Result<(), SyncError> {
        self.put(name, None).await
    }

    async fn put(&self, name: &str, state: Option<PlaylistState>) -> Result<(), SyncError> {
        let mut contents = self.contents.lock().await;
        let entries = match &mut *contents {
            Contents::Loaded(entries) => entries,
            Contents::Unreadable { reason } => {
                return Err(SyncError::state_corruption(name, reason));
            }
        };

        let previous = match state {
            Some(state) => entries.insert(name.to_string(), Entry::Valid(state)),
            None => entries.remove(name),
        };

        if let Err(e) = save(&self.path, entries).await {
            // leave memory matching the file on disk
            match previous {
                Some(previous) => entries.insert(name.to_string(), previous),
                None => entries.remove(name),
            };
            return Err(SyncError::local_io(&self.path, format!("{:#}", e)));
        }
        Ok(())
    }
}

fn load(path: &Path) -> Contents {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No playlist state at {}; starting fresh", path.display());
            return Contents::Loaded(BTreeMap::new());
        }
        Err(e) => {
            return Contents::Unreadable {
                reason: format!("failed to read {}: {}", path.display(), e),
            };
        }
    };

    let document: RawDocument = match serde_json::from_str(&contents) {
        Ok(document) => document,
        Err(e) => {
            return Contents::Unreadable {
                reason: format!("invalid JSON in {}: {}", path.display(), e),
            };
        }
    };
    if document.version != STATE_VERSION {
        return Contents::Unreadable {
            reason: format!(
                "unsupported state version {} in {}",
                document.version,
                path.display()
            ),
        };
    }

    let entries = document
        .playlists
        .into_iter()
        .map(|(name, raw)| {
            let entry = match serde_json::from_value::<PlaylistState>(raw.clone()) {
                Ok(state) => Entry::Valid(state),
                Err(e) => {
                    log::warn!("Ignoring corrupt state for playlist '{}': {}", name, e);
                    Entry::Corrupt {
                        raw,
                        reason: e.to_string(),
                    }
                }
            };
            (name, entry)
        })
        .collect();
    Contents::Loaded(entries)
}

/// Write every entry to `path`, keeping corrupt ones byte for byte.
///
/// The file write runs on the blocking pool; callers hold the store lock across
/// it so saves land in order.
async fn save(path: &Path, entries: &BTreeMap<String, Entry>) -> Result<()> {
    let contents = render(entries)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &contents))
        .await
        .wrap_err("Playlist state write task failed")?
}

fn render(entries: &BTreeMap<String, Entry>) -> Result<Vec<u8>> {
    let mut playlists = serde_json::Map::new();
    for (name, entry) in entries {
        let value = match entry {
            Entry::Valid(state) => serde_json::to_value(state)
                .wrap_err(format!("Failed to serialize state for '{}'", name))?,
            Entry::Corrupt { raw, .. } => raw.clone(),
        };
        playlists.insert(name.clone(), value);
    }

    let document = serde_json::json!({
        "version": STATE_VERSION,
        "playlists": playlists,
    });
    let mut contents = serde_json::to_vec_pretty(&document)?;
    contents.push(b'\n');
    Ok(contents)
}
