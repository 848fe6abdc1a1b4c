use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};

use crate::ports::tracks::TrackResolver;

/// The remote service's identifier for an uploaded track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of a playlist.
///
/// Two references are the same track when their remote ids match; the path is
/// only carried along so the entry can be rendered back into an M3U file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRef {
    pub id: TrackId,
    pub path: PathBuf,
}

impl TrackRef {
    pub fn new(id: TrackId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }
}

impl PartialEq for TrackRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TrackRef {}

impl Hash for TrackRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Per-track metadata recorded when a track was uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub path: PathBuf,
    pub track_id: TrackId,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tag_ids: Vec<u64>,
}

/// In-memory lookup between local files and remote track ids.
#[derive(Debug, Default)]
pub struct TrackIndex {
    by_path: HashMap<PathBuf, TrackId>,
    by_id: HashMap<TrackId, TrackRecord>,
}

impl TrackIndex {
    pub fn from_records(records: impl IntoIterator<Item = TrackRecord>) -> Self {
        let mut index = Self::default();
        for mut record in records {
            record.path = normalize_path(&record.path);
            if let Some(previous) = index.by_id.get(&record.track_id) {
                log::warn!(
                    "Track ID {} is recorded for both '{}' and '{}'; keeping the latter",
                    record.track_id,
                    previous.path.display(),
                    record.path.display()
                );
                index.by_path.remove(&previous.path);
            }
            index.by_path.insert(record.path.clone(), record.track_id);
            index.by_id.insert(record.track_id, record);
        }
        index
    }

    /// Load a JSON list of [`TrackRecord`]s.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read track index: {}", path.display()))?;
        let records: Vec<TrackRecord> = serde_json::from_str(&contents)
            .context(format!("Failed to parse track index: {}", path.display()))?;
        log::debug!("Loaded {} track record(s) from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[cfg(test)]
    pub fn record(&self, id: TrackId) -> Option<&TrackRecord> {
        self.by_id.get(&id)
    }
}

impl TrackResolver for TrackIndex {
    fn by_path(&self, path: &Path) -> Option<TrackRef> {
        let path = normalize_path(path);
        self.by_path
            .get(&path)
            .map(|id| TrackRef::new(*id, path.clone()))
    }

    fn by_id(&self, id: TrackId) -> Option<TrackRef> {
        self.by_id
            .get(&id)
            .map(|record| TrackRef::new(id, record.path.clone()))
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. Files are not required to exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
