use std::path::PathBuf;

/// Why a single playlist's sync failed. Failures never abort the batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Playlist state for '{name}' is unusable: {reason}")]
    StateCorruption { name: String, reason: String },

    #[error("Remote playlist service failed for '{name}': {reason}")]
    RemoteUnavailable { name: String, reason: String },

    #[error("Local file error on {path}: {reason}")]
    LocalIo { path: PathBuf, reason: String },

    #[error("Playlist name '{name}' cannot be used as a file name")]
    InvalidPlaylistName { name: String },
}

impl SyncError {
    pub fn state_corruption(name: &str, reason: impl ToString) -> Self {
        Self::StateCorruption {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Keeps the whole error chain so transport failures stay diagnosable.
    pub fn remote_unavailable(name: &str, error: &color_eyre::Report) -> Self {
        Self::RemoteUnavailable {
            name: name.to_string(),
            reason: format!("{:#}", error),
        }
    }

    pub fn local_io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::LocalIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Structural problems with conflict markers in a playlist file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    #[error("line {line}: conflict start inside an open conflict")]
    NestedStart { line: usize },

    #[error("line {line}: separator outside a conflict")]
    StraySeparator { line: usize },

    #[error("line {line}: conflict end without a separator")]
    MissingSeparator { line: usize },

    #[error("line {line}: conflict end outside a conflict")]
    StrayEnd { line: usize },

    #[error("conflict opened on line {line} is never closed")]
    Unterminated { line: usize },
}
