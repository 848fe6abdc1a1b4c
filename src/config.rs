use std::path::{Path, PathBuf};

use color_eyre::{
    Result,
    eyre::{Context, OptionExt},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::m3u::RelativeTo;
use crate::merge::ConcurrentInserts;

const DEFAULT_CONFIG: &str = r#"# Directory containing your .m3u playlists
playlist_dir = "~/Music/Playlists"

# Root of your music library
library_dir = "~/Music"

# What relative playlist entries are resolved against:
# "library", "playlist" (the playlist file's directory) or a directory path
relative_to = "library"

# JSON list of uploaded tracks: [{"path": "...", "track_id": 123}, ...]
track_index = "~/.config/playlist-sync/tracks.json"

# Playlists synced at the same time
concurrency = 4

# What to do when both sides added different tracks at the same place:
# "conflict" or "concatenate" (local additions first)
concurrent_inserts = "conflict"

[remote]
base_url = "https://music.example.com/api/"
# token = "..."  (or set PLAYLIST_SYNC_REMOTE_TOKEN)
retries = 3
"#;

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    playlist_dir: String,
    library_dir: String,
    #[serde(default = "default_relative_to")]
    relative_to: String,
    #[serde(default)]
    state_path: Option<String>,
    #[serde(default)]
    legacy_state_path: Option<String>,
    track_index: String,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
    #[serde(default)]
    concurrent_inserts: ConcurrentInserts,
    remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_retries")]
    pub retries: usize,
}

fn default_relative_to() -> String {
    "library".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_retries() -> usize {
    3
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents).context(format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("playlist-sync").join("config.toml"))
    }

    /// Load config from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path().ok_or_eyre("No config directory found")?;
        Self::from_file(&config_path)
    }

    /// Write a commented default config, leaving an existing one alone
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or_eyre("No config directory found")?;
        if path.exists() {
            log::info!("Config already exists at {}", path.display());
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .context(format!("Failed to create config directory: {}", dir.display()))?;
        }
        std::fs::write(&path, DEFAULT_CONFIG)
            .context(format!("Failed to write config file: {}", path.display()))?;
        Ok(path)
    }

    /// Expand ~ to home directory
    fn expand_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    pub fn playlist_dir(&self) -> PathBuf {
        self.expand_path(&self.playlist_dir)
    }

    pub fn library_dir(&self) -> PathBuf {
        self.expand_path(&self.library_dir)
    }

    pub fn relative_to(&self) -> RelativeTo {
        match self.relative_to.as_str() {
            "library" => RelativeTo::Library,
            "playlist" => RelativeTo::Playlist,
            dir => RelativeTo::Directory(self.expand_path(dir)),
        }
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(self.expand_path(path)),
            None => dirs::config_dir()
                .map(|dir| dir.join("playlist-sync").join("playlists.json"))
                .ok_or_eyre("No config directory found for the playlist state"),
        }
    }

    /// Where older versions kept the playlist state.
    pub fn legacy_state_path(&self) -> PathBuf {
        match &self.legacy_state_path {
            Some(path) => self.expand_path(path),
            None => self.library_dir().join(".playlist-sync.json"),
        }
    }

    pub fn track_index_path(&self) -> PathBuf {
        self.expand_path(&self.track_index)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn concurrent_inserts(&self) -> ConcurrentInserts {
        self.concurrent_inserts
    }

    pub fn remote(&self) -> &RemoteConfig {
        &self.remote
    }

    pub fn remote_url(&self) -> Result<Url> {
        Url::parse(&self.remote.base_url)
            .context(format!("Invalid remote base_url: {}", self.remote.base_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        playlist_dir = "/srv/playlists"
        library_dir = "/srv/music"
        track_index = "/srv/tracks.json"

        [remote]
        base_url = "https://music.example.com/api/"
    "#;

    #[test]
    fn test_default_config_parses() {
        let config = Config::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.relative_to(), RelativeTo::Library);
        assert_eq!(config.concurrent_inserts(), ConcurrentInserts::Conflict);
        assert_eq!(config.remote().retries, 3);
        assert!(config.remote_url().is_ok());
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.playlist_dir(), PathBuf::from("/srv/playlists"));
        assert_eq!(config.concurrency(), 4);
        assert_eq!(config.remote().token, None);
        assert_eq!(
            config.legacy_state_path(),
            PathBuf::from("/srv/music/.playlist-sync.json")
        );
    }

    #[test]
    fn test_relative_to_variants() {
        let with = |value: &str| {
            Config::parse(&format!("relative_to = \"{}\"\n{}", value, MINIMAL))
                .unwrap()
                .relative_to()
        };
        assert_eq!(with("playlist"), RelativeTo::Playlist);
        assert_eq!(
            with("/mnt/audio"),
            RelativeTo::Directory(PathBuf::from("/mnt/audio"))
        );
    }

    #[test]
    fn test_explicit_paths_and_concatenate() {
        let config = Config::parse(&format!(
            "state_path = \"/tmp/state.json\"\nconcurrent_inserts = \"concatenate\"\n{}",
            MINIMAL
        ))
        .unwrap();
        assert_eq!(config.state_path().unwrap(), PathBuf::from("/tmp/state.json"));
        assert_eq!(config.concurrent_inserts(), ConcurrentInserts::Concatenate);
    }

    #[test]
    fn test_expand_home() {
        let config = Config::parse(MINIMAL).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.expand_path("~/Music"), home.join("Music"));
        }
        assert_eq!(config.expand_path("/abs/~/x"), PathBuf::from("/abs/~/x"));
    }

    #[test]
    fn test_missing_remote_table_is_an_error() {
        assert!(Config::parse("playlist_dir = \"a\"\nlibrary_dir = \"b\"\ntrack_index = \"c\"").is_err());
    }
}
