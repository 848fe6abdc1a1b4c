use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use walkdir::WalkDir;

use crate::atomic_file::write_atomic;
use crate::error::MarkerError;
use crate::merge::{ConflictRegion, MergeResult, Segment};
use crate::track::{TrackRef, normalize_path};

pub const PLAYLIST_EXTENSION: &str = "m3u";

// Conflict markers are M3U comments, so players skip them while a conflict is
// waiting to be resolved.
pub const CONFLICT_START: &str = "#<<<<<<< local";
pub const CONFLICT_SEPARATOR: &str = "#=======";
pub const CONFLICT_END: &str = "#>>>>>>> remote";

/// Directory that relative entries in a playlist file are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelativeTo {
    /// The music library directory.
    Library,
    /// The directory containing the playlist file.
    Playlist,
    Directory(PathBuf),
}

impl RelativeTo {
    pub fn track_prefix(&self, playlist: &Path, library_dir: &Path) -> PathBuf {
        match self {
            RelativeTo::Library => normalize_path(library_dir),
            RelativeTo::Playlist => {
                normalize_path(playlist.parent().unwrap_or_else(|| Path::new(".")))
            }
            RelativeTo::Directory(dir) => normalize_path(dir),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadPlaylistError {
    #[error("Failed to read playlist {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed conflict markers in {path}: {source}")]
    Markers { path: PathBuf, source: MarkerError },
}

/// Read a playlist file into resolved, normalized track paths.
///
/// Files left behind by a conflicted sync come back with their conflict regions
/// intact.
pub fn read_playlist(
    path: &Path,
    prefix: &Path,
) -> Result<MergeResult<PathBuf>, ReadPlaylistError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ReadPlaylistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_playlist(&contents, prefix).map_err(|source| ReadPlaylistError::Markers {
        path: path.to_path_buf(),
        source,
    })
}

enum ParseState {
    Clean,
    Local { start: usize },
    Remote { start: usize },
}

pub fn parse_playlist(
    contents: &str,
    prefix: &Path,
) -> Result<MergeResult<PathBuf>, MarkerError> {
    let mut result = MergeResult::default();
    let mut state = ParseState::Clean;
    let mut local = Vec::new();
    let mut remote = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();
        match line {
            CONFLICT_START => match state {
                ParseState::Clean => state = ParseState::Local { start: line_number },
                _ => return Err(MarkerError::NestedStart { line: line_number }),
            },
            CONFLICT_SEPARATOR => match state {
                ParseState::Local { start } => state = ParseState::Remote { start },
                _ => return Err(MarkerError::StraySeparator { line: line_number }),
            },
            CONFLICT_END => match state {
                ParseState::Remote { .. } => {
                    result.push_conflict(ConflictRegion {
                        local: std::mem::take(&mut local),
                        remote: std::mem::take(&mut remote),
                    });
                    state = ParseState::Clean;
                }
                ParseState::Local { .. } => {
                    return Err(MarkerError::MissingSeparator { line: line_number });
                }
                ParseState::Clean => return Err(MarkerError::StrayEnd { line: line_number }),
            },
            _ if line.is_empty() || line.starts_with('#') => {}
            _ => {
                let track = normalize_path(&prefix.join(line));
                match state {
                    ParseState::Clean => result.push_clean(Some(track)),
                    ParseState::Local { .. } => local.push(track),
                    ParseState::Remote { .. } => remote.push(track),
                }
            }
        }
    }

    match state {
        ParseState::Clean => Ok(result),
        ParseState::Local { start } | ParseState::Remote { start } => {
            Err(MarkerError::Unterminated { line: start })
        }
    }
}

/// Render a playlist, conflict regions included, as M3U text.
pub fn render_playlist(playlist: &MergeResult<TrackRef>, prefix: &Path) -> String {
    let mut lines = Vec::new();
    for segment in playlist.segments() {
        match segment {
            Segment::Clean(tracks) => {
                lines.extend(tracks.iter().map(|track| track_line(track, prefix)));
            }
            Segment::Conflict(region) => {
                lines.push(CONFLICT_START.to_string());
                lines.extend(region.local.iter().map(|track| track_line(track, prefix)));
                lines.push(CONFLICT_SEPARATOR.to_string());
                lines.extend(region.remote.iter().map(|track| track_line(track, prefix)));
                lines.push(CONFLICT_END.to_string());
            }
        }
    }

    let mut contents = lines.join("\n");
    contents.push('\n');
    contents
}

fn track_line(track: &TrackRef, prefix: &Path) -> String {
    match track.path.strip_prefix(prefix) {
        Ok(relative) => relative.display().to_string(),
        // Can't make relative, use the absolute path
        Err(_) => track.path.display().to_string(),
    }
}

/// Atomically replace the playlist file at `path`.
pub fn write_playlist(path: &Path, playlist: &MergeResult<TrackRef>, prefix: &Path) -> Result<()> {
    let contents = render_playlist(playlist, prefix);
    write_atomic(path, contents.as_bytes())
}

/// Find playlist files below `dir`, keyed by playlist name (the file stem).
///
/// `filters` match names case-insensitively; an empty filter list selects all.
pub fn discover_playlists(dir: &Path, filters: &[String]) -> BTreeMap<String, PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Failed to read entry under {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(PLAYLIST_EXTENSION))
        })
        .collect();
    paths.sort();

    let mut playlists: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in paths {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            log::warn!("Skipping playlist with non UTF-8 name: {}", path.display());
            continue;
        };
        if !matches_filters(name, filters) {
            continue;
        }
        if let Some(existing) = playlists.get(name) {
            log::warn!(
                "Playlist '{}' exists as both '{}' and '{}'; using the former",
                name,
                existing.display(),
                path.display()
            );
            continue;
        }
        playlists.insert(name.to_string(), path.clone());
    }
    playlists
}

pub fn matches_filters(name: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackId;

    fn track(id: u64, path: &str) -> TrackRef {
        TrackRef::new(TrackId(id), path)
    }

    #[test]
    fn test_parse_resolves_relative_paths_and_skips_comments() {
        let contents = "#EXTM3U\n# comment\nartist/a.mp3\n\n  ./b.mp3  \n/elsewhere/c.mp3\n";
        let parsed = parse_playlist(contents, Path::new("/music")).unwrap();

        assert_eq!(
            parsed.resolved().unwrap(),
            vec![
                PathBuf::from("/music/artist/a.mp3"),
                PathBuf::from("/music/b.mp3"),
                PathBuf::from("/elsewhere/c.mp3"),
            ]
        );
    }

    #[test]
    fn test_parse_reconstructs_conflicts() {
        let contents = "a.mp3\n#<<<<<<< local\nz.mp3\n#=======\nw.mp3\nv.mp3\n#>>>>>>> remote\nc.mp3\n";
        let parsed = parse_playlist(contents, Path::new("/m")).unwrap();

        assert!(parsed.has_conflicts());
        assert_eq!(
            parsed.segments(),
            &[
                Segment::Clean(vec![PathBuf::from("/m/a.mp3")]),
                Segment::Conflict(ConflictRegion {
                    local: vec![PathBuf::from("/m/z.mp3")],
                    remote: vec![PathBuf::from("/m/w.mp3"), PathBuf::from("/m/v.mp3")],
                }),
                Segment::Clean(vec![PathBuf::from("/m/c.mp3")]),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_malformed_markers() {
        let prefix = Path::new("/m");
        assert_eq!(
            parse_playlist("#<<<<<<< local\n#<<<<<<< local\n", prefix),
            Err(MarkerError::NestedStart { line: 2 })
        );
        assert_eq!(
            parse_playlist("a.mp3\n#=======\n", prefix),
            Err(MarkerError::StraySeparator { line: 2 })
        );
        assert_eq!(
            parse_playlist("#<<<<<<< local\na.mp3\n#>>>>>>> remote\n", prefix),
            Err(MarkerError::MissingSeparator { line: 3 })
        );
        assert_eq!(
            parse_playlist("#>>>>>>> remote\n", prefix),
            Err(MarkerError::StrayEnd { line: 1 })
        );
        assert_eq!(
            parse_playlist("x.mp3\n#<<<<<<< local\na.mp3\n#=======\n", prefix),
            Err(MarkerError::Unterminated { line: 2 })
        );
    }

    #[test]
    fn test_render_uses_relative_paths_when_possible() {
        let playlist = MergeResult::clean(vec![
            track(1, "/music/artist/album/track1.mp3"),
            track(2, "/other/track2.mp3"),
        ]);
        assert_eq!(
            render_playlist(&playlist, Path::new("/music")),
            "artist/album/track1.mp3\n/other/track2.mp3\n"
        );
    }

    #[test]
    fn test_render_conflict_markers() {
        let mut playlist = MergeResult::clean(vec![track(1, "/m/a.mp3")]);
        playlist.push_conflict(ConflictRegion {
            local: vec![track(2, "/m/z.mp3")],
            remote: vec![track(3, "/m/w.mp3")],
        });
        playlist.push_clean(vec![track(4, "/m/c.mp3")]);

        let rendered = render_playlist(&playlist, Path::new("/m"));
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "a.mp3",
                CONFLICT_START,
                "z.mp3",
                CONFLICT_SEPARATOR,
                "w.mp3",
                CONFLICT_END,
                "c.mp3",
            ]
        );
        assert!(
            lines
                .iter()
                .filter(|line| line.starts_with("#"))
                .all(|line| [CONFLICT_START, CONFLICT_SEPARATOR, CONFLICT_END].contains(line))
        );
    }

    #[test]
    fn test_conflicted_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("music");
        let path = dir.path().join("playlists").join("mix.m3u");

        let mut playlist = MergeResult::clean(vec![TrackRef::new(TrackId(1), prefix.join("a.mp3"))]);
        playlist.push_conflict(ConflictRegion {
            local: vec![TrackRef::new(TrackId(2), prefix.join("z.mp3"))],
            remote: vec![TrackRef::new(TrackId(3), prefix.join("sub/w.mp3"))],
        });

        write_playlist(&path, &playlist, &prefix).unwrap();
        let read = read_playlist(&path, &prefix).unwrap();
        let by_path: BTreeMap<PathBuf, TrackRef> = [
            (prefix.join("a.mp3"), 1),
            (prefix.join("z.mp3"), 2),
            (prefix.join("sub/w.mp3"), 3),
        ]
        .into_iter()
        .map(|(path, id)| (path.clone(), TrackRef::new(TrackId(id), path)))
        .collect();
        let resolved = read.filter_map(|path| by_path.get(&path).cloned());

        assert_eq!(resolved, playlist);
        assert_eq!(
            resolved
                .conflicts()
                .map(|region| region.local[0].path.clone())
                .collect::<Vec<_>>(),
            vec![prefix.join("z.mp3")]
        );
    }

    #[test]
    fn test_write_creates_parent_dirs_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("p.m3u");

        write_playlist(&path, &MergeResult::clean(vec![track(1, "/x/a.mp3")]), Path::new("/x"))
            .unwrap();
        write_playlist(&path, &MergeResult::clean(vec![track(2, "/x/b.mp3")]), Path::new("/x"))
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "b.mp3\n");
    }

    #[test]
    fn test_discover_playlists_with_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("folder")).unwrap();
        std::fs::write(dir.path().join("Road Trip.m3u"), "").unwrap();
        std::fs::write(dir.path().join("folder").join("Chill.M3U"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let all = discover_playlists(dir.path(), &[]);
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["Chill", "Road Trip"]);

        let filtered = discover_playlists(dir.path(), &["road trip".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered["Road Trip"], dir.path().join("Road Trip.m3u"));
    }

    #[test]
    fn test_discover_keeps_first_of_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("Mix.m3u"), "").unwrap();
        std::fs::write(dir.path().join("b").join("Mix.m3u"), "").unwrap();

        let found = discover_playlists(dir.path(), &[]);
        assert_eq!(found.len(), 1);
        assert_eq!(found["Mix"], dir.path().join("Mix.m3u"));
    }

    #[test]
    fn test_track_prefix() {
        let playlist = Path::new("/lists/rock/p.m3u");
        let library = Path::new("/music");
        assert_eq!(
            RelativeTo::Library.track_prefix(playlist, library),
            PathBuf::from("/music")
        );
        assert_eq!(
            RelativeTo::Playlist.track_prefix(playlist, library),
            PathBuf::from("/lists/rock")
        );
        assert_eq!(
            RelativeTo::Directory("/srv/./audio".into()).track_prefix(playlist, library),
            PathBuf::from("/srv/audio")
        );
    }
}
