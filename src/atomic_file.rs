use std::io::Write;
use std::path::Path;

use color_eyre::{Result, eyre::Context};

/// Replace the file at `path` with `contents` without ever exposing a partial write.
///
/// The data goes to a temporary file in the same directory, is flushed to disk and
/// then renamed over the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .wrap_err(format!("Failed to create directory: {}", dir.display()))?;

    let mut file = tempfile::NamedTempFile::new_in(dir)
        .wrap_err(format!("Failed to create temporary file in {}", dir.display()))?;
    file.write_all(contents)
        .wrap_err(format!("Failed to write temporary file for {}", path.display()))?;
    file.as_file()
        .sync_all()
        .wrap_err(format!("Failed to flush temporary file for {}", path.display()))?;
    file.persist(path)
        .wrap_err(format!("Failed to replace {}", path.display()))?;

    tracing::debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

/// Move `from` to `to`, copying when a rename is not possible (e.g. across devices).
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(dir) = to.parent() {
        std::fs::create_dir_all(dir)
            .wrap_err(format!("Failed to create directory: {}", dir.display()))?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    let contents =
        std::fs::read(from).wrap_err(format!("Failed to read {}", from.display()))?;
    write_atomic(to, &contents)?;
    std::fs::remove_file(from).wrap_err(format!("Failed to remove {}", from.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_move_file_creates_destination_dir() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("old.json");
        let to = dir.path().join("config").join("new.json");
        std::fs::write(&from, "{}").unwrap();

        move_file(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "{}");
    }
}
