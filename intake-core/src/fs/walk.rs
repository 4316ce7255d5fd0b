use std::path::{Path, PathBuf};

use tracing::debug;

use super::{FileSystem, FsEntry};
use crate::error::FsError;

/// Collect every plain file under `root`, depth first, sorted by path within
/// each directory.
///
/// A missing `root` is an error (`FsError::NotFound`); subdirectories that
/// disappear mid-walk are skipped.
pub async fn walk_files(
    fs: &dyn FileSystem,
    root: &Path,
    recursive: bool,
) -> Result<Vec<FsEntry>, FsError> {
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs.list(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() && dir.as_path() != root => {
                debug!(path = %dir.display(), "directory vanished during walk");
                continue;
            }
            Err(err) => return Err(err),
        };
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let mut subdirs = Vec::new();
        for entry in entries {
            if entry.is_file() {
                files.push(entry);
            } else if recursive && entry.is_dir() {
                subdirs.push(entry.path);
            }
        }
        // Reversed so the smallest path is walked first.
        pending.extend(subdirs.into_iter().rev());
    }

    Ok(files)
}
