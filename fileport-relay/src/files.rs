//! Local file access for the host agent and the plain HTTP endpoints.
//! Every path is resolved inside a root directory; nothing escapes it.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use fileport_core::{ErrorBody, FileEntry};

/// Why a file operation was refused or failed.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("File not found")]
    NotFound,
    #[error("Not a file")]
    NotAFile,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Access denied: path outside root")]
    OutsideRoot,
    #[error("Error reading file: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    /// Error frame body for this failure.
    pub fn to_error_body(&self) -> ErrorBody {
        match self {
            FileError::Io(e) => ErrorBody::new("Error reading file").with_details(e.to_string()),
            other => ErrorBody::new(other.to_string()),
        }
    }
}

fn from_metadata_err(e: std::io::Error) -> FileError {
    if e.kind() == std::io::ErrorKind::NotFound {
        FileError::NotFound
    } else {
        FileError::Io(e)
    }
}

/// Resolve `requested` (slash-separated, relative to `root`) to a canonical
/// path inside `root`. Leading slashes are ignored; `..` and symlinks that
/// leave the root are refused.
pub async fn resolve_in_root(root: &Path, requested: &str) -> Result<PathBuf, FileError> {
    let relative = Path::new(requested.trim_start_matches(['/', '\\']));
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FileError::OutsideRoot);
            }
        }
    }
    let root = tokio::fs::canonicalize(root).await.map_err(from_metadata_err)?;
    let target = tokio::fs::canonicalize(root.join(relative))
        .await
        .map_err(from_metadata_err)?;
    if !target.starts_with(&root) {
        return Err(FileError::OutsideRoot);
    }
    Ok(target)
}

/// Resolve `requested` and require a regular file. Returns the path and size.
pub async fn open_file(root: &Path, requested: &str) -> Result<(PathBuf, u64), FileError> {
    let path = resolve_in_root(root, requested).await?;
    let meta = tokio::fs::metadata(&path).await.map_err(from_metadata_err)?;
    if !meta.is_file() {
        return Err(FileError::NotAFile);
    }
    Ok((path, meta.len()))
}

/// List a directory below `root`. Directory names get a trailing `/`.
pub async fn list_dir(root: &Path, requested: Option<&str>) -> Result<Vec<FileEntry>, FileError> {
    let canonical_root = tokio::fs::canonicalize(root).await.map_err(from_metadata_err)?;
    let dir = resolve_in_root(root, requested.unwrap_or("")).await?;
    let meta = tokio::fs::metadata(&dir).await.map_err(from_metadata_err)?;
    if !meta.is_dir() {
        return Err(FileError::NotADirectory);
    }

    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        let meta = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                log::debug!("[Files] Skipping {}: {e}", path.display());
                continue;
            }
        };
        let mut name = entry.file_name().to_string_lossy().into_owned();
        let mut rel = relative_slash_path(&canonical_root, &dir.join(&name));
        if meta.is_dir() {
            name.push('/');
            rel.push('/');
        }
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis() as u64);
        entries.push(FileEntry {
            path: rel,
            name,
            is_dir: meta.is_dir(),
            size: meta.len(),
            last_modified,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Plain file names in `dir`, sorted.
pub async fn list_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Create `dir` if missing and seed it with an example file.
pub async fn ensure_files_dir(dir: &Path) -> std::io::Result<()> {
    if tokio::fs::metadata(dir).await.is_ok() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join("example.txt"), "This is a test file.").await
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
