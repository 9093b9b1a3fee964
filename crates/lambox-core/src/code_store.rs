use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::StageError;

/// Per-function code directories under one base directory.
///
/// A directory exists exactly while its function is being created or is
/// registered; creating it is how a name gets claimed.
#[derive(Debug, Clone)]
pub struct CodeStore {
    base_dir: PathBuf,
}

impl CodeStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `~/.lambox/functions`, or `./.lambox/functions` without a home dir.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lambox")
            .join("functions")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn function_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Decode a base64 zip archive and unpack it into the function's
    /// directory. Returns the decoded archive size in bytes.
    ///
    /// Fails with [`StageError::AlreadyStaged`] without touching anything if
    /// the directory exists. On any later failure the directory is removed.
    pub async fn stage(&self, name: &str, zip_b64: &str) -> Result<u64, StageError> {
        let dir = self.function_dir(name);
        tokio::fs::create_dir_all(&self.base_dir).await?;

        if let Err(e) = tokio::fs::create_dir(&dir).await {
            return Err(if e.kind() == std::io::ErrorKind::AlreadyExists {
                StageError::AlreadyStaged(name.to_string())
            } else {
                e.into()
            });
        }

        let result = unpack(dir.clone(), zip_b64).await;
        match &result {
            Ok(size) => {
                tracing::debug!(function = %name, size, dir = %dir.display(), "Code staged");
            }
            Err(e) => {
                tracing::debug!(
                    function = %name,
                    error = %e,
                    "Staging failed, removing directory"
                );
                if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %cleanup,
                        "Failed to remove staged code"
                    );
                }
            }
        }
        result
    }

    /// Delete a function's code directory. Missing directories are fine.
    pub async fn remove(&self, name: &str) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(self.function_dir(name)).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

async fn unpack(dir: PathBuf, zip_b64: &str) -> Result<u64, StageError> {
    let bytes = STANDARD
        .decode(zip_b64.trim())
        .map_err(|e| StageError::InvalidArchive(format!("could not decode ZipFile: {e}")))?;
    let size = bytes.len() as u64;

    tokio::task::spawn_blocking(move || extract(&dir, bytes))
        .await
        .map_err(std::io::Error::other)??;
    Ok(size)
}

fn extract(dir: &Path, bytes: Vec<u8>) -> Result<(), StageError> {
    let invalid =
        |e: zip::result::ZipError| StageError::InvalidArchive(format!("could not unzip: {e}"));
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(invalid)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(invalid)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            StageError::InvalidArchive(format!("entry escapes archive root: {}", entry.name()))
        })?;
        let target = dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| layout_error(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| layout_error(&target, e))?;
        }

        // Checksum and inflate failures surface while reading the entry.
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(|e| {
            StageError::InvalidArchive(format!("could not read {}: {e}", entry.name()))
        })?;
        std::fs::write(&target, &data).map_err(|e| layout_error(&target, e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode & 0o777))?;
        }
    }
    Ok(())
}

/// Paths that clash with earlier entries are the archive's fault, not the disk's.
fn layout_error(target: &Path, e: std::io::Error) -> StageError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::AlreadyExists | ErrorKind::NotADirectory | ErrorKind::IsADirectory => {
            StageError::InvalidArchive(format!("conflicting entry {}: {e}", target.display()))
        }
        _ => StageError::Io(e),
    }
}
