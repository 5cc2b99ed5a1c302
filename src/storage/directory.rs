use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::protocol::UserId;

/// Reject anything that is not a single plain path component.
pub fn validate_filename(name: &str) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidFilename(name.to_string());

    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

/// One user's backup directory.
///
/// Every operation holds the directory lock for its full duration, so a
/// reader never observes a half-written file and two writers never race on
/// the same name.
#[derive(Debug)]
pub struct UserBackupDirectory {
    user_id: UserId,
    path: PathBuf,
    lock: Mutex<()>,
}

impl UserBackupDirectory {
    pub(crate) fn new(user_id: UserId, path: PathBuf) -> Self {
        Self {
            user_id,
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a new file. Existing files are never overwritten.
    pub async fn store(&self, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        let target = self.file_path(filename)?;
        let _guard = self.lock.lock().await;

        fs::create_dir_all(&self.path)
            .await
            .map_err(|source| StorageError::Io {
                path: self.path.clone(),
                source,
            })?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists { path: target });
            }
            Err(source) => return Err(StorageError::Io { path: target, source }),
        };

        let written = async {
            file.write_all(content).await?;
            file.sync_all().await
        }
        .await;

        if let Err(source) = written {
            drop(file);
            if let Err(e) = fs::remove_file(&target).await {
                warn!("Failed to remove partial file {}: {}", target.display(), e);
            }
            return Err(StorageError::Io { path: target, source });
        }

        debug!(
            "Stored {} bytes for user {} at {}",
            content.len(),
            self.user_id,
            target.display()
        );
        Ok(target)
    }

    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.file_path(filename)?;
        let _guard = self.lock.lock().await;

        match fs::read(&target).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::FileNotFound { path: target })
            }
            Err(source) => Err(StorageError::Io { path: target, source }),
        }
    }

    /// Filenames in ascending order
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let _guard = self.lock.lock().await;
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };

        let mut entries = fs::read_dir(&self.path).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            if !entry.file_type().await.map_err(io_err)?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!("Skipping non UTF-8 filename {:?}", raw),
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn delete(&self, filename: &str) -> Result<(), StorageError> {
        let target = self.file_path(filename)?;
        let _guard = self.lock.lock().await;

        match fs::remove_file(&target).await {
            Ok(()) => {
                debug!("Deleted {} for user {}", filename, self.user_id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::FileNotFound { path: target })
            }
            Err(source) => Err(StorageError::DeleteFailed {
                path: target,
                source,
            }),
        }
    }

    fn file_path(&self, filename: &str) -> Result<PathBuf, StorageError> {
        validate_filename(filename)?;
        Ok(self.path.join(filename))
    }
}
