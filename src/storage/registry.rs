use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::directory::{validate_filename, UserBackupDirectory};
use crate::error::StorageError;
use crate::protocol::UserId;

/// Process-wide map from user id to backup directory.
///
/// The map lock is held only to look up or create an entry; file operations
/// run under the per-directory lock. Entries are rebuilt lazily after a
/// restart: a lookup that misses in memory adopts `<root>/<user_id>` if it
/// is already on disk.
#[derive(Debug)]
pub struct BackupRegistry {
    root: PathBuf,
    directories: Mutex<HashMap<UserId, Arc<UserBackupDirectory>>>,
}

impl BackupRegistry {
    /// Creates `root` if it does not exist.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|source| StorageError::Io {
                path: root.clone(),
                source,
            })?;
        info!("Backup root at {}", root.display());

        Ok(Self {
            root,
            directories: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_path(&self, user_id: UserId) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    /// Existing directory for `user_id`, or `UserNotFound`.
    pub async fn get(&self, user_id: UserId) -> Result<Arc<UserBackupDirectory>, StorageError> {
        let mut directories = self.directories.lock().await;
        if let Some(dir) = directories.get(&user_id) {
            return Ok(Arc::clone(dir));
        }

        let path = self.user_path(user_id);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                debug!("Adopting existing directory for user {}", user_id);
                let dir = Arc::new(UserBackupDirectory::new(user_id, path));
                directories.insert(user_id, Arc::clone(&dir));
                Ok(dir)
            }
            Ok(_) => Err(StorageError::UserNotFound(user_id)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::UserNotFound(user_id)),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    /// Directory for `user_id`, created on first use.
    pub async fn get_or_create(
        &self,
        user_id: UserId,
    ) -> Result<Arc<UserBackupDirectory>, StorageError> {
        let mut directories = self.directories.lock().await;
        if let Some(dir) = directories.get(&user_id) {
            return Ok(Arc::clone(dir));
        }

        let path = self.user_path(user_id);
        fs::create_dir_all(&path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
        debug!("Created backup directory for user {}", user_id);

        let dir = Arc::new(UserBackupDirectory::new(user_id, path));
        directories.insert(user_id, Arc::clone(&dir));
        Ok(dir)
    }

    pub async fn store(
        &self,
        user_id: UserId,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        // no directory for a request that can never succeed
        validate_filename(filename)?;
        self.get_or_create(user_id)
            .await?
            .store(filename, content)
            .await
    }

    pub async fn read(&self, user_id: UserId, filename: &str) -> Result<Vec<u8>, StorageError> {
        self.get(user_id).await?.read(filename).await
    }

    pub async fn list(&self, user_id: UserId) -> Result<Vec<String>, StorageError> {
        self.get(user_id).await?.list().await
    }

    pub async fn delete(&self, user_id: UserId, filename: &str) -> Result<(), StorageError> {
        self.get(user_id).await?.delete(filename).await
    }
}
