use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::{Result, SessionError};
use crate::store::CredentialStore;
use crate::tokens::Tokens;

const SESSION_FILE: &str = "session.json";
const LOCK_FILE: &str = "lock";

/// On-disk layout: the two credentials under stable keys
#[derive(Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh: Option<String>,
}

/// File-based credential store
///
/// # Directory Structure
/// ```text
/// ~/.config/sessiongate/
/// ├── lock               # Advisory lock file
/// └── session.json       # {"access": "...", "refresh": "..."}
/// ```
///
/// A file that lacks either key loads as "no session".
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    session_file: PathBuf,
    lock_file: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at `storage_dir`, creating the directory if needed
    pub async fn new(storage_dir: impl AsRef<Path>) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        fs::create_dir_all(&storage_dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&storage_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(Self {
            session_file: storage_dir.join(SESSION_FILE),
            lock_file: storage_dir.join(LOCK_FILE),
        })
    }

    /// Get default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("", "", "sessiongate").ok_or_else(|| {
            SessionError::Storage("Could not determine config directory".to_string())
        })?;

        Ok(project_dirs.config_dir().to_path_buf())
    }

    pub fn session_file(&self) -> &Path {
        &self.session_file
    }

    /// Acquire an exclusive lock on the storage
    fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| SessionError::LockTimeout)?;

        Ok(lock_file)
    }

    fn temp_file(&self) -> PathBuf {
        self.session_file.with_extension("tmp")
    }

    async fn write_atomically(&self, contents: Vec<u8>) -> Result<()> {
        let temp_path = self.temp_file();
        let mut file = create_private(&temp_path).await?;
        file.write_all(&contents).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.session_file).await?;
        Ok(())
    }
}

/// Open `path` for writing with owner-only permissions from the moment it exists
async fn create_private(path: &Path) -> Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let file = options.open(path).await?;

    // A leftover file keeps whatever mode it was created with
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }

    Ok(file)
}

#[async_trait::async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Tokens>> {
        let content = match fs::read(&self.session_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let persisted: PersistedSession = serde_json::from_slice(&content)
            .map_err(|e| SessionError::Storage(format!("Invalid session file: {}", e)))?;

        match (persisted.access, persisted.refresh) {
            (Some(access), Some(refresh)) => Ok(Some(Tokens::new(access, refresh))),
            _ => {
                warn!(
                    "Session file {} is missing a credential, ignoring it",
                    self.session_file.display()
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, tokens: &Tokens) -> Result<()> {
        let _lock = self.acquire_lock()?;

        let persisted = PersistedSession {
            access: Some(tokens.access().to_string()),
            refresh: Some(tokens.refresh().to_string()),
        };
        let contents = serde_json::to_vec_pretty(&persisted)?;
        self.write_atomically(contents).await?;

        debug!("Persisted session to {}", self.session_file.display());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _lock = self.acquire_lock()?;

        match fs::remove_file(&self.session_file).await {
            Ok(()) => {
                debug!("Removed session file {}", self.session_file.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
