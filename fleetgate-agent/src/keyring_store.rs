//! Keyring persistence.
//!
//! One JSON file per cluster under the agent data directory, readable by the
//! owner only.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fleetgate_auth::Keyring;
use fleetgate_core::ClusterId;

const KEYRING_DIR: &str = "keyrings";

/// Persistent store for admitted cluster keyrings.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    dir: PathBuf,
}

impl KeyringStore {
    /// Store rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join(KEYRING_DIR),
        }
    }

    /// Store under the platform data directory.
    pub fn open_default() -> Result<Self, KeyringStoreError> {
        Ok(Self::new(default_data_dir()?))
    }

    pub fn path_for(&self, cluster_id: &ClusterId) -> PathBuf {
        self.dir.join(format!("{}.json", cluster_id))
    }

    /// Write `keyring`, replacing any previous one for the cluster.
    pub fn save(&self, cluster_id: &ClusterId, keyring: &Keyring) -> Result<PathBuf, KeyringStoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(cluster_id);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_vec_pretty(keyring)?;
        // A leftover from an interrupted save may carry other permissions
        match std::fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut file = owner_only().open(&tmp)?;
        file.write_all(&content)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(path = %path.display(), "Keyring saved");
        Ok(path)
    }

    pub fn load(&self, cluster_id: &ClusterId) -> Result<Option<Keyring>, KeyringStoreError> {
        let path = self.path_for(cluster_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&content)?))
    }
}

/// Options for a new file that is never readable by anyone but the owner.
fn owner_only() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

/// Default agent data directory.
pub fn default_data_dir() -> Result<PathBuf, KeyringStoreError> {
    let dirs = directories::ProjectDirs::from("dev", "fleetgate", "fleetgate-agent")
        .ok_or(KeyringStoreError::NoDataDir)?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Errors that can occur while persisting keyrings.
#[derive(Debug, thiserror::Error)]
pub enum KeyringStoreError {
    #[error("could not determine data directory")]
    NoDataDir,
    #[error("keyring file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("keyring encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_auth::{EphemeralExchange, HashAlgorithm, Pin, Side};

    fn keyring() -> Keyring {
        let agent = EphemeralExchange::generate();
        let gateway = EphemeralExchange::generate();
        let keys = agent.complete(Side::Client, &gateway.public_key()).unwrap();
        Keyring::new(keys, vec![Pin::for_spki(HashAlgorithm::Sha256, b"spki")])
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyringStore::new(dir.path());
        let id = ClusterId::new("edge-1").unwrap();
        let keyring = keyring();

        assert!(store.load(&id).unwrap().is_none());
        let path = store.save(&id, &keyring).unwrap();

        assert_eq!(store.load(&id).unwrap(), Some(keyring));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_temp_file_does_not_widen_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = KeyringStore::new(dir.path());
        let id = ClusterId::new("edge-1").unwrap();

        std::fs::create_dir_all(dir.path().join(KEYRING_DIR)).unwrap();
        let tmp = store.path_for(&id).with_extension("json.tmp");
        std::fs::write(&tmp, b"stale").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        let path = store.save(&id, &keyring()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!tmp.exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyringStore::new(dir.path());
        let id = ClusterId::new("edge-1").unwrap();

        std::fs::create_dir_all(dir.path().join(KEYRING_DIR)).unwrap();
        std::fs::write(store.path_for(&id), b"{not json").unwrap();

        assert!(matches!(store.load(&id), Err(KeyringStoreError::Encoding(_))));
    }
}
