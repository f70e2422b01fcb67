//! JSON-file credential store.
//!
//! One JSON object per file, keyed by bare user address. Writes go through
//! an atomic rename so a crash never leaves a half-written store behind.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use jid::BareJid;
use tracing::{debug, info};

use causeway_session::{CredentialStore, StoreError, StoredCredential};

pub struct FileStore {
    path: PathBuf,
    records: Mutex<HashMap<String, StoredCredential>>,
}

impl FileStore {
    /// Open (or create) the store file. A present but undecodable file is a
    /// fatal [`StoreError::Corrupt`]; startup must not silently wipe
    /// registrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let records = match fs::read_to_string(path) {
            Ok(text) => {
                serde_json::from_str(&text).map_err(|e| StoreError::Corrupt(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };
        info!(path = %path.display(), "Opened credential store");
        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    /// Write the whole map out through a temporary file.
    fn persist(&self, records: &HashMap<String, StoredCredential>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let text =
            serde_json::to_string_pretty(records).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), count = records.len(), "Persisted credential store");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredCredential>> {
        self.records.lock().expect("credential store lock poisoned")
    }
}

impl CredentialStore for FileStore {
    fn get(&self, user: &BareJid) -> Result<Option<StoredCredential>, StoreError> {
        Ok(self.lock().get(&user.to_string()).cloned())
    }

    fn set(&self, user: &BareJid, credential: &StoredCredential) -> Result<(), StoreError> {
        let mut records = self.lock();
        records.insert(user.to_string(), credential.clone());
        self.persist(&records)
    }

    fn remove(&self, user: &BareJid) -> Result<bool, StoreError> {
        let mut records = self.lock();
        let removed = records.remove(&user.to_string()).is_some();
        if removed {
            self.persist(&records)?;
        }
        Ok(removed)
    }

    fn contains(&self, user: &BareJid) -> Result<bool, StoreError> {
        Ok(self.lock().contains_key(&user.to_string()))
    }

    fn flush(&self) -> Result<(), StoreError> {
        let records = self.lock();
        self.persist(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> BareJid {
        "someone@example.com".parse().unwrap()
    }

    #[test]
    fn records_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileStore::open(&path).unwrap();
        store
            .set(&user(), &StoredCredential::new("https://signin.example", "T"))
            .unwrap();
        store.flush().unwrap();
        drop(store);

        let store = FileStore::open(&path).unwrap();
        let credential = store.get(&user()).unwrap().unwrap();
        assert_eq!(credential.url, "https://signin.example");
        assert_eq!(credential.auth_token, "T");
    }

    #[test]
    fn remove_deletes_durably() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileStore::open(&path).unwrap();
        store
            .set(&user(), &StoredCredential::new("u", "t"))
            .unwrap();
        assert!(store.remove(&user()).unwrap());
        assert!(!store.remove(&user()).unwrap());
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert!(!store.contains(&user()).unwrap());
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::open(&path).unwrap();
        assert!(!store.contains(&user()).unwrap());
    }
}
