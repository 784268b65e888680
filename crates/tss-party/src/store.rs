//! Key shares on disk
//!
//! One JSON file per share: `{dest}/keyshare.{party}.{public_key}.json`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tss_core::{KeyShare, KeyShareStore};

pub struct FileKeyShareStore {
    dir: PathBuf,
    party: String,
}

impl FileKeyShareStore {
    pub fn new(dir: &Path, party: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            party: party.to_string(),
        })
    }

    fn path(&self, public_key: &str) -> PathBuf {
        self.dir
            .join(format!("keyshare.{}.{}.json", self.party, public_key))
    }

    pub fn load(&self, public_key: &str) -> Result<KeyShare> {
        let path = self.path(public_key);
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, share: &KeyShare) -> Result<PathBuf> {
        let path = self.path(&share.public_key);
        std::fs::write(&path, serde_json::to_string_pretty(share)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Every share stored for this party
    pub fn list(&self) -> Result<Vec<KeyShare>> {
        let prefix = format!("keyshare.{}.", self.party);
        let mut shares = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(public_key) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                shares.push(self.load(public_key)?);
            }
        }
        Ok(shares)
    }
}

impl KeyShareStore for FileKeyShareStore {
    fn key_share(&self, public_key: &str) -> Option<Vec<u8>> {
        self.load(public_key).ok().map(|share| share.share.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_lookup() {
        let dir = std::env::temp_dir().join(format!("tss-party-{}", uuid::Uuid::new_v4()));
        let store = FileKeyShareStore::new(&dir, "alice").unwrap();
        let share = KeyShare {
            public_key: "02aa".into(),
            chain_code: Some("00".repeat(32)),
            share: vec![1, 2, 3],
        };
        store.save(&share).unwrap();

        assert_eq!(store.key_share("02aa"), Some(vec![1, 2, 3]));
        assert_eq!(store.key_share("02bb"), None);
        assert_eq!(store.list().unwrap().len(), 1);

        let other = FileKeyShareStore::new(&dir, "bob").unwrap();
        assert!(other.list().unwrap().is_empty());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
