//! Key/value persistence
//!
//! Sessions and cached account state survive restarts through a small
//! byte-oriented key/value interface. Two backends ship with the crate:
//!
//! - **MemoryStore**: process-local map (testing, ephemeral controllers)
//! - **FileSystemStore**: one file per key under a base directory
//!
//! File names are the SHA-256 of the key, so origins of any length fit the
//! file system's name limit. Each file starts with its key (u32 big-endian
//! length, then UTF-8 bytes) followed by the value.
//!
//! Writes to a single key are atomic: the file store writes a temporary file
//! and renames it over the target, so a crash never leaves a half-written
//! record behind.
//!
//! ## Example
//!
//! ```rust,ignore
//! use controller_core::storage::{FileSystemStore, KeyValueStore};
//!
//! let store = FileSystemStore::new("/var/lib/controller")?;
//! store.set("session:0x534e5f4d41494e:https://game.example", bytes).await?;
//! let record = store.get("session:0x534e5f4d41494e:https://game.example").await?;
//! ```

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Byte-oriented key/value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a value (no-op if absent)
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// File system store, one file per key
#[derive(Debug)]
pub struct FileSystemStore {
    /// Base directory
    base_path: PathBuf,
}

impl FileSystemStore {
    const EXTENSION: &'static str = "kv";

    /// Create a store rooted at `base_path`, creating the directory if needed
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();

        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }

        Ok(Self { base_path })
    }

    /// Base directory of the store
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.base_path
            .join(format!("{}.{}", hex::encode(digest), Self::EXTENSION))
    }
}

const KEY_LEN_BYTES: usize = 4;

fn encode_record(key: &str, value: Vec<u8>) -> Result<Vec<u8>> {
    let key_len = u32::try_from(key.len())
        .map_err(|_| Error::Storage(format!("Key too long: {} bytes", key.len())))?;
    let mut record = Vec::with_capacity(KEY_LEN_BYTES + key.len() + value.len());
    record.extend_from_slice(&key_len.to_be_bytes());
    record.extend_from_slice(key.as_bytes());
    record.extend_from_slice(&value);
    Ok(record)
}

fn decode_record(mut record: Vec<u8>) -> Result<(String, Vec<u8>)> {
    let header: [u8; KEY_LEN_BYTES] = record
        .get(..KEY_LEN_BYTES)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Storage("Truncated record header".into()))?;
    let key_end = KEY_LEN_BYTES + u32::from_be_bytes(header) as usize;
    if record.len() < key_end {
        return Err(Error::Storage("Truncated record key".into()));
    }

    let value = record.split_off(key_end);
    let key = String::from_utf8(record.split_off(KEY_LEN_BYTES))
        .map_err(|e| Error::Storage(format!("Non-UTF-8 record key: {}", e)))?;
    Ok((key, value))
}

#[async_trait]
impl KeyValueStore for FileSystemStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let record = match tokio::fs::read(self.entry_path(key)).await {
            Ok(record) => record,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (stored_key, value) = decode_record(record)?;
        if stored_key != key {
            return Err(Error::Storage(format!(
                "Record for {} holds key {}",
                key, stored_key
            )));
        }
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension(format!("{}.tmp", Self::EXTENSION));

        tokio::fs::write(&tmp, encode_record(key, value)?).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, perms).await?;
        }

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(Self::EXTENSION) {
                continue;
            }
            let (key, _) = decode_record(tokio::fs::read(&path).await?)
                .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
            keys.push(key);
        }

        keys.sort();
        Ok(keys)
    }
}
