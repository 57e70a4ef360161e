#![deny(missing_docs)]
//! Filesystem-backed implementation of clarion's [`BlacklistStore`] trait.
//!
//! Each provider's entries live in one JSON array file under the root.
//! Provider keys are percent-encoded into filenames. Rejections recorded
//! here survive process restarts.

use async_trait::async_trait;
use clarion_types::{BlacklistEntry, BlacklistStore, StorageError};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Filesystem-backed blacklist store.
///
/// Directory layout:
/// ```text
/// root/
///   <url-encoded-provider-key>.json
/// ```
///
/// Writes are serialized within the process and land through a rename,
/// so a reader never observes a half-written file.
pub struct FsBlacklistStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsBlacklistStore {
    /// Create a store rooted at the given directory.
    ///
    /// The directory is created lazily on first write.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, provider_key: &str) -> PathBuf {
        self.root.join(key_to_filename(provider_key))
    }

    async fn read_entries(&self, path: &Path) -> Result<Vec<BlacklistEntry>, StorageError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_entries(
        &self,
        path: &Path,
        entries: &[BlacklistEntry],
    ) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let contents = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Encode a provider key into a safe filename.
fn key_to_filename(key: &str) -> String {
    let mut encoded = String::new();
    for ch in key.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => encoded.push(ch),
            _ => {
                let mut buf = [0u8; 4];
                for byte in ch.encode_utf8(&mut buf).as_bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    format!("{encoded}.json")
}

/// Decode a filename back to a provider key.
fn filename_to_key(filename: &str) -> Option<String> {
    let name = filename.strip_suffix(".json")?;
    let bytes = name.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            result.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(result).ok()
}

#[async_trait]
impl BlacklistStore for FsBlacklistStore {
    async fn get(&self, provider_key: &str) -> Result<Vec<BlacklistEntry>, StorageError> {
        self.read_entries(&self.path_for(provider_key)).await
    }

    async fn put(&self, entry: BlacklistEntry) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(&entry.provider_key);
        let mut entries = self.read_entries(&path).await?;
        if entries.iter().any(|existing| existing.same_key(&entry)) {
            return Ok(false);
        }
        entries.push(entry);
        self.write_entries(&path, &entries).await?;
        Ok(true)
    }

    async fn clear(&self, provider_key: Option<&str>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        if let Some(key) = provider_key {
            return match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(file) = dir.next_entry().await? {
            let name = file.file_name();
            if let Some(name) = name.to_str()
                && filename_to_key(name).is_some()
            {
                tracing::debug!(file = name, "removing blacklist file");
                tokio::fs::remove_file(file.path()).await?;
            }
        }
        Ok(())
    }
}
