//! Directory-backed storage: one JSON file per key
//!
//! Keys are escaped into file names so any string is a valid key. The
//! escaping is applied byte by byte, which keeps key prefixes aligned with
//! file-name prefixes. Keys whose escaped form would exceed file-name limits
//! are stored under a SHA-256 name instead, with the key kept inside the file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::warn;

use super::{Storage, StorageError};

const FILE_SUFFIX: &str = ".json";

/// Longest escaped key used directly as a file name; leaves room for the
/// temp-file suffix under the usual 255-byte limit
const MAX_ESCAPED_LEN: usize = 200;

/// Separates the namespace from the digest in hashed names. Escaped keys
/// never contain it.
const HASH_SEPARATOR: char = '.';

/// File body for keys stored under a hashed name
#[derive(Debug, Serialize, Deserialize)]
struct HashedEntry {
    key: String,
    value: Value,
}

/// Persists each key as `<escaped key>.json` inside a directory
///
/// Writes go to a uniquely named temp file that is then renamed over the
/// target, so a reader never observes a half-written value.
#[derive(Debug)]
pub struct FileStorage {
    /// Directory where value files are stored
    dir: PathBuf,
    /// Disambiguates concurrent temp files
    write_seq: AtomicU64,
}

impl FileStorage {
    /// Creates a FileStorage in the XDG data directory
    ///
    /// Uses `~/.local/share/quotecache/` on Linux, or the platform equivalent.
    /// Returns `None` if no home directory can be determined.
    pub fn new() -> Option<Self> {
        Self::default_dir().map(Self::with_dir)
    }

    /// Creates a FileStorage rooted at `dir`
    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            dir,
            write_seq: AtomicU64::new(0),
        }
    }

    /// The platform data directory used by [`FileStorage::new`]
    pub fn default_dir() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "quotecache")?;
        Some(project_dirs.data_dir().to_path_buf())
    }

    fn path_for(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}{}", stem, FILE_SUFFIX))
    }

    /// Reads the key recorded inside a hashed-name file
    async fn hashed_key(path: &Path) -> Option<String> {
        let content = fs::read_to_string(path).await.ok()?;
        match serde_json::from_str::<HashedEntry>(&content) {
            Ok(entry) => Some(entry.key),
            Err(err) => {
                warn!(file = %path.display(), error = %err, "skipping unreadable hashed entry");
                None
            }
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let stem = file_stem(key);
        let content = match fs::read_to_string(self.path_for(&stem)).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let parsed = if is_hashed(&stem) {
            serde_json::from_str::<HashedEntry>(&content)
                .map(|entry| (entry.key == key).then_some(entry.value))
        } else {
            serde_json::from_str(&content).map(Some)
        };
        match parsed {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(key, error = %err, "ignoring unreadable stored value");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;

        let stem = file_stem(key);
        let json = if is_hashed(&stem) {
            serde_json::to_string_pretty(&HashedEntry {
                key: key.to_string(),
                value: value.clone(),
            })?
        } else {
            serde_json::to_string_pretty(value)?
        };
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!("{}.{}.{}.tmp", stem, std::process::id(), seq));

        fs::write(&tmp, json).await?;
        if let Err(err) = fs::rename(&tmp, self.path_for(&stem)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(&file_stem(key))).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(FILE_SUFFIX) else { continue };
            let key = if is_hashed(stem) {
                Self::hashed_key(&entry.path()).await
            } else {
                decode_key(stem)
            };
            match key {
                Some(key) => keys.push(key),
                None => warn!(file = name, "skipping file with undecodable name"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// File name (without suffix) for `key`
///
/// Short keys are escaped; long ones become `<escaped namespace>.<sha256>`,
/// where the namespace is everything up to the first `:`.
fn file_stem(key: &str) -> String {
    let escaped = encode_key(key);
    if escaped.len() <= MAX_ESCAPED_LEN {
        return escaped;
    }
    let namespace = key
        .find(':')
        .map(|end| encode_key(&key[..=end]))
        .filter(|namespace| namespace.len() <= MAX_ESCAPED_LEN / 4)
        .unwrap_or_default();
    let digest = Sha256::digest(key.as_bytes());
    format!("{}{}{}", namespace, HASH_SEPARATOR, hex::encode(digest))
}

fn is_hashed(stem: &str) -> bool {
    stem.contains(HASH_SEPARATOR)
}

/// Escapes a key into a file-name-safe form
///
/// ASCII alphanumerics and `-` pass through; every other byte becomes `_XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let raw = name.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'_' {
            let hex = name.get(i + 1..i + 3)?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_storage() -> (FileStorage, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = FileStorage::with_dir(temp_dir.path().to_path_buf());
        (storage, temp_dir)
    }

    #[test]
    fn test_key_escaping_is_reversible() {
        for key in ["credential", "cache:companyOverview?symbol=IBM", "a_b/c d", "ключ"] {
            let encoded = encode_key(key);
            assert!(encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
    }

    #[test]
    fn test_key_escaping_preserves_prefixes() {
        let prefix = encode_key("cache:");
        assert!(encode_key("cache:dailyTimeSeries?symbol=IBM").starts_with(&prefix));
        assert!(!encode_key("cachex").starts_with(&prefix));
    }

    #[tokio::test]
    async fn test_set_creates_file_in_directory() {
        let (storage, temp_dir) = create_test_storage();

        storage
            .set("credential", &json!("demo"))
            .await
            .expect("Write should succeed");

        let expected_path = temp_dir.path().join("credential.json");
        assert!(expected_path.exists(), "Value file should exist");
    }

    #[tokio::test]
    async fn test_get_returns_none_for_missing_key() {
        let (storage, _temp_dir) = create_test_storage();

        assert_eq!(storage.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested = temp_dir.path().join("nested").join("state");
        let storage = FileStorage::with_dir(nested.clone());

        storage.set("k", &json!(1)).await.expect("Write should succeed");

        assert!(nested.exists(), "Nested directory should be created");
    }

    #[tokio::test]
    async fn test_overwrite_existing_value() {
        let (storage, _temp_dir) = create_test_storage();

        storage.set("k", &json!({"v": 1})).await.unwrap();
        storage.set("k", &json!({"v": 2})).await.unwrap();

        assert_eq!(storage.get("k").await.unwrap(), Some(json!({"v": 2})));
    }

    #[tokio::test]
    async fn test_values_survive_reopening() {
        let (storage, temp_dir) = create_test_storage();
        storage.set("cache:x", &json!([1, 2, 3])).await.unwrap();
        drop(storage);

        let reopened = FileStorage::with_dir(temp_dir.path().to_path_buf());

        assert_eq!(reopened.get("cache:x").await.unwrap(), Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_absent() {
        let (storage, temp_dir) = create_test_storage();
        std::fs::write(temp_dir.path().join("broken.json"), "{not json").unwrap();

        assert_eq!(storage.get("broken").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_and_prefix_removal() {
        let (storage, temp_dir) = create_test_storage();
        storage.set("cache:a?s=1", &json!(1)).await.unwrap();
        storage.set("cache:b", &json!(2)).await.unwrap();
        storage.set("credential", &json!("demo")).await.unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "unrelated").unwrap();

        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["cache:a?s=1", "cache:b", "credential"]
        );

        let removed = storage.remove_by_prefix("cache:").await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(storage.keys().await.unwrap(), vec!["credential"]);
        assert!(temp_dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_keys_of_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::with_dir(temp_dir.path().join("never-created"));

        assert!(storage.keys().await.unwrap().is_empty());
        storage.remove("anything").await.unwrap();
    }

    #[test]
    fn test_default_dir_is_project_scoped() {
        if let Some(dir) = FileStorage::default_dir() {
            assert!(dir.to_string_lossy().contains("quotecache"));
        }
        // Passes when no home directory is available (e.g., in CI)
    }

    fn long_search_key() -> String {
        format!("cache:tickerSearch?keywords={}", "トヨタ自動車株式会社".repeat(5))
    }

    #[test]
    fn test_long_key_gets_bounded_hashed_name() {
        let key = long_search_key();
        let stem = file_stem(&key);

        assert!(encode_key(&key).len() > 255);
        assert!(stem.len() + FILE_SUFFIX.len() < 255);
        assert!(stem.starts_with(&encode_key("cache:")));
        assert!(is_hashed(&stem));
        assert_eq!(stem, file_stem(&key));
        assert!(!is_hashed(&file_stem("cache:companyOverview?symbol=IBM")));
    }

    #[tokio::test]
    async fn test_long_key_roundtrip_and_prefix_removal() {
        let (storage, temp_dir) = create_test_storage();
        let key = long_search_key();

        storage.set(&key, &json!({"bestMatches": []})).await.unwrap();
        storage.set("credential", &json!("demo")).await.unwrap();

        assert_eq!(storage.get(&key).await.unwrap(), Some(json!({"bestMatches": []})));
        assert_eq!(storage.keys().await.unwrap(), vec![key.clone(), "credential".to_string()]);
        let written = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(written, 2, "no temp files left behind");

        assert_eq!(storage.remove_by_prefix("cache:").await.unwrap(), 1);
        assert_eq!(storage.get(&key).await.unwrap(), None);
        assert_eq!(storage.keys().await.unwrap(), vec!["credential"]);
    }
}
