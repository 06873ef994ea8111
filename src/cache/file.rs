//! File Driver Module
//!
//! One file per key under a base directory. Each file holds a bincode record
//! with the JSON-encoded value and its expiration. Unreadable or corrupt
//! files read as misses; a janitor removes expired files in the background.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{current_timestamp_ms, CacheEntry, CacheStats, Counters, Driver, Ttl};
use crate::config::FileConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{Janitor, Sweep};

const ENTRY_EXTENSION: &str = "cache";
const TEMP_EXTENSION: &str = "tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// == File Record ==
/// On-disk form of an entry. Private to this driver and not versioned.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    payload: Vec<u8>,
    expires_at: Option<u64>,
    created_at: u64,
}

impl FileRecord {
    fn encode(entry: &CacheEntry) -> Result<Vec<u8>> {
        let record = FileRecord {
            payload: serde_json::to_vec(&entry.value)
                .map_err(|e| CacheError::Serialization(e.to_string()))?,
            expires_at: entry.expires_at,
            created_at: entry.created_at,
        };
        bincode::serialize(&record).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> std::result::Result<CacheEntry, String> {
        let record: FileRecord = bincode::deserialize(bytes).map_err(|e| e.to_string())?;
        let value = serde_json::from_slice(&record.payload).map_err(|e| e.to_string())?;
        Ok(CacheEntry {
            value,
            created_at: record.created_at,
            expires_at: record.expires_at,
        })
    }
}

// == Key Validation ==
/// Rejects keys that cannot be stored safely on a filesystem.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::invalid_key(key, "key must not be empty"));
    }
    if key.contains('\0') {
        return Err(CacheError::invalid_key(key, "key must not contain NUL bytes"));
    }
    Ok(())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}

// == File Store ==
/// Directory state shared between the driver and its janitor.
///
/// Writers hold `unlink` shared while renaming into place. Expiry-driven
/// removal holds it exclusively and re-reads the file first, so it never
/// deletes a fresh entry written after the expired one was seen.
#[derive(Debug)]
struct FileStore {
    dir: PathBuf,
    counters: Counters,
    unlink: RwLock<()>,
}

impl FileStore {
    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{:x}.{}", digest, ENTRY_EXTENSION))
    }

    /// Reads and decodes an entry file. Every failure reads as `None`.
    async fn load(&self, path: &Path) -> Option<CacheEntry> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                debug!("Unreadable cache file {}: {}", path.display(), e);
                return None;
            }
        };

        match FileRecord::decode(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                self.counters.record_corrupt();
                debug!("Corrupt cache file {} treated as miss: {}", path.display(), e);
                None
            }
        }
    }

    /// Writes through a temp file and renames it into place.
    async fn store(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let _shared = self.unlink.read().await;
        let temp = path.with_extension(format!(
            "{}.{}.{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed),
            TEMP_EXTENSION
        ));

        if let Err(e) = fs::write(&temp, bytes).await {
            return Err(CacheError::io(temp, e));
        }
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }

    /// Removes `path` if it still holds an expired entry.
    ///
    /// Returns the entry when a writer replaced it with a live one.
    async fn evict_expired(&self, path: &Path) -> Option<CacheEntry> {
        let _exclusive = self.unlink.write().await;

        let entry = self.load(path).await?;
        if !entry.is_expired() {
            return Some(entry);
        }
        if let Err(e) = self.remove(path).await {
            debug!("Could not evict expired {}: {}", path.display(), e);
        }
        None
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    async fn read_dir(&self) -> Result<fs::ReadDir> {
        fs::read_dir(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, e))
    }

    /// Lists the entry files currently in the directory.
    async fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut dir = self.read_dir().await?;
        let mut files = Vec::new();

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?
        {
            let path = item.path();
            if has_extension(&path, ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl Sweep for FileStore {
    fn label(&self) -> &'static str {
        "file"
    }

    /// Skips files that cannot be read, decoded or removed.
    async fn sweep(&self) -> Result<usize> {
        let _exclusive = self.unlink.write().await;
        let now = current_timestamp_ms();
        let mut removed = 0;

        for path in self.entry_files().await? {
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Cleanup skipped unreadable {}: {}", path.display(), e);
                    continue;
                }
            };
            let Ok(entry) = FileRecord::decode(&bytes) else {
                debug!("Cleanup skipped undecodable {}", path.display());
                continue;
            };
            if !entry.is_expired_at(now) {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Cleanup could not remove {}: {}", path.display(), e),
            }
        }

        Ok(removed)
    }
}

// == File Driver ==
/// Filesystem-backed cache driver.
#[derive(Debug)]
pub struct FileDriver {
    store: Arc<FileStore>,
    default_expiration: Duration,
    cleanup_interval: Duration,
    janitor: Mutex<Option<Janitor>>,
}

impl FileDriver {
    // == Constructor ==
    /// Creates a file driver rooted at `dir`, creating the directory if needed.
    ///
    /// The janitor is only started when called inside a tokio runtime.
    pub fn new(
        dir: impl Into<PathBuf>,
        default_expiration: Duration,
        cleanup_interval: Duration,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let store = Arc::new(FileStore {
            dir,
            counters: Counters::new(),
            unlink: RwLock::new(()),
        });
        let janitor = Janitor::spawn(&store, cleanup_interval);

        info!(
            "File cache initialized at {}: default_expiration={:?}, cleanup_interval={:?}",
            store.dir.display(),
            default_expiration,
            cleanup_interval
        );

        Ok(Self {
            store,
            default_expiration,
            cleanup_interval,
            janitor: Mutex::new(janitor),
        })
    }

    /// Creates a file driver from its configuration section.
    pub fn from_config(config: &FileConfig) -> Result<Self> {
        Self::new(
            config.path.clone(),
            config.default_ttl(),
            config.cleanup_interval(),
        )
    }

    /// Base directory holding the entry files.
    pub fn dir(&self) -> &Path {
        &self.store.dir
    }

    /// Location of the file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.store.path_for(key)
    }

    /// Runs one cleanup pass immediately, returning how many files were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.store.sweep().await
    }
}

#[async_trait]
impl Driver for FileDriver {
    fn driver_type(&self) -> &'static str {
        "file"
    }

    // == Get ==
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.store.path_for(key);

        let entry = match self.store.load(&path).await {
            Some(entry) if entry.is_expired() => self.store.evict_expired(&path).await,
            other => other,
        };

        self.store.counters.record(entry.is_some());
        Ok(entry.map(|entry| entry.value))
    }

    // == Set ==
    async fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        validate_key(key)?;

        let entry = CacheEntry::new(value, ttl.resolve(self.default_expiration));
        let bytes = FileRecord::encode(&entry)?;
        self.store.store(&self.store.path_for(key), &bytes).await
    }

    // == Delete ==
    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.store.remove(&self.store.path_for(key)).await
    }

    /// Removes every file in the directory.
    ///
    /// Keeps going past files it cannot remove and reports the first failure.
    async fn flush(&self) -> Result<()> {
        let mut dir = self.store.read_dir().await?;
        let mut first_error = None;
        let mut failed = 0usize;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.store.dir, e))?
        {
            let path = item.path();
            if item.file_type().await.is_ok_and(|t| t.is_dir()) {
                continue;
            }
            if let Err(e) = self.store.remove(&path).await {
                failed += 1;
                warn!("Flush could not remove {}: {}", path.display(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                warn!("Flush left {} files behind", failed);
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Writes keys one at a time and stops at the first failure.
    async fn set_multiple(&self, values: HashMap<String, Value>, ttl: Ttl) -> Result<()> {
        for key in values.keys() {
            validate_key(key)?;
        }
        for (key, value) in values {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    // == Stats ==
    async fn stats(&self) -> Result<CacheStats> {
        let count = self.store.entry_files().await?.len() as u64;
        Ok(self
            .store
            .counters
            .snapshot(self.driver_type(), count)
            .with_detail("path", self.store.dir.display().to_string())
            .with_detail("corrupt", self.store.counters.corrupt())
            .with_detail("default_expiration_ms", self.default_expiration.as_millis() as u64)
            .with_detail("cleanup_interval_ms", self.cleanup_interval.as_millis() as u64))
    }

    async fn close(&self) -> Result<()> {
        if let Some(janitor) = self.janitor.lock().await.take() {
            janitor.stop().await;
            info!("File cache at {} closed", self.store.dir.display());
        }
        Ok(())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn driver(dir: &TempDir) -> FileDriver {
        FileDriver::new(dir.path(), Duration::from_secs(300), Duration::ZERO).unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        cache.set("user.1", json!({"name": "ada"}), Ttl::Default).await.unwrap();

        assert_eq!(cache.get("user.1").await.unwrap(), Some(json!({"name": "ada"})));
        assert!(cache.path_for("user.1").exists());
    }

    #[tokio::test]
    async fn test_path_is_deterministic_and_contained() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        let path = cache.path_for("../../etc/passwd");
        assert_eq!(path, cache.path_for("../../etc/passwd"));
        assert_eq!(path.parent().unwrap(), dir.path());
        assert_ne!(path, cache.path_for("other"));
    }

    #[tokio::test]
    async fn test_nul_key_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        let set = cache.set("bad\0key", json!(1), Ttl::Default).await;
        assert!(matches!(set, Err(CacheError::InvalidKey { .. })));
        let delete = cache.delete("bad\0key").await;
        assert!(matches!(delete, Err(CacheError::InvalidKey { .. })));
        assert!(cache.set("", json!(1), Ttl::Default).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_miss() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        std::fs::write(cache.path_for("broken"), b"definitely not a record").unwrap();

        assert_eq!(cache.get("broken").await.unwrap(), None);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.details["corrupt"], json!(1));
    }

    #[tokio::test]
    async fn test_expired_file_removed_on_read() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        cache
            .set("short", json!("v"), Ttl::After(Duration::from_millis(50)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert!(!cache.path_for("short").exists());
    }

    #[tokio::test]
    async fn test_purge_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        cache
            .set("short", json!("v"), Ttl::After(Duration::from_millis(20)))
            .await
            .unwrap();
        cache.set("long", json!("v"), Ttl::Forever).await.unwrap();
        std::fs::write(cache.path_for("junk"), [0u8; 3]).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.path_for("junk").exists());
        assert!(cache.path_for("long").exists());
    }

    #[tokio::test]
    async fn test_janitor_removes_expired_files() {
        let dir = TempDir::new().unwrap();
        let cache =
            FileDriver::new(dir.path(), Duration::from_secs(300), Duration::from_millis(30))
                .unwrap();

        cache
            .set("short", json!("v"), Ttl::After(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!cache.path_for("short").exists());
        cache.close().await.unwrap();
        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_removes_everything() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        cache.set("a", json!(1), Ttl::Default).await.unwrap();
        cache.set("b", json!(2), Ttl::Default).await.unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        cache.flush().await.unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(cache.stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_flush_missing_directory_is_error() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        std::fs::remove_dir_all(dir.path()).unwrap();

        assert!(matches!(cache.flush().await, Err(CacheError::Io { .. })));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);
        assert!(cache.delete("never-set").await.is_ok());
    }

    #[tokio::test]
    async fn test_set_multiple_rejects_bad_key_before_writing() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);
        let values: HashMap<String, Value> = [
            ("good".to_string(), json!(1)),
            ("bad\0".to_string(), json!(2)),
        ]
        .into_iter()
        .collect();

        assert!(cache.set_multiple(values, Ttl::Default).await.is_err());
        assert!(!cache.path_for("good").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_eviction_never_removes_a_fresh_write() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(driver(&dir));
        let mut lost = 0;

        for _ in 0..300 {
            cache
                .set("k", json!("old"), Ttl::After(Duration::from_millis(1)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(3)).await;

            let reader = {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get("k").await })
            };
            let writer = {
                let cache = cache.clone();
                tokio::spawn(async move { cache.set("k", json!("fresh"), Ttl::Forever).await })
            };
            reader.await.unwrap().unwrap();
            writer.await.unwrap().unwrap();

            if cache.get("k").await.unwrap() != Some(json!("fresh")) {
                lost += 1;
            }
        }

        assert_eq!(lost, 0);
    }

    /// Makes `dir` read-only, or returns false when the process can still
    /// write into it (running as root).
    #[cfg(unix)]
    fn make_read_only(dir: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;

        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o555)).unwrap();
        let check = dir.join("writable.check");
        if std::fs::write(&check, b"x").is_ok() {
            let _ = std::fs::remove_file(&check);
            restore_permissions(dir);
            return false;
        }
        true
    }

    #[cfg(unix)]
    fn restore_permissions(dir: &Path) {
        use std::os::unix::fs::PermissionsExt;

        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_flush_reports_unremovable_files() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        cache.set("a", json!(1), Ttl::Default).await.unwrap();
        cache.set("b", json!(2), Ttl::Default).await.unwrap();
        if !make_read_only(dir.path()) {
            return;
        }

        let result = cache.flush().await;
        restore_permissions(dir.path());

        assert!(matches!(result, Err(CacheError::Io { .. })));
        assert!(cache.path_for("a").exists());
        assert!(cache.path_for("b").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_purge_skips_unremovable_files() {
        let dir = TempDir::new().unwrap();
        let cache = driver(&dir);

        cache
            .set("a", json!(1), Ttl::After(Duration::from_millis(10)))
            .await
            .unwrap();
        cache
            .set("b", json!(2), Ttl::After(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        if !make_read_only(dir.path()) {
            return;
        }

        let purged = cache.purge_expired().await;
        restore_permissions(dir.path());

        assert_eq!(purged.unwrap(), 0);
        assert!(cache.path_for("a").exists());
        assert_eq!(cache.purge_expired().await.unwrap(), 2);
    }
}
