//! Durable JSON cache with a time-to-live.
//!
//! Each dialect owns a directory under the cache root holding one JSON
//! document per slot (`servers.json`, `schemas.json`). Reads take no lock
//! and treat anything missing, corrupt or stale as a miss. Writes go through
//! one mutex shared by every slot and replace the target file atomically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::models::{CachedServers, Dialect, SchemaCacheMap};
use common::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Time source for TTL checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A document stored in a cache slot.
pub trait CacheDocument: Serialize + DeserializeOwned {
    /// Document-wide timestamp. `None` means freshness is tracked per entry.
    fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl CacheDocument for CachedServers {
    fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        Some(self.timestamp_utc)
    }
}

impl CacheDocument for SchemaCacheMap {}

/// TTL-bounded, lock-protected JSON cache for one dialect.
#[derive(Clone)]
pub struct CacheManager {
    dir: PathBuf,
    ttl: Duration,
    write_lock: Arc<Mutex<()>>,
    clock: Clock,
}

impl CacheManager {
    /// Creates a cache rooted at `<root>/<dialect>`.
    pub fn new(root: impl AsRef<Path>, dialect: Dialect, ttl: Duration) -> Self {
        Self {
            dir: root.as_ref().join(dialect.as_str()),
            ttl,
            write_lock: Arc::new(Mutex::new(())),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Whether something stamped at `stamped` is still within the TTL.
    pub fn is_fresh(&self, stamped: DateTime<Utc>) -> bool {
        self.now() - stamped < self.ttl
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Reads a slot, returning `None` on a miss.
    ///
    /// Missing and corrupt files are misses. A document whose timestamp is
    /// at least one TTL old is a miss.
    pub async fn load<T: CacheDocument>(&self, file: &str) -> Option<T> {
        let document: T = self.read(file).await?;
        match document.timestamp_utc() {
            Some(stamped) if !self.is_fresh(stamped) => {
                tracing::debug!(file, stamped = %stamped, "Cache entry expired");
                None
            }
            _ => Some(document),
        }
    }

    /// Atomically replaces a slot with `value`.
    ///
    /// # Errors
    /// `AppError::Cache` if the directory cannot be created or the file
    /// cannot be written.
    pub async fn save_and_replace<T: Serialize>(&self, file: &str, value: &T) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write(file, value).await
    }

    /// Locked read-modify-write of a slot. Returns the document written.
    ///
    /// `f` receives the current document, or `None` when the slot is
    /// missing or corrupt. No TTL is applied to what `f` sees.
    ///
    /// # Errors
    /// `AppError::Cache` if the new document cannot be written.
    pub async fn update<T, F>(&self, file: &str, f: F) -> AppResult<T>
    where
        T: CacheDocument,
        F: FnOnce(Option<T>) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let current = self.read(file).await;
        let next = f(current);
        self.write(file, &next).await?;
        Ok(next)
    }

    async fn read<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        let path = self.path(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cache read failed");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(document) => Some(document),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt cache file");
                None
            }
        }
    }

    /// Writes to a uniquely named temp file, then renames it over the target.
    async fn write<T: Serialize>(&self, file: &str, value: &T) -> AppResult<()> {
        let path = self.path(file);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::cache(&self.dir, e))?;

        let json = serde_json::to_vec_pretty(value).map_err(|e| AppError::cache(&path, e))?;
        let temp = self.dir.join(format!("{}.{}.tmp", file, Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&temp, &json).await {
            return Err(AppError::cache(&temp, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(AppError::cache(&path, e));
        }

        tracing::debug!(path = %path.display(), bytes = json.len(), "Cache file replaced");
        Ok(())
    }
}
