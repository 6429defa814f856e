//! Local filesystem backend.
//!
//! Layout: `<root>/<category>/<scope>/<key>` for user records and
//! `<root>/<category>/<key>` for global ones. Writes land in a hidden
//! temporary file that is renamed into place, so readers never observe a
//! partial record. The creation timestamp is persisted as the file mtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use kompass_types::{BackendConfig, Category, RecordMeta, Scope};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{
    check_record_size, micros_to_datetime, sort_oldest_first, BackendAdapter, CreationClock,
};
use crate::error::BackendError;

/// Backend rooted at a directory on the local filesystem.
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
    config: BackendConfig,
    clock: CreationClock,
}

impl LocalBackend {
    /// Open (creating if needed) a data directory.
    ///
    /// The creation clock is seeded from the newest existing record so new
    /// writes always sort after records left by a previous process.
    pub fn open(root: impl Into<PathBuf>, config: BackendConfig) -> Result<Self, BackendError> {
        let root = root.into();
        for category in Category::ALL {
            fs::create_dir_all(root.join(category.as_str()))
                .map_err(|e| io_error(&root, e))?;
        }

        let newest = newest_mtime_micros(&root);
        info!(path = %root.display(), "Opened local storage");

        Ok(Self {
            root,
            config,
            clock: CreationClock::starting_after(newest),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, scope: &Scope, category: Category) -> PathBuf {
        let dir = self.root.join(category.as_str());
        match scope {
            Scope::Global => dir,
            Scope::User(id) => dir.join(id),
        }
    }

    fn path_for(&self, scope: &Scope, category: Category, key: &str) -> PathBuf {
        self.dir_for(scope, category).join(key)
    }
}

#[async_trait]
impl BackendAdapter for LocalBackend {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let meta = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(BackendError::Io(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }

    async fn put(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        check_record_size(&self.config, bytes.len())?;

        let dir = self.dir_for(scope, category);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let path = dir.join(key);
        let tmp = dir.join(format!(".{key}.tmp"));
        let created_at = self.clock.next();

        let result = write_then_rename(&tmp, &path, bytes, created_at).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result?;

        debug!(path = %path.display(), size = bytes.len(), "Wrote record");
        Ok(())
    }

    async fn get(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<Vec<u8>, BackendError> {
        let path = self.path_for(scope, category, key);
        tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))
    }

    async fn list(
        &self,
        scope: &Scope,
        category: Category,
    ) -> Result<Vec<RecordMeta>, BackendError> {
        let dir = self.dir_for(scope, category);
        let mut records = blocking(move || scan_records(&dir)).await?;
        sort_oldest_first(&mut records);
        Ok(records)
    }

    async fn delete(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<(), BackendError> {
        let path = self.path_for(scope, category, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn list_scopes(&self) -> Result<Vec<Scope>, BackendError> {
        let root = self.root.clone();
        blocking(move || scan_scopes(&root)).await
    }

    async fn usage(&self, scope: &Scope) -> Result<u64, BackendError> {
        let dirs: Vec<PathBuf> = super::categories_for(scope)
            .map(|c| self.dir_for(scope, c))
            .collect();
        blocking(move || {
            let mut total = 0;
            for dir in &dirs {
                total += scan_records(dir)?
                    .iter()
                    .map(|r| r.size_bytes)
                    .sum::<u64>();
            }
            Ok(total)
        })
        .await
    }

    async fn usage_total(&self) -> Result<u64, BackendError> {
        let root = self.root.clone();
        blocking(move || {
            Ok(WalkDir::new(&root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && !is_hidden(e.path()))
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum())
        })
        .await
    }
}

async fn write_then_rename(
    tmp: &Path,
    path: &Path,
    bytes: &[u8],
    created_at: DateTime<Utc>,
) -> Result<(), BackendError> {
    tokio::fs::write(tmp, bytes)
        .await
        .map_err(|e| io_error(tmp, e))?;
    filetime::set_file_mtime(tmp, to_file_time(created_at)).map_err(|e| io_error(tmp, e))?;
    tokio::fs::rename(tmp, path)
        .await
        .map_err(|e| io_error(path, e))
}

/// Regular, non-hidden files directly inside `dir`.
fn scan_records(dir: &Path) -> Result<Vec<RecordMeta>, BackendError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir, e)),
    };

    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            // Subdirectories are other scopes; vanished files are skipped
            _ => continue,
        };
        let created_at = micros_to_datetime(file_time_micros(&meta));
        records.push(RecordMeta::new(name, created_at, meta.len()));
    }
    Ok(records)
}

fn scan_scopes(root: &Path) -> Result<Vec<Scope>, BackendError> {
    let mut scopes = BTreeSet::new();
    for category in Category::ALL {
        let dir = root.join(category.as_str());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(io_error(&dir, e)),
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => {
                    // Directories emptied by deletes or migration hold no scope
                    if !scan_records(&entry.path())?.is_empty() {
                        if let Ok(scope) = Scope::user(name) {
                            scopes.insert(scope);
                        }
                    }
                }
                Ok(ft) if ft.is_file() && category.allows_global() => {
                    scopes.insert(Scope::Global);
                }
                _ => {}
            }
        }
    }
    Ok(scopes.into_iter().collect())
}

fn newest_mtime_micros(root: &Path) -> i64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| file_time_micros(&m))
        .max()
        .unwrap_or(0)
}

fn file_time_micros(meta: &fs::Metadata) -> i64 {
    let ft = FileTime::from_last_modification_time(meta);
    ft.unix_seconds() * 1_000_000 + i64::from(ft.nanoseconds() / 1_000)
}

fn to_file_time(at: DateTime<Utc>) -> FileTime {
    let micros = at.timestamp_micros();
    FileTime::from_unix_time(
        micros.div_euclid(1_000_000),
        (micros.rem_euclid(1_000_000) * 1_000) as u32,
    )
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn io_error(path: &Path, e: io::Error) -> BackendError {
    if e.kind() == io::ErrorKind::NotFound {
        BackendError::NotFound(path.display().to_string())
    } else {
        BackendError::Io(format!("{}: {}", path.display(), e))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Io(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use kompass_types::{BackendKind, QuotaLimits};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> LocalBackend {
        let config = BackendConfig::new(
            BackendKind::Local,
            0,
            QuotaLimits {
                max_file_size_bytes: 64,
                ..Default::default()
            },
        );
        LocalBackend::open(dir.path(), config).unwrap()
    }

    fn user() -> Scope {
        Scope::user("u1").unwrap()
    }

    #[tokio::test]
    async fn test_layout() {
        let temp = TempDir::new().unwrap();
        let backend = open(&temp);
        backend
            .put(&user(), Category::Routes, "loop.json", b"{}")
            .await
            .unwrap();
        backend
            .put(&Scope::Global, Category::Models, "route_model.json", b"[]")
            .await
            .unwrap();

        assert!(temp.path().join("routes/u1/loop.json").is_file());
        assert!(temp.path().join("models/route_model.json").is_file());
        assert!(!temp.path().join("routes/u1/.loop.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let temp = TempDir::new().unwrap();
        let backend = open(&temp);
        backend.put(&user(), Category::Routes, "a", b"one").await.unwrap();
        backend.put(&user(), Category::Routes, "a", b"two").await.unwrap();
        assert_eq!(
            backend.get(&user(), Category::Routes, "a").await.unwrap(),
            b"two"
        );
        assert_eq!(backend.list(&user(), Category::Routes).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let backend = open(&temp);
        let err = backend.get(&user(), Category::Routes, "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_oldest_first_skips_hidden() {
        let temp = TempDir::new().unwrap();
        let backend = open(&temp);
        for key in ["c", "a", "b"] {
            backend.put(&user(), Category::Routes, key, b"{}").await.unwrap();
        }
        std::fs::write(temp.path().join("routes/u1/.partial.tmp"), b"x").unwrap();

        let keys: Vec<String> = backend
            .list(&user(), Category::Routes)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_global_listing_ignores_user_dirs() {
        let temp = TempDir::new().unwrap();
        let backend = open(&temp);
        backend.put(&Scope::Global, Category::Models, "m", b"{}").await.unwrap();
        backend.put(&user(), Category::Models, "mine", b"{}").await.unwrap();

        let global = backend.list(&Scope::Global, Category::Models).await.unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].key, "m");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let backend = open(&temp);
        backend.put(&user(), Category::Routes, "a", b"{}").await.unwrap();
        backend.delete(&user(), Category::Routes, "a").await.unwrap();
        backend.delete(&user(), Category::Routes, "a").await.unwrap();
        assert!(backend.list(&user(), Category::Routes).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_size_limit_checked_before_write() {
        let temp = TempDir::new().unwrap();
        let backend = open(&temp);
        let err = backend
            .put(&user(), Category::Routes, "big", &[0u8; 65])
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::SizeExceeded { size: 65, max: 64 });
        assert!(!temp.path().join("routes/u1").exists());
    }

    #[tokio::test]
    async fn test_usage_and_scopes() {
        let temp = TempDir::new().unwrap();
        let backend = open(&temp);
        let u2 = Scope::user("u2").unwrap();
        backend.put(&user(), Category::Routes, "a", &[1; 10]).await.unwrap();
        backend.put(&user(), Category::Fitness, "b", &[1; 20]).await.unwrap();
        backend.put(&u2, Category::Routes, "a", &[1; 5]).await.unwrap();
        backend.put(&Scope::Global, Category::TrainingData, "t", &[1; 3]).await.unwrap();

        assert_eq!(backend.usage(&user()).await.unwrap(), 30);
        assert_eq!(backend.usage(&Scope::Global).await.unwrap(), 3);
        assert_eq!(backend.usage_total().await.unwrap(), 38);
        assert_eq!(
            backend.list_scopes().await.unwrap(),
            vec![Scope::Global, user(), u2.clone()]
        );

        backend.delete(&u2, Category::Routes, "a").await.unwrap();
        assert_eq!(
            backend.list_scopes().await.unwrap(),
            vec![Scope::Global, user()]
        );
    }

    #[tokio::test]
    async fn test_reopen_keeps_creation_order() {
        let temp = TempDir::new().unwrap();
        {
            let backend = open(&temp);
            backend.put(&user(), Category::Routes, "old", b"{}").await.unwrap();
        }
        let backend = open(&temp);
        backend.put(&user(), Category::Routes, "new", b"{}").await.unwrap();

        let records = backend.list(&user(), Category::Routes).await.unwrap();
        assert_eq!(records[0].key, "old");
        assert_eq!(records[1].key, "new");
        assert!(records[0].created_at < records[1].created_at);
    }
}
