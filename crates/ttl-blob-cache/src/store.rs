//! Raw file primitives used by the cache

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;
use tokio::fs;

/// A file found directly under the cache root.
#[derive(Debug, Clone)]
pub struct ListedFile {
    pub name: String,
    /// Creation time, or modification time where the filesystem has no birth time
    pub created_at: Option<DateTime<Utc>>,
}

/// File system access for the cache.
///
/// Every path handed to a store lies inside the cache root.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    async fn open_read(&self, path: &Path) -> io::Result<fs::File>;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Regular files directly under `dir`. Entries whose names are not valid
    /// UTF-8 are skipped.
    async fn list_files(&self, dir: &Path) -> io::Result<Vec<ListedFile>>;

    async fn remove_dir_all(&self, dir: &Path) -> io::Result<()>;

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()>;
}

/// [`FileStore`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileStore;

#[async_trait]
impl FileStore for TokioFileStore {
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::write(path, bytes).await
    }

    async fn open_read(&self, path: &Path) -> io::Result<fs::File> {
        fs::File::open(path).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }

    async fn list_files(&self, dir: &Path) -> io::Result<Vec<ListedFile>> {
        let mut files = Vec::new();
        let mut read_dir = fs::read_dir(dir).await?;

        while let Some(dir_entry) = read_dir.next_entry().await? {
            let metadata = match dir_entry.metadata().await {
                Ok(m) => m,
                // Deleted between listing and stat
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = dir_entry.file_name().into_string() else {
                continue;
            };
            let created_at = metadata
                .created()
                .or_else(|_| metadata.modified())
                .ok()
                .map(DateTime::<Utc>::from);

            files.push(ListedFile { name, created_at });
        }

        Ok(files)
    }

    async fn remove_dir_all(&self, dir: &Path) -> io::Result<()> {
        fs::remove_dir_all(dir).await
    }

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir).await
    }
}
