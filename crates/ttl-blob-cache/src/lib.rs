//! Directory-backed blob cache with per-entry TTL
//!
//! Stores opaque byte blobs on disk, one file per key named
//! `<sanitized key>.<ttl seconds>`, with an in-memory index rebuilt from the
//! directory listing at startup. Writes are queued on serial lanes and run
//! in the background; a second write for a key that is still being written
//! is rejected. Expired entries are purged by a background sweep.

mod cache;
pub mod config;
pub mod error;
mod index;
mod lane;
mod pending;
mod reconstruct;
pub mod sanitize;
pub mod store;
mod sweeper;
mod types;

pub use cache::BlobCache;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use reconstruct::parse_file_name;
pub use sanitize::{FileNameSanitizer, HashSanitizer, KeySanitizer};
pub use store::{FileStore, ListedFile, TokioFileStore};
pub use types::{ttl_to_secs, CacheEntry, CacheStats, OnComplete};
