//! blob-cache - command-line access to a TTL blob cache directory
//!
//! Opens the cache (rebuilding its index from the directory), runs one
//! command, and drains pending writes before exiting.

mod error;

use crate::error::{CliError, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};
use ttl_blob_cache::{BlobCache, CacheConfig};

/// Inspect and modify a TTL blob cache directory
#[derive(Parser)]
#[command(name = "blob-cache")]
#[command(author, version)]
struct Cli {
    /// Cache root directory
    #[arg(long, env = "CACHE_DIR", global = true)]
    root: Option<PathBuf>,

    /// Cache name, used under the system temp directory when no root is given
    #[arg(long, default_value = "blob-cache", global = true)]
    name: String,

    /// Log every cache lookup, write and eviction
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a blob, read from a file or stdin
    Put {
        key: String,
        /// File to store; reads stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Time-to-live in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
    /// Write a cached blob to stdout
    Get { key: String },
    /// Print the path of a cached blob
    Path { key: String },
    /// Exit with status 0 if the key is cached, 1 otherwise
    Exists { key: String },
    /// Remove a cached blob
    Rm { key: String },
    /// Remove every cached blob
    Clear,
    /// Evict expired entries now
    Sweep,
    /// Print cache statistics as JSON
    Stats,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("blob_cache={}", default_level).parse()?)
        .add_directive(format!("ttl_blob_cache={}", default_level).parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };

    let root = resolve_root(cli.root.as_deref(), &cli.name);
    let mut config = CacheConfig::from_env();
    config.verbose |= cli.verbose;
    // A one-shot command has no use for the background sweep; `sweep`
    // runs it explicitly.
    config.sweep_delay = Duration::from_secs(24 * 60 * 60);
    config.sweep_interval = None;

    info!("Cache dir: {:?}", root);
    let cache = BlobCache::open(&root, config).await?;

    let outcome = run(&cache, cli.command).await;
    cache.shutdown().await;
    outcome.map(exit_code)
}

/// Run one command. `Ok(false)` means the key was not found.
async fn run(cache: &BlobCache, command: Command) -> Result<bool> {
    match command {
        Command::Put { key, file, ttl } => {
            let bytes = match file {
                Some(path) => tokio::fs::read(&path).await?,
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };
            let size = bytes.len();
            if !cache.insert(&key, bytes, Duration::from_secs(ttl)).await {
                return Err(CliError::WriteRejected(key));
            }
            info!(key = %key, size, ttl, "Stored blob");
            Ok(true)
        }
        Command::Get { key } => match cache.read(&key).await {
            Some(data) => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&data).await?;
                stdout.flush().await?;
                Ok(true)
            }
            None => Ok(false),
        },
        Command::Path { key } => match cache.get_file_path(&key) {
            Some(path) => {
                println!("{}", path.display());
                Ok(true)
            }
            None => Ok(false),
        },
        Command::Exists { key } => Ok(cache.exists(&key)),
        Command::Rm { key } => Ok(cache.remove(&key).await),
        Command::Clear => {
            cache.clear().await?;
            Ok(true)
        }
        Command::Sweep => {
            let evicted = cache.sweep().await;
            println!("{}", evicted);
            Ok(true)
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&cache.stats())?);
            Ok(true)
        }
    }
}

fn exit_code(found: bool) -> ExitCode {
    if found {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Explicit root first, otherwise `<temp dir>/<name>`.
fn resolve_root(root: Option<&Path>, name: &str) -> PathBuf {
    match root {
        Some(root) => root.to_path_buf(),
        None => std::env::temp_dir().join(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resolve_root_prefers_explicit_path() {
        let root = resolve_root(Some(Path::new("/var/cache/blobs")), "ignored");
        assert_eq!(root, PathBuf::from("/var/cache/blobs"));
    }

    #[test]
    fn test_resolve_root_falls_back_to_temp_dir() {
        let root = resolve_root(None, "thumbnails");
        assert_eq!(root, std::env::temp_dir().join("thumbnails"));
    }

    #[test]
    fn test_parse_put_command() {
        let cli = Cli::try_parse_from([
            "blob-cache", "--root", "/tmp/c", "put", "avatar", "--ttl", "60", "--file", "a.png",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/c")));
        match cli.command {
            Command::Put { key, file, ttl } => {
                assert_eq!(key, "avatar");
                assert_eq!(file, Some(PathBuf::from("a.png")));
                assert_eq!(ttl, 60);
            }
            _ => panic!("expected put"),
        }
    }

    #[tokio::test]
    async fn test_run_put_then_get_path() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"payload").unwrap();

        let root = dir.path().join("cache");
        let cache = BlobCache::open(&root, CacheConfig::default()).await.unwrap();

        let stored = run(
            &cache,
            Command::Put {
                key: "k".to_string(),
                file: Some(source),
                ttl: 90,
            },
        )
        .await
        .unwrap();
        assert!(stored);
        assert_eq!(cache.get_file_path("k"), Some(root.join("k.90")));

        let removed = run(&cache, Command::Rm { key: "k".to_string() }).await.unwrap();
        assert!(removed);
        let found = run(&cache, Command::Exists { key: "k".to_string() }).await.unwrap();
        assert!(!found);
    }
}
