//! Command-line front end for contentcache: drives a cache directory
//! without requiring callers to write Rust. The processor invoked on a
//! miss is an external command whose stdout becomes the cached content.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contentcache::{Cache, Config};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "contentcache", about = "Content-addressed cache for expensive extraction commands")]
struct Cli {
    /// Cache directory (defaults to Config::default or $CACHE_DIR).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Get cached content for a path, running `processor` on a miss.
    Get {
        path: PathBuf,
        /// Command to run on a cache miss; its stdout becomes the cached content.
        #[arg(long, num_args = 1.., required = true)]
        processor: Vec<String>,
    },
    /// Remove the cached entry for a path.
    Invalidate { path: PathBuf },
    /// Remove entries not accessed in the last `age_days` days.
    Sweep {
        #[arg(long, default_value_t = 30.0)]
        age_days: f64,
    },
    /// Print cache statistics as JSON.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    let metadata = Arc::new(
        contentcache::metadata::sqlite::SqliteMetadataStore::open(&config.cache_dir, config.backend_pool_size)
            .context("opening metadata store")?,
    );
    let cache = Arc::new(Cache::new(config, metadata).context("constructing cache")?);

    match cli.command {
        Command::Get { path, processor } => {
            let result = cache
                .get(&path, move |p| {
                    let processor = processor.clone();
                    async move { run_processor(&processor, &p).await }
                })
                .await?;
            print!("{}", result.content);
        }
        Command::Invalidate { path } => {
            let removed = cache.invalidate(&path).await?;
            println!("{}", if removed { "invalidated" } else { "not cached" });
        }
        Command::Sweep { age_days } => {
            let removed = cache.sweep_old(age_days * 86_400.0).await?;
            println!("removed {removed} entries older than {age_days} days");
        }
        Command::Stats => {
            let stats = cache.statistics().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

async fn run_processor(argv: &[String], path: &std::path::Path) -> contentcache::Result<String> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        contentcache::CacheError::processing_error("--processor requires at least one argument")
    })?;
    let output = tokio::process::Command::new(program)
        .args(args)
        .arg(path)
        .stdout(Stdio::piped())
        .output()
        .await
        .map_err(|e| contentcache::CacheError::processing_error_with_source(format!("failed to spawn {program}"), e))?;

    if !output.status.success() {
        return Err(contentcache::CacheError::processing_error(format!(
            "{program} exited with {}",
            output.status
        )));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| contentcache::CacheError::processing_error_with_source("processor output was not valid UTF-8", e))
}
