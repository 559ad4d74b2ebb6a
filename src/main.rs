use anyhow::{Context, Result};
use catalog_sync::{
    config::Config,
    models::{KeySpec, MediaKind},
    pipeline::Pipeline,
    reconcile, store,
    utils::setup_folders,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "catalog-sync", version, about = "Merge scraped media records into a deduplicated JSON collection")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape every configured source and merge the results
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Incoming data replaces existing values
        #[arg(long)]
        force: bool,
        #[arg(long)]
        no_backup: bool,
    },
    /// Merge an already-scraped JSON file into a collection
    Merge {
        #[arg(long)]
        existing: PathBuf,
        #[arg(long)]
        incoming: PathBuf,
        /// movies, series, events or custom
        #[arg(long)]
        kind: Option<String>,
        /// Comma-separated natural key fields
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        no_backup: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Rewrite a collection file in canonical shape
    Normalize {
        path: PathBuf,
        /// movies, series, events or custom (defaults to the configured kind)
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        no_backup: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List records that look like the same fixture reported by different sources
    Reconcile {
        path: PathBuf,
        #[arg(long, default_value = "equipos")]
        field: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Run {
            config,
            force,
            no_backup,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path.to_string_lossy())?,
                None => Config::load_or_create()?.0,
            };
            config.force_update |= force;
            config.backup &= !no_backup;
            setup_folders(&config)?;

            let pipeline = Pipeline::new(config);
            let abort = pipeline.abort_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing the current request before saving");
                    abort.store(true, Ordering::SeqCst);
                }
            });

            let summary = pipeline.run().await?;
            println!("{}", summary);
        }
        Command::Merge {
            existing,
            incoming,
            kind,
            key,
            force,
            no_backup,
            config,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path.to_string_lossy())?,
                None => Config::default(),
            };
            config.collection_path = existing.to_string_lossy().into_owned();
            if let Some(kind) = kind {
                config.kind = parse_kind(&kind)?;
            }
            if let Some(key) = key {
                config.key = Some(KeySpec::parse(&key).context("--key needs at least one field")?);
            }
            if config.kind == MediaKind::Custom && config.key.is_none() {
                anyhow::bail!("--key is required with --kind custom");
            }
            config.force_update |= force;
            config.backup &= !no_backup;
            setup_folders(&config)?;

            let summary = Pipeline::new(config).merge_file(&incoming)?;
            println!("{}", summary);
        }
        Command::Normalize {
            path,
            kind,
            no_backup,
            config,
        } => {
            if !path.exists() {
                anyhow::bail!("{} does not exist", path.display());
            }
            let mut config = match config {
                Some(path) => Config::load(&path.to_string_lossy())?,
                None => Config::default(),
            };
            config.collection_path = path.to_string_lossy().into_owned();
            if let Some(kind) = kind {
                config.kind = parse_kind(&kind)?;
            }
            config.backup &= !no_backup;

            let (count, saved) = Pipeline::new(config).normalize_file()?;
            println!("Normalized {} records in {}", count, saved.path.display());
        }
        Command::Reconcile { path, field } => {
            let records = store::load(&path);
            let suggestions = reconcile::suggest(&records, &field);
            if suggestions.is_empty() {
                println!("No likely duplicates among {} records", records.len());
            }
            for s in &suggestions {
                println!(
                    "#{} \"{}\"  <->  #{} \"{}\"  (shared: {})",
                    s.left,
                    s.left_title,
                    s.right,
                    s.right_title,
                    s.shared.join(", ")
                );
            }
        }
    }

    Ok(())
}

fn parse_kind(name: &str) -> Result<MediaKind> {
    MediaKind::parse(name).ok_or_else(|| anyhow::anyhow!("unknown collection kind '{}'", name))
}
