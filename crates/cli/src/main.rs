use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use segrelay_core::blob::TokenKind;
use segrelay_core::relay::PlaylistRepublisher;
use segrelay_core::catalog::{
    discover_items, export_catalog, items_from_index, load_content_index, load_rename_mapping,
    verify_export,
};
use segrelay_core::{
    create_archive_reader, load_config, metrics, validate_config, BaseListing, BlobStore,
    CheckpointStore, Collaborators, Config, ContentItem, FfmpegTranscoder, FsBlobStore,
    Orchestrator, RelayUploader, SanitizedConfig, StaticTokenProvider, TokenProvider, Transcoder,
    WebhookRelay,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "segrelay", version, about = "Migrate media archives through relay storage")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, env = "SEGRELAY_CONFIG", default_value = "segrelay.toml")]
    config: PathBuf,

    /// Log as JSON lines.
    #[arg(long)]
    json: bool,

    /// Print the metrics exposition when the command finishes.
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate every item that is not checkpointed yet.
    Run,
    /// Export the checkpoint into a SQLite database.
    Export {
        #[arg(long, default_value = "catalog.db")]
        output: PathBuf,
    },
    /// Compare the checkpoint with an exported database.
    Verify {
        #[arg(long, default_value = "catalog.db")]
        db: PathBuf,
    },
    /// Apply name corrections from a `[{old, new}]` mapping file.
    Rename {
        #[arg(long)]
        mapping: PathBuf,
    },
    /// Upload stored playlist texts through the relay and keep the references.
    RelayPlaylists,
    /// Show migration progress.
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json);

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("segrelay {} loading configuration from {:?}", VERSION, cli.config);
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = SanitizedConfig::from(&config);
    let config_json = serde_json::to_string(&sanitized).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Configuration loaded (hash {})", &config_hash[..16]);
    info!("Effective configuration: {}", config_json);

    match cli.command {
        Command::Run => run_migration(&config).await?,
        Command::Export { output } => export(&config, &output)?,
        Command::Verify { db } => verify(&config, &db)?,
        Command::Rename { mapping } => rename(&config, &mapping)?,
        Command::RelayPlaylists => {
            let relay =
                WebhookRelay::new(&config.relay).context("Failed to create relay client")?;
            relay_playlists(&config, Arc::new(relay)).await?
        }
        Command::Status => status(&config)?,
    }

    if cli.metrics {
        let exposition = metrics::encode_metrics().context("Failed to encode metrics")?;
        println!("{}", exposition);
    }
    Ok(())
}

async fn run_migration(config: &Config) -> Result<()> {
    let base = BaseListing::load(&config.catalog.base_listing_path)
        .context("Failed to load base listing")?;
    let mut store = CheckpointStore::open(&config.catalog.checkpoint_path)
        .context("Failed to open checkpoint store")?;
    info!(
        "{} of {} items already checkpointed",
        store.len(),
        base.len()
    );

    let blob_store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.store.root));
    let tokens: Arc<dyn TokenProvider> =
        Arc::new(StaticTokenProvider::from_config(&config.credentials));
    let transcoder = FfmpegTranscoder::new(config.transcoder.clone());
    transcoder
        .validate()
        .await
        .context("Transcoder is not usable")?;
    let relay = WebhookRelay::new(&config.relay).context("Failed to create relay client")?;

    let items = load_items(config, blob_store.as_ref(), tokens.as_ref(), &base).await?;
    info!("{} items in source listing", items.len());

    let orchestrator = Orchestrator::new(
        config,
        Collaborators {
            blob_store,
            tokens,
            archive_reader: create_archive_reader(&config.archive),
            transcoder: Arc::new(transcoder),
            relay: Arc::new(relay),
        },
    );

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, finishing running items");
                stop.stop();
            }
            Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
        }
    });

    let summary = orchestrator
        .run(items, &mut store, &base)
        .await
        .context("Migration run failed")?;

    println!(
        "Completed {}, failed {}, skipped {}, dropped {}; {}/{} checkpointed",
        summary.completed,
        summary.failed,
        summary.skipped,
        summary.dropped,
        store.len(),
        base.len()
    );
    if !summary.failed_items.is_empty() {
        println!("Failed items: {}", summary.failed_items.join(", "));
    }
    Ok(())
}

async fn load_items(
    config: &Config,
    blob_store: &dyn BlobStore,
    tokens: &dyn TokenProvider,
    base: &BaseListing,
) -> Result<Vec<ContentItem>> {
    match &config.catalog.content_index_path {
        Some(path) => {
            let index = load_content_index(path).context("Failed to load content index")?;
            Ok(items_from_index(
                &index,
                &config.source.path,
                &config.source.archive_extension,
                base,
            ))
        }
        None => {
            let token = tokens
                .get_token(TokenKind::Download)
                .await
                .context("Failed to obtain download token")?;
            let items = discover_items(
                blob_store,
                &token,
                &config.source.path,
                &config.source.archive_extension,
                base,
            )
            .await
            .context("Failed to discover source archives")?;
            Ok(items)
        }
    }
}

fn open_store(config: &Config) -> Result<CheckpointStore> {
    CheckpointStore::open(&config.catalog.checkpoint_path)
        .context("Failed to open checkpoint store")
}

fn export(config: &Config, output: &Path) -> Result<()> {
    let store = open_store(config)?;
    let summary = export_catalog(store.load(), output)
        .with_context(|| format!("Failed to export catalog to {:?}", output))?;
    println!(
        "Exported {} courses, {} modules, {} videos to {}",
        summary.courses,
        summary.modules,
        summary.videos,
        output.display()
    );
    Ok(())
}

fn verify(config: &Config, db: &Path) -> Result<()> {
    let store = open_store(config)?;
    let report = verify_export(store.load(), db)
        .with_context(|| format!("Failed to verify {:?}", db))?;
    println!(
        "Checked {} courses and {} videos",
        report.checked_courses, report.checked_videos
    );
    if !report.is_consistent() {
        for mismatch in &report.mismatches {
            println!("  {}", mismatch);
        }
        bail!("{} mismatch(es) between checkpoint and {:?}", report.mismatches.len(), db);
    }
    println!("Export is consistent");
    Ok(())
}

fn rename(config: &Config, mapping: &Path) -> Result<()> {
    let renames = load_rename_mapping(mapping)
        .with_context(|| format!("Failed to load rename mapping {:?}", mapping))?;
    let mut store = open_store(config)?;
    let changed = store.stage_renames(&renames);
    store.flush().context("Failed to write checkpoint")?;
    println!("Renamed {} of {} records", changed, store.len());
    Ok(())
}

async fn relay_playlists(config: &Config, relay: Arc<dyn RelayUploader>) -> Result<()> {
    let mut store = open_store(config)?;
    let republisher = PlaylistRepublisher::new(
        config.relay.clone(),
        relay,
        config.worker.temp_dir.join("playlists"),
    );
    let summary = republisher
        .run(&mut store)
        .await
        .context("Playlist upload failed")?;

    println!(
        "Uploaded {} playlists, {} already relayed, {} failed",
        summary.uploaded,
        summary.skipped,
        summary.failed.len()
    );
    if !summary.failed.is_empty() {
        println!("Failed: {}", summary.failed.join(", "));
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let base = BaseListing::load(&config.catalog.base_listing_path)
        .context("Failed to load base listing")?;
    let store = open_store(config)?;

    let videos: usize = store.load().values().map(|r| r.video_count()).sum();
    println!(
        "{}/{} items checkpointed, {} videos",
        store.len(),
        base.len(),
        videos
    );

    let missing: Vec<&str> = base
        .iter()
        .map(|(id, _)| id.as_str())
        .filter(|id| !store.has(id))
        .collect();
    if !missing.is_empty() && missing.len() <= 20 {
        println!("Remaining: {}", missing.join(", "));
    }

    if let Ok(modified) = std::fs::metadata(store.path()).and_then(|m| m.modified()) {
        let modified: DateTime<Local> = modified.into();
        println!("Last checkpoint: {}", modified.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}
