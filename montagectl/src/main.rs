//! `montagectl`: wires the core to local adapters for operators.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use montage_core::{
    ContentGraph, ContentService, DurationEstimator,
    InMemoryContentStore, InMemoryProgressTokens, LocalObjectStore,
    MediaConfig, MediaConfigSource, UploadRequest,
};
use montage_model::{ContentId, NewContent, StoreSnapshot, TokenState};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "montagectl")]
#[command(about = "Ingest media, publish it and estimate playback durations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a file into a directory-backed object store
    Ingest(IngestArgs),
    /// Estimate durations for contents in a store snapshot
    Estimate(EstimateArgs),
    /// Print the effective media configuration
    Config,
}

#[derive(ClapArgs, Debug)]
struct IngestArgs {
    /// File to ingest
    file: PathBuf,

    /// Object store root; one directory per bucket is created below it
    #[arg(long, env = "MONTAGE_OBJECT_ROOT")]
    root: PathBuf,

    /// Content name (defaults to the file stem)
    #[arg(long)]
    name: Option<String>,

    /// Move the files to the publish bucket once ingestion succeeds
    #[arg(long, default_value_t = false)]
    publish: bool,

    /// Write the resulting store snapshot as JSON
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct EstimateArgs {
    /// Store snapshot (JSON)
    snapshot: PathBuf,

    /// Only estimate this content
    #[arg(long)]
    content: Option<ContentId>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,montage_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (config, source) = MediaConfig::load_from_env()?;
    log_config_source(&source);

    match cli.command {
        Command::Ingest(args) => ingest(config, args).await,
        Command::Estimate(args) => estimate(config, args),
        Command::Config => print_config(&config, &source),
    }
}

fn log_config_source(source: &MediaConfigSource) {
    match source {
        MediaConfigSource::Default => info!("using default media configuration"),
        other => info!("loaded media configuration from {other}"),
    }
}

async fn ingest(config: MediaConfig, args: IngestArgs) -> Result<()> {
    let filename = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .context("input file has no usable name")?;
    let name = match args.name {
        Some(name) => name,
        None => stem_of(&args.file)?,
    };

    let store = Arc::new(InMemoryContentStore::new());
    let tokens = Arc::new(InMemoryProgressTokens::new());
    let service = ContentService::builder(config)
        .store(store.clone())
        .objects(Arc::new(LocalObjectStore::new(&args.root)))
        .tokens(tokens.clone())
        .build()
        .context("failed to start the content service")?;

    let content = service.create_content(NewContent::media(name)).await?;
    // Subscribed first, so the opening event is printed with the rest.
    let mut updates = tokens.subscribe();
    let ticket = service
        .begin_ingestion(UploadRequest {
            content_id: content.id,
            filename,
            source: args.file.clone(),
            owner: None,
        })
        .await
        .with_context(|| format!("upload of {} was refused", args.file.display()))?;

    let token = loop {
        let next = tokio::time::timeout(Duration::from_secs(300), updates.recv())
            .await
            .context("timed out waiting for ingestion progress")?;
        match next {
            Ok(token) if token.id == ticket.token.id => {
                println!("{}", serde_json::to_string(&token)?);
                if token.is_terminal() {
                    break token;
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!("missed progress updates: {err}");
                let token = service.upload_token(ticket.token.id).await?;
                if token.is_terminal() {
                    break token;
                }
            }
        }
    };

    if token.state == TokenState::Failed {
        service.shutdown().await;
        bail!(
            "ingestion failed: {}",
            token
                .error
                .map(|error| error.to_string())
                .unwrap_or_else(|| "no details".into())
        );
    }

    if args.publish {
        let report = service.publish(content.id, None).await?;
        if !report.is_complete() {
            warn!(failed = report.failed.len(), "some files were not published");
        }
    }

    let info = service.content_info(content.id, true).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);

    if let Some(path) = args.snapshot {
        let snapshot = store.snapshot().await;
        std::fs::write(&path, serde_json::to_vec_pretty(&snapshot)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote store snapshot");
    }

    service.shutdown().await;
    Ok(())
}

fn stem_of(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .context("input file has no usable stem")
}

fn estimate(config: MediaConfig, args: EstimateArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.snapshot)
        .with_context(|| format!("failed to read {}", args.snapshot.display()))?;
    let snapshot: StoreSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.snapshot.display()))?;

    let graph = ContentGraph::from_snapshot(&snapshot);
    let estimator = DurationEstimator::new(config.duration);
    let targets: Vec<ContentId> = match args.content {
        Some(id) => {
            if graph.content(id).is_none() {
                bail!("content {id} is not in the snapshot");
            }
            vec![id]
        }
        None => snapshot.contents.iter().map(|content| content.id).collect(),
    };

    for id in targets {
        let name = graph.content(id).map(|content| content.name.as_str()).unwrap_or("");
        match estimator.estimate_in(&graph, id) {
            Some(ms) => println!("{id}\t{name}\t{ms}"),
            None => println!("{id}\t{name}\tunknown"),
        }
    }
    Ok(())
}

fn print_config(config: &MediaConfig, source: &MediaConfigSource) -> Result<()> {
    println!("# source: {source}");
    print!("{}", config.to_toml_string()?);
    Ok(())
}
