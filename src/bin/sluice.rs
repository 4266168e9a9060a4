use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sluice::io::listing::snapshot_dir;
use sluice::io::object_store::LocalObjectStore;
use sluice::pipeline::{InputFile, JobContext, ingest_batch, stage_input};
use sluice::planner::{JoinTableDefinition, define_query};
use sluice::versioning::{FileHashStore, HashResolver};
use sluice::{ByteDecoder, ColumnCompression, IngestConfig};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sluice",
    version,
    about = "Streaming ingestion of delimited text into columnar storage"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage local files into a store directory and ingest them
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Root directory of the local object store
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        project: String,
        /// Table the files belong to (defaults to each file's name)
        #[arg(long)]
        table: Option<String>,
        /// Input encoding (ascii, utf-8, utf-16le, utf-16be); sniffed when omitted
        #[arg(long)]
        encoding: Option<ByteDecoder>,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
        #[arg(long, default_value_t = 10_000)]
        row_group_size: usize,
        /// Column compression (none, snappy, zstd)
        #[arg(long, default_value = "zstd")]
        compression: ColumnCompression,
        /// Files processed at once (defaults to one per CPU)
        #[arg(long)]
        parallelism: Option<usize>,
        /// Secret used to sign URLs handed out by the store
        #[arg(long, default_value = "local-dev")]
        secret: String,
    },
    /// Print the join query for a JSON list of table definitions
    Plan {
        /// JSON file holding an array of join table definitions
        definitions: PathBuf,
    },
    /// Hash a directory tree and report whether it changed since last recorded
    Hash {
        dir: PathBuf,
        /// File holding recorded hashes
        #[arg(long, default_value = ".sluice-hashes")]
        state: PathBuf,
        /// Name the hash is recorded under (defaults to the directory path)
        #[arg(long)]
        target: Option<String>,
        /// Record the current hash after checking
        #[arg(long)]
        record: bool,
    },
}

/// Uses the `RUST_LOG` env var if set, otherwise falls back to `log_level`.
fn init_logging(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Ingest {
            files,
            store,
            workspace,
            project,
            table,
            encoding,
            delimiter,
            row_group_size,
            compression,
            parallelism,
            secret,
        } => {
            let config = IngestConfig {
                encoding,
                delimiter,
                row_group_size,
                compression,
                parallelism,
                ..Default::default()
            };
            ingest(&files, &store, &workspace, &project, table.as_deref(), &secret, config)
        }
        Commands::Plan { definitions } => plan(&definitions),
        Commands::Hash {
            dir,
            state,
            target,
            record,
        } => hash(&dir, &state, target, record),
    }
}

fn ingest(
    files: &[PathBuf],
    root: &Path,
    workspace: &str,
    project: &str,
    table: Option<&str>,
    secret: &str,
    config: IngestConfig,
) -> Result<()> {
    let store = LocalObjectStore::new(root, secret)
        .with_context(|| format!("open store at {}", root.display()))?;
    let ctx = JobContext::new(workspace, project, Arc::new(store), config);

    let mut inputs = Vec::with_capacity(files.len());
    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        let input = InputFile::new(table.unwrap_or(&file_name), &file_name);
        let mut body = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let key = stage_input(&ctx, &input, &mut body)
            .with_context(|| format!("stage {}", path.display()))?;
        info!(key = %key, "staged");
        inputs.push(input);
    }

    let report = ingest_batch(&ctx, &inputs)?;
    for info in report.succeeded() {
        println!("{}", info.to_json()?);
    }
    for (input, err) in report.failed() {
        eprintln!("{}: {err}", input.file_name);
    }
    report.into_result()?;
    Ok(())
}

fn plan(definitions: &Path) -> Result<()> {
    let file = File::open(definitions).with_context(|| format!("open {}", definitions.display()))?;
    let tables: Vec<JoinTableDefinition> = serde_json::from_reader(file)
        .with_context(|| format!("parse {}", definitions.display()))?;
    println!("{}", define_query(&tables)?);
    Ok(())
}

fn hash(dir: &Path, state: &Path, target: Option<String>, record: bool) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let target = target.unwrap_or_else(|| dir.to_string_lossy().into_owned());
    let listing = snapshot_dir(dir)?;
    let store = FileHashStore::open(state)
        .with_context(|| format!("open hash state {}", state.display()))?;
    let resolver = HashResolver::new(&store);

    let resolution = resolver.resolve(&target, &listing)?;
    println!(
        "{} {} ({} files)",
        resolution.current_hash,
        if resolution.up_to_date { "up-to-date" } else { "stale" },
        listing.len()
    );
    if record && !resolution.up_to_date {
        resolver.record(&target, &resolution.current_hash)?;
        info!(target = %target, "hash recorded");
    }
    Ok(())
}
