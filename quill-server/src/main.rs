//! # quill-server
//!
//! Runs the sync relay and offers a few maintenance commands against the
//! same store. Everything is driven by one JSON configuration file (see
//! `quill_collab::config`). Set `RUST_LOG` for verbosity.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use quill_collab::{render_history, CollabConfig, DocumentStore, SaveWorker, SubjectRef, SyncServer};
use quill_core::{SchemaRegistry, SubjectSchema};

type CliResult = Result<(), Box<dyn std::error::Error>>;

// ─── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "quill-server")]
#[command(about = "Collaborative editing relay with durable history")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "quill.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve WebSocket editors until interrupted
    Serve,
    /// Create a subject with its field defaults
    Create {
        kind: String,
        id: u64,
        #[arg(long)]
        author: Option<u64>,
    },
    /// Copy a subject's document into a new subject of the same kind
    Duplicate {
        kind: String,
        id: u64,
        target_id: u64,
        #[arg(long)]
        author: Option<u64>,
    },
    /// Delete a subject's document; its history is kept
    Delete { kind: String, id: u64 },
    /// Print what every history entry changed
    History {
        kind: String,
        id: u64,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the current document
    Dump { kind: String, id: u64 },
}

fn schema_for(schemas: &SchemaRegistry, kind: &str) -> Result<Arc<SubjectSchema>, String> {
    schemas
        .get(kind)
        .ok_or_else(|| format!("no subject kind '{kind}' is configured"))
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn serve(config: CollabConfig, store: Arc<DocumentStore>, schemas: SchemaRegistry) -> CliResult {
    let (worker, worker_task) = SaveWorker::spawn(store.clone(), Arc::new(schemas), config.worker.clone());
    let policy = Arc::new(config.token_table());
    if policy.is_empty() {
        warn!("No access tokens configured; every connection will be refused");
    }
    let server = SyncServer::new(config.server.clone(), store.clone(), worker, policy);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    // the worker drains once the last handle is gone
    drop(server);
    if tokio::time::timeout(Duration::from_secs(10), worker_task).await.is_err() {
        warn!("Save worker still busy with open connections; exiting anyway");
    }
    store.sync()?;
    Ok(())
}

fn history(store: &DocumentStore, schema: &SubjectSchema, subject: &SubjectRef, json: bool) -> CliResult {
    let diffs = render_history(store, schema, subject)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&diffs)?);
        return Ok(());
    }
    for diff in diffs {
        let author = diff.author.map_or_else(|| "system".to_string(), |a| a.to_string());
        println!("#{} at {} by {author}", diff.history_id, diff.timestamp);
        for line in diff.lines {
            println!("    {line}");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> CliResult {
    let config = CollabConfig::from_path(&cli.config)?;
    let schemas = config.schemas()?;
    let store = Arc::new(DocumentStore::open(config.store.clone())?);
    info!("Opened store at {}", store.path().display());

    match cli.command {
        Commands::Serve => serve(config, store, schemas).await?,
        Commands::Create { kind, id, author } => {
            let schema = schema_for(&schemas, &kind)?;
            let subject = SubjectRef::new(kind, id);
            store.create_subject(&subject, &schema, author)?;
            println!("created {subject}");
        }
        Commands::Duplicate { kind, id, target_id, author } => {
            let schema = schema_for(&schemas, &kind)?;
            let source = SubjectRef::new(kind.clone(), id);
            let target = SubjectRef::new(kind, target_id);
            store.duplicate_subject(&source, &target, &schema, author)?;
            println!("copied {source} to {target}");
        }
        Commands::Delete { kind, id } => {
            let subject = SubjectRef::new(kind, id);
            store.delete_subject(&subject)?;
            println!("deleted {subject}");
        }
        Commands::History { kind, id, json } => {
            let schema = schema_for(&schemas, &kind)?;
            history(&store, &schema, &SubjectRef::new(kind, id), json)?;
        }
        Commands::Dump { kind, id } => {
            let schema = schema_for(&schemas, &kind)?;
            let doc = store.load_document(&SubjectRef::new(kind, id))?;
            println!("{}", schema.dump(&doc));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
