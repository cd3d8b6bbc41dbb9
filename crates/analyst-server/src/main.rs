//! Command-line entry point for the analyst engine
//!
//! `serve` (the default) exposes the HTTP endpoint; `run` answers one task from
//! files on disk and prints the result.

use analyst_core::{AnalystConfig, ConfigLoader, InputFile, SessionRunner};
use analyst_server::{shutdown_signal, AnalystServer, ServerConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Analyst - answer data questions by generating and running code")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(long, short, help = "Configuration file (defaults to ./analyst.yaml when present)")]
    config: Option<PathBuf>,

    #[clap(long, help = "Override the configured bind address")]
    bind_addr: Option<String>,

    #[clap(long, short, help = "Log level (error, warn, info, debug, trace)")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (default command)
    Serve {
        #[clap(long)]
        bind_addr: Option<String>,
    },
    /// Answer one task locally and print the result as JSON
    Run {
        #[clap(long, help = "File holding the natural-language task")]
        task: PathBuf,

        #[clap(long = "file", help = "Data file made available to the generated code (repeatable)")]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::from_file(path).await,
        None => ConfigLoader::discover().await,
    }
    .context("Failed to load configuration")?;

    init_logging(cli.log_level.as_deref(), &config)?;

    match cli.command {
        Some(Commands::Run { task, files }) => run_once(config, &task, &files).await,
        Some(Commands::Serve { bind_addr }) => {
            run_server(config, bind_addr.or(cli.bind_addr)).await
        }
        None => run_server(config, cli.bind_addr).await,
    }
}

/// The flag wins over the configured level, which already carries any
/// environment override.
fn init_logging(flag: Option<&str>, config: &AnalystConfig) -> Result<()> {
    let level = flag.unwrap_or(&config.logging.level);
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level_filter);

    if let Some(path) = &config.logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

async fn run_server(config: AnalystConfig, bind_addr: Option<String>) -> Result<()> {
    let mut server_config = ServerConfig::from_settings(&config.server)?;
    if let Some(addr) = bind_addr {
        server_config = server_config.with_bind_addr_str(&addr)?;
    }

    log::info!(
        "Using {:?} model '{}', up to {} attempts per session",
        config.llm.provider,
        config.llm.model,
        config.session.max_attempts
    );

    let runner = SessionRunner::from_config(config)?;
    let server = AnalystServer::with_config(Arc::new(runner), server_config);

    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn run_once(config: AnalystConfig, task: &Path, files: &[PathBuf]) -> Result<()> {
    let mut inputs = Vec::with_capacity(files.len() + 1);

    let task_bytes = tokio::fs::read(task)
        .await
        .with_context(|| format!("Failed to read task file {}", task.display()))?;
    inputs.push(InputFile::new(config.session.task_file.clone(), task_bytes));

    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Not a file path: {}", path.display()))?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        inputs.push(InputFile::new(name, bytes));
    }

    let runner = SessionRunner::from_config(config)?;
    let answer = runner.run(inputs).await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}
