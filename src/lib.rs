// src/lib.rs

pub mod batch;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod ops;
pub mod server;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::BatchOrchestrator;
use crate::cli::CliArgs;
use crate::config::{ServerConfig, ensure_workspace_roots, load_and_validate};
use crate::fs::RealFileSystem;
use crate::ops::OperationDispatcher;
use crate::types::RuntimeKind;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and workspace preparation
/// - the operation dispatcher and batch orchestrator
/// - the retention sweeper
/// - Ctrl-C handling
/// - the stdio request loop
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    if args.check {
        print_config(&cfg);
        return Ok(());
    }

    ensure_workspace_roots(&cfg).context("preparing workspace roots")?;

    let config = Arc::new(cfg);
    let dispatcher = OperationDispatcher::new(Arc::new(RealFileSystem), Arc::clone(&config));
    let orchestrator = BatchOrchestrator::new(config, dispatcher);
    orchestrator.spawn_retention_sweeper();

    // Ctrl-C → graceful shutdown.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            shutdown.cancel();
        });
    }

    server::serve(orchestrator, tokio::io::stdin(), tokio::io::stdout(), shutdown).await?;
    info!("shut down cleanly");
    Ok(())
}

/// `--check` output: the validated configuration.
fn print_config(cfg: &ServerConfig) {
    println!("codeact config check");
    println!("  security.max_batch_size = {}", cfg.security.max_batch_size);
    println!(
        "  security.max_concurrent_batches = {}",
        cfg.security.max_concurrent_batches
    );
    println!();

    println!("workspaces ({}):", cfg.security.workspaces.len());
    let default_id = &cfg.default_workspace().id;
    for ws in &cfg.security.workspaces {
        let marker = if &ws.id == default_id { " (default)" } else { "" };
        println!("  - {}{marker}: {}", ws.id, ws.path.display());
    }
    println!();

    println!("runtimes:");
    for kind in RuntimeKind::ALL {
        let rt = cfg.runtime(kind);
        if rt.enabled {
            println!(
                "  - {kind}: {} (timeout {}s)",
                rt.effective_command(kind),
                rt.timeout_secs
            );
        } else {
            println!("  - {kind}: disabled");
        }
    }
    println!();

    println!(
        "shell: default {}, session timeout {}s",
        cfg.shell.effective_default_shell(),
        cfg.shell.session_timeout_secs
    );
    println!(
        "retention: sweep every {}s, max age {}s, max history {}",
        cfg.retention.cleanup_interval_secs,
        cfg.retention.max_age().as_secs(),
        cfg.retention.max_batch_history
    );

    debug!("config check complete (no execution)");
}
