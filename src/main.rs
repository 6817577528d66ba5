// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Repl, ReplAction};
use freja_config::Store;
use freja_core::{Pipeline, Router};
use freja_gateway::LiveRunRegistry;
use freja_model::{catalog, Credential, ProviderId};

#[derive(Parser)]
#[command(name = "freja", about = "Multi-provider AI command-line assistant")]
struct Cli {
    /// Verbose logging to stderr (FREJA_LOG overrides the filter).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List known providers and their auth status.
    ListProviders,
    /// List catalog models, optionally for one provider.
    ListModels { provider: Option<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::ListProviders => {
                list_providers();
                return Ok(());
            }
            Commands::ListModels { provider } => {
                list_models(provider.as_deref())?;
                return Ok(());
            }
        }
    }

    let store = Store::default_location();
    let router = Arc::new(Router::new(store.clone()));
    let pipeline = Arc::new(Pipeline::new(store.clone(), router.clone()));
    let registry = Arc::new(LiveRunRegistry::new());

    // ── Live-run HTTP server ──────────────────────────────────────────────────
    let port = freja_gateway::resolve_port();
    {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = freja_gateway::serve(registry, port).await {
                warn!(error = %e, "live-run server stopped");
            }
        });
    }

    // ── Telegram agent loop (when a bot token is configured) ──────────────────
    if let Ok(token) = std::env::var("FREJA_TELEGRAM_BOT_TOKEN") {
        if !token.trim().is_empty() {
            let api = freja_channels::TelegramApi::new(token.trim());
            let agent = Arc::new(freja_channels::AgentLoop::new(
                api,
                store.clone(),
                pipeline.clone(),
                registry.clone(),
                port,
            ));
            tokio::spawn(agent.run());
            info!("telegram agent loop enabled");
        }
    }

    run_repl(Repl::new(store, router, pipeline, registry)).await
}

async fn run_repl(repl: Repl) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    println!("freja {} — /exit to quit", env!("CARGO_PKG_VERSION"));
    loop {
        stdout.write_all(b"freja> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            // stdin closed (pipe ended): clean exit.
            break;
        };
        let (action, output) = repl.handle_line(&line).await;
        if !output.is_empty() {
            println!("{output}");
        }
        if matches!(action, ReplAction::Exit) {
            break;
        }
    }
    Ok(())
}

fn list_providers() {
    for p in ProviderId::all() {
        let authed = Credential::resolve(*p).is_some();
        println!(
            "{:<10} {:<10} ${:<8.4} {}",
            p.as_str(),
            p.display_name(),
            p.price_per_1k_usd(),
            if authed { "authenticated" } else { "no credential" }
        );
    }
}

fn list_models(provider: Option<&str>) -> anyhow::Result<()> {
    let filter = match provider {
        Some(s) => {
            Some(ProviderId::parse(s).ok_or_else(|| anyhow::anyhow!("unknown provider: {s}"))?)
        }
        None => None,
    };
    for (p, m) in catalog::static_catalog() {
        if filter.map(|f| f != p).unwrap_or(false) {
            continue;
        }
        println!(
            "{:<10} {:<32} ctx={:<9} out={}",
            p.as_str(),
            m.id,
            m.context_window,
            m.max_output_tokens
        );
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("FREJA_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));

    // Writing straight to stderr corrupts the prompt line, so prefer a log
    // file when one is configured.
    if let Ok(path) = std::env::var("FREJA_LOG_FILE") {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
                .init();
            return;
        }
    }
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
