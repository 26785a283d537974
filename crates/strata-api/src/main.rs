//! Strata CLI and REST API entry point.
//!
//! Binary name: `strata`
//!
//! Parses CLI arguments, opens the database and wires the memory engine,
//! then dispatches to the command handler or starts the REST API server.

mod cli;
mod http;
mod maintenance;
mod state;

use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use state::AppState;
use strata_types::search::SearchScope;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbosity = if cli.quiet { None } else { Some(cli.verbose) };
    strata_observe::init_tracing(verbosity, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "strata", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    let result = run(cli, state).await;
    strata_observe::shutdown_tracing();
    result
}

async fn run(cli: Cli, state: AppState) -> anyhow::Result<()> {
    match cli.command {
        Commands::Archive { file } => {
            cli::archive::archive(&state, &file, cli.json).await?;
        }

        Commands::Search {
            query,
            k,
            owner,
            project,
            archived,
        } => {
            let scope = SearchScope {
                owner,
                project,
                include_archived: archived,
                ..SearchScope::default()
            };
            cli::search::search(&state, &query, k, scope, cli.json).await?;
        }

        Commands::Reassign {
            conversation_id,
            project,
            ..
        } => {
            cli::reassign::reassign(&state, &conversation_id, project.as_deref(), cli.json).await?;
        }

        Commands::Sweep => {
            cli::sweep::sweep(&state, cli.json).await?;
        }

        Commands::Status => {
            cli::status::status(&state, cli.json).await?;
        }

        Commands::Facts { kind, limit } => {
            cli::facts::list_facts(&state, kind.as_deref(), limit, cli.json).await?;
        }

        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| state.config.server.host.clone());
            let port = port.unwrap_or(state.config.server.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !state.auth_enabled() {
                tracing::warn!("no shared secret configured; API authentication is disabled");
            }

            let cancel = CancellationToken::new();
            let sweeper = maintenance::spawn_sweep_loop(
                state.engine.clone(),
                state.config.maintenance.sweep_interval_secs,
                cancel.clone(),
            );

            if !cli.quiet {
                println!(
                    "  {} Strata API listening on {}",
                    console::style("⚡").bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(state);
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await;

            cancel.cancel();
            if let Some(handle) = sweeper {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "background sweep task ended abnormally");
                }
            }
            served?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
