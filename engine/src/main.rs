// Waypoint orchestration engine
// Main entry point for the waypoint binary

use clap::Parser;
use std::sync::Arc;
use waypoint_engine::cli::{Cli, Command, SessionAction};
use waypoint_engine::config::Config;
use waypoint_engine::handlers::{
    handle_checkpoints, handle_dispatch, handle_history, handle_render, handle_resume,
    handle_run, handle_serve, handle_sessions_delete, handle_sessions_list, handle_sessions_show,
    DisplayMode,
};
use waypoint_engine::orchestrator::Orchestrator;
use waypoint_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let mode = if cli.json {
        DisplayMode::Json
    } else {
        DisplayMode::Text
    };

    // Load configuration (or use custom path if provided)
    let loaded = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path),
        None => Config::load_or_create(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // --log wins over the configured level; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::info!("Waypoint v{}", env!("CARGO_PKG_VERSION"));

    let orchestrator = Arc::new(Orchestrator::from_config(&config).await?);
    let handle = Arc::clone(&orchestrator).handle();

    let result = match cli.command {
        Command::Serve { host, port } => {
            tracing::info!("Starting API server...");
            handle_serve(Arc::clone(&orchestrator), &config, host, port).await
        }

        Command::Run {
            message,
            session,
            owner,
            format,
            plan,
        } => {
            tracing::info!("Starting turn: {}", message);
            handle_run(
                Arc::clone(&orchestrator),
                &config,
                message,
                session,
                owner,
                format,
                plan.as_deref(),
                mode,
            )
            .await
        }

        Command::Resume {
            session_id,
            approve,
            response,
            token,
        } => handle_resume(&handle, &session_id, approve, response, token, mode).await,

        Command::Dispatch { session_id } => handle_dispatch(&handle, &session_id, mode).await,

        Command::Sessions { action } => match action {
            SessionAction::List { owner, status } => {
                handle_sessions_list(&handle, owner, status, mode).await
            }
            SessionAction::Show { session_id } => {
                handle_sessions_show(&handle, &session_id, mode).await
            }
            SessionAction::Delete { session_id } => {
                handle_sessions_delete(&handle, &session_id, mode).await
            }
        },

        Command::Checkpoints { session_id } => handle_checkpoints(&handle, &session_id, mode).await,

        Command::History { session_id, limit } => {
            handle_history(&handle, &session_id, limit, mode).await
        }

        Command::Render { session_id, format } => {
            handle_render(&handle, &session_id, format, mode).await
        }
    };

    // Flush checkpoints even when the command failed
    if let Err(e) = orchestrator.shutdown().await {
        tracing::warn!("Failed to close database cleanly: {:#}", e);
    }
    result
}
