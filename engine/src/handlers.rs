//! Command handlers for CLI operations
//!
//! Every handler drives the engine through the same [`SessionHandle`] the
//! API server uses, then prints the result as text or JSON.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use api_server::ApiServer;
use sdk::handle::{SessionHandle, TurnOutcome, TurnRequest};
use sdk::outcome::OutputFormat;
use sdk::types::{ResumeInput, SessionFilter, SessionStatus};

/// How command results are printed
#[derive(Debug, Clone, Copy)]
pub enum DisplayMode {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_time(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn print_outcome(outcome: &TurnOutcome, mode: DisplayMode) -> Result<()> {
    if let DisplayMode::Json = mode {
        return print_json(outcome);
    }

    let session = &outcome.session;
    println!("Session {}: {}", session.session_id, session.status);

    if let Some(token) = &outcome.interrupt {
        println!();
        println!("Waiting for approval at step {}:", token.step_id);
        println!("  {}", token.question);
        println!();
        println!("  Token: {}", token.token);
        println!(
            "  Resume with: waypoint resume {} --approve | --response \"...\"",
            session.session_id
        );
    }

    if let Some(output) = &outcome.output {
        println!();
        println!("{}", output.to_text());
    }
    Ok(())
}

/// Serve the REST and WebSocket API until interrupted
pub async fn handle_serve(
    orchestrator: Arc<Orchestrator>,
    config: &Config,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let bind = format!("{}:{}", host, port);

    let mut server = ApiServer::new();
    let addr = server
        .start(orchestrator.handle(), &bind)
        .await
        .with_context(|| format!("Failed to start API server on {}", bind))?;

    println!("Waypoint API listening on http://{}", addr);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    server.stop();
    Ok(())
}

/// Start a turn from a message, or from an explicit plan file
pub async fn handle_run(
    orchestrator: Arc<Orchestrator>,
    config: &Config,
    message: String,
    session: Option<String>,
    owner: Option<String>,
    format: Option<String>,
    plan: Option<&Path>,
    mode: DisplayMode,
) -> Result<()> {
    let request = TurnRequest {
        session_id: session.unwrap_or_default(),
        owner: owner.unwrap_or_else(|| config.orchestrator.default_owner.clone()),
        message,
        output_format: OutputFormat::parse(format.as_deref()),
    };

    let outcome = match plan {
        Some(path) => {
            let steps = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read plan file {}", path.display()))?;
            orchestrator.start_plan(request, &steps).await?
        }
        None => orchestrator.handle().start_turn(request).await?,
    };

    print_outcome(&outcome, mode)
}

pub async fn handle_resume(
    handle: &SessionHandle,
    session_id: &str,
    approve: bool,
    response: Option<String>,
    token: Option<String>,
    mode: DisplayMode,
) -> Result<()> {
    let input = ResumeInput::from_request(approve, response)?;
    let outcome = handle.resume(session_id, token, input).await?;
    print_outcome(&outcome, mode)
}

pub async fn handle_dispatch(handle: &SessionHandle, session_id: &str, mode: DisplayMode) -> Result<()> {
    let outcome = handle.dispatch(session_id).await?;
    print_outcome(&outcome, mode)
}

pub async fn handle_sessions_list(
    handle: &SessionHandle,
    owner: Option<String>,
    status: Option<String>,
    mode: DisplayMode,
) -> Result<()> {
    let status = status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()?;
    let sessions = handle.list_sessions(SessionFilter { owner, status }).await?;

    match mode {
        DisplayMode::Text => {
            if sessions.is_empty() {
                println!("No sessions");
                return Ok(());
            }
            println!("Sessions ({}):", sessions.len());
            println!();
            for session in &sessions {
                println!("{}", session.session_id);
                println!("  Owner:   {}", session.owner);
                println!("  Status:  {}", session.status);
                println!("  Updated: {}", format_time(session.updated_at));
                println!();
            }
            Ok(())
        }
        DisplayMode::Json => print_json(&json!({
            "sessions": sessions,
            "count": sessions.len(),
        })),
    }
}

pub async fn handle_sessions_show(
    handle: &SessionHandle,
    session_id: &str,
    mode: DisplayMode,
) -> Result<()> {
    let state = handle.get_session(session_id).await?;

    match mode {
        DisplayMode::Text => {
            let session = &state.session;
            println!("Session: {}", session.session_id);
            println!("  Owner:   {}", session.owner);
            println!("  Status:  {}", session.status);
            println!("  Created: {}", format_time(session.created_at));
            println!("  Updated: {}", format_time(session.updated_at));

            if let Some(plan) = &state.plan {
                println!();
                println!("Plan for: {}", plan.request);
                if plan.degraded {
                    println!("  (degraded)");
                }
                for (index, step) in plan.steps.iter().enumerate() {
                    let marker = if index == state.cursor { ">" } else { " " };
                    println!(
                        "{} {}. [{}] {} ({})",
                        marker, step.step_id, step.capability, step.description, step.status
                    );
                    if let Some(error) = &step.error {
                        println!("      error: {}", error);
                    }
                }
            }

            if let Some(token) = &state.pending_interrupt {
                println!();
                println!("Waiting: {} (token {})", token.question, token.token);
            }
            Ok(())
        }
        DisplayMode::Json => print_json(&state),
    }
}

pub async fn handle_sessions_delete(
    handle: &SessionHandle,
    session_id: &str,
    mode: DisplayMode,
) -> Result<()> {
    let deleted = handle.delete_session(session_id).await?;

    match mode {
        DisplayMode::Text => {
            if deleted {
                println!("Deleted session {}", session_id);
            } else {
                println!("Session {} already absent", session_id);
            }
            Ok(())
        }
        DisplayMode::Json => print_json(&json!({
            "session_id": session_id,
            "deleted": deleted,
        })),
    }
}

pub async fn handle_checkpoints(
    handle: &SessionHandle,
    session_id: &str,
    mode: DisplayMode,
) -> Result<()> {
    let checkpoints = handle.checkpoints(session_id).await?;

    match mode {
        DisplayMode::Text => {
            println!("Checkpoints of {}:", session_id);
            for cp in &checkpoints {
                println!(
                    "  #{:<4} {}  {:<13} cursor {}",
                    cp.sequence,
                    format_time(cp.created_at),
                    cp.status.as_str(),
                    cp.cursor
                );
            }
            Ok(())
        }
        DisplayMode::Json => print_json(&json!({
            "session_id": session_id,
            "checkpoints": checkpoints,
        })),
    }
}

pub async fn handle_history(
    handle: &SessionHandle,
    session_id: &str,
    limit: usize,
    mode: DisplayMode,
) -> Result<()> {
    let page = handle.history(session_id, limit).await?;

    match mode {
        DisplayMode::Text => {
            println!(
                "History of {} (last {} of {}):",
                session_id, page.returned_messages, page.total_messages
            );
            println!();
            for entry in &page.messages {
                let role = serde_json::to_value(entry.role)?;
                println!("[{}] {}", role.as_str().unwrap_or("?"), entry.content);
            }
            Ok(())
        }
        DisplayMode::Json => print_json(&page),
    }
}

pub async fn handle_render(
    handle: &SessionHandle,
    session_id: &str,
    format: Option<String>,
    mode: DisplayMode,
) -> Result<()> {
    let output = handle
        .render(session_id, OutputFormat::parse(format.as_deref()))
        .await?;

    match mode {
        DisplayMode::Text => {
            println!("{}", output.to_text());
            Ok(())
        }
        DisplayMode::Json => print_json(&output),
    }
}
