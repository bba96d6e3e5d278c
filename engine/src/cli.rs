//! CLI interface for Waypoint
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use sdk::DEFAULT_HISTORY_LIMIT;
use std::path::PathBuf;

/// Waypoint orchestration engine
///
/// Turns requests into multi-step plans, runs them, pauses for human
/// approval and resumes from durable checkpoints.
#[derive(Parser, Debug)]
#[command(name = "waypoint")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the REST and WebSocket API
    Serve {
        /// Address to bind (defaults to the configured host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Start a turn: plan the message and run it
    Run {
        /// The request to plan
        message: String,

        /// Continue an existing session instead of starting a new one
        #[arg(long)]
        session: Option<String>,

        /// Owner recorded on a new session
        #[arg(long)]
        owner: Option<String>,

        /// Output format: chat, graph or report
        #[arg(long)]
        format: Option<String>,

        /// Run this JSON step list instead of planning the message
        #[arg(long, value_name = "FILE")]
        plan: Option<PathBuf>,
    },

    /// Answer a session waiting for human approval
    Resume {
        /// Session ID
        session_id: String,

        /// Approve without a textual answer
        #[arg(long, conflicts_with = "response")]
        approve: bool,

        /// Textual answer
        #[arg(long)]
        response: Option<String>,

        /// Interrupt token (defaults to the outstanding one)
        #[arg(long)]
        token: Option<String>,
    },

    /// Continue an active session from its cursor
    Dispatch {
        /// Session ID
        session_id: String,
    },

    /// Manage sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// List a session's checkpoints
    Checkpoints {
        /// Session ID
        session_id: String,
    },

    /// Show a session's conversation history
    History {
        /// Session ID
        session_id: String,

        /// Number of entries to show
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },

    /// Render a finished session
    Render {
        /// Session ID
        session_id: String,

        /// Output format: chat, graph or report
        #[arg(long)]
        format: Option<String>,
    },
}

/// Session management actions
#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// List sessions
    List {
        /// Only sessions of this owner
        #[arg(long)]
        owner: Option<String>,

        /// Only sessions in this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one session's state
    Show {
        /// Session ID
        session_id: String,
    },

    /// Delete a session and its checkpoints
    Delete {
        /// Session ID
        session_id: String,
    },
}
