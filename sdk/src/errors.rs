//! Error types and handling
//!
//! This module provides the error types used throughout the Waypoint engine.
//! All errors implement the `EngineErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Taxonomy
//!
//! - **Compiler**: malformed or empty plans. Never reaches callers of the
//!   orchestrator, the compiler degrades to an `error-report` plan instead.
//! - **Worker**: captured on the failing step, never fatal to the plan.
//! - **StaleToken**: resume against a mismatched or absent interrupt token.
//! - **SessionNotFound**: unknown session identifier.
//! - **CheckpointWrite**: fatal to the current operation. Dispatch is
//!   idempotent, so the caller retries the whole call.

use thiserror::Error;

/// Trait for Waypoint error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait EngineErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// file paths, prompts or worker output.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors require changing the request or the configuration.
    fn is_recoverable(&self) -> bool;

    /// Returns true when the caller, not the engine, is at fault
    fn is_client_error(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EngineErrorExt};
///
/// let error = EngineError::StaleToken("session-1".to_string());
/// assert!(error.is_client_error());
/// assert!(!error.is_recoverable());
///
/// let write = EngineError::CheckpointWrite("disk full".to_string());
/// assert!(write.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Persistence errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Checkpoint write failed: {0}")]
    CheckpointWrite(String),

    // Session errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Stale or unknown interrupt token for session {0}")]
    StaleToken(String),

    #[error("Invalid resume request: {0}")]
    InvalidResume(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Session cancelled: {0}")]
    SessionCancelled(String),

    // Planning errors
    #[error("Plan compilation failed: {0}")]
    Compiler(String),

    // Worker errors
    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Step {step_id} timed out after {secs}s")]
    WorkerTimeout { step_id: u32, secs: u64 },

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Encoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::Database(_) => "Database operation failed. Try again",
            Self::CheckpointWrite(_) => {
                "Progress could not be saved. Retry the request, it will resume where it stopped"
            }

            Self::SessionNotFound(_) => "The session does not exist or was deleted",
            Self::StaleToken(_) => "This approval request is no longer pending",
            Self::InvalidResume(_) => "Send either approve=true or a non-empty response",
            Self::InvalidState(_) => "The session cannot accept this request right now",
            Self::SessionCancelled(_) => "The session was deleted while it was running",

            Self::Compiler(_) => "The request could not be turned into a plan",

            Self::Worker(_) => "A plan step failed",
            Self::WorkerTimeout { .. } => "A plan step took too long and was abandoned",
            Self::CapabilityNotFound(_) => "The plan referenced an unknown capability",

            Self::LLMProvider(_) => "LLM provider unavailable. Check your settings and network",

            Self::Serialization(_) => "Stored data could not be read",

            Self::Network(_) => "Network operation failed. Check your connection",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::StaleToken(_)
            | Self::InvalidResume(_)
            | Self::SessionNotFound(_)
            | Self::SessionCancelled(_)
            | Self::Config(_)
            | Self::Serialization(_) => false,

            _ => true,
        }
    }

    fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::StaleToken(_)
                | Self::InvalidResume(_)
                | Self::InvalidState(_)
                | Self::SessionNotFound(_)
        )
    }
}
