//! Waypoint Engine Library
//!
//! Plan, execute, interrupt and resume orchestration for multi-step
//! requests. Used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Database persistence module
pub mod db;

/// Per-session event bus
pub mod message_bus;

/// LLM provider abstraction layer
pub mod llm;

/// Conductor orchestration module
pub mod conductor;

/// Session registry
pub mod registry;

/// Orchestrator behind the session handle
pub mod orchestrator;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
