//! Worker capability trait
//!
//! A capability is a named worker the dispatcher hands a step to. Workers are
//! registered once at engine construction; `human-approval` is reserved and
//! never dispatched to a worker.

use crate::errors::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of an earlier completed step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorResult {
    pub step_id: u32,
    pub capability: String,
    pub result: String,
}

/// Input handed to a worker for one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    pub session_id: String,
    pub step_id: u32,
    pub capability: String,
    pub description: String,
    /// The user request the plan was compiled from
    pub request: String,
    /// Completed earlier steps, in plan order
    pub prior_results: Vec<PriorResult>,
}

/// Trait that all worker capabilities must implement
#[async_trait]
pub trait Capability: Send + Sync {
    /// Returns the registry name of the capability
    fn name(&self) -> &str;

    /// Short description shown to the plan compiler
    fn description(&self) -> &str;

    /// Execute one step, returning its textual result
    async fn run(&self, input: &StepInput) -> Result<String, EngineError>;
}
