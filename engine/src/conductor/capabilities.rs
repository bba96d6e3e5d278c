//! Capability Registry
//!
//! Maps capability names to worker implementations. The registry is fixed
//! once the orchestrator is built; both the plan compiler and the dispatcher
//! read from the same instance.
//!
//! The default workers are deterministic placeholders meant to be replaced by
//! real search, analysis and document logic.

use async_trait::async_trait;
use sdk::capability::{Capability, StepInput};
use sdk::errors::EngineError;
use sdk::types::{ERROR_REPORT, HUMAN_APPROVAL};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Registered worker capabilities, keyed by name
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    workers: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Empty registry; `error-report` is still needed for degraded plans
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in placeholder workers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults: Vec<Arc<dyn Capability>> = vec![
            Arc::new(SearchWorker),
            Arc::new(ValidationWorker),
            Arc::new(AnalysisWorker),
            Arc::new(ComparisonWorker),
            Arc::new(DocumentWorker),
            Arc::new(ErrorReportWorker),
        ];
        for worker in defaults {
            // Built-in names never collide with the reserved one
            let _ = registry.register(worker);
        }
        registry
    }

    /// Register a worker, replacing any previous one with the same name
    pub fn register(&mut self, worker: Arc<dyn Capability>) -> Result<(), EngineError> {
        let name = worker.name().to_string();
        if name == HUMAN_APPROVAL {
            return Err(EngineError::Config(format!(
                "'{}' is reserved and cannot be registered",
                HUMAN_APPROVAL
            )));
        }
        if self.workers.insert(name.clone(), worker).is_some() {
            warn!("Capability '{}' registered twice, keeping the latest", name);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.workers.get(name).cloned()
    }

    /// True for registered workers and for the reserved approval capability
    pub fn knows(&self, name: &str) -> bool {
        name == HUMAN_APPROVAL || self.workers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }

    /// One line per capability, used in the decomposition prompt
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .workers
            .values()
            .filter(|w| w.name() != ERROR_REPORT)
            .map(|w| format!("- {}: {}", w.name(), w.description()))
            .collect();
        lines.push(format!(
            "- {}: ask the user to confirm before continuing (requires hitl_question)",
            HUMAN_APPROVAL
        ));
        lines.join("\n")
    }
}

pub struct SearchWorker;

#[async_trait]
impl Capability for SearchWorker {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "retrieve data (vector store, SQL, web search)"
    }

    async fn run(&self, input: &StepInput) -> Result<String, EngineError> {
        Ok(format!("[placeholder] Search: {}", input.description))
    }
}

pub struct ValidationWorker;

#[async_trait]
impl Capability for ValidationWorker {
    fn name(&self) -> &str {
        "validation"
    }

    fn description(&self) -> &str {
        "check retrieved data for completeness and accuracy"
    }

    async fn run(&self, input: &StepInput) -> Result<String, EngineError> {
        Ok(format!(
            "[placeholder] Validation of {} earlier result(s): {}",
            input.prior_results.len(),
            input.description
        ))
    }
}

/// Numbers its runs within a plan: the n-th analysis step reports `Analysis #n`
pub struct AnalysisWorker;

#[async_trait]
impl Capability for AnalysisWorker {
    fn name(&self) -> &str {
        "analysis"
    }

    fn description(&self) -> &str {
        "analyse data for trends and patterns; may appear several times"
    }

    async fn run(&self, input: &StepInput) -> Result<String, EngineError> {
        let previous = input
            .prior_results
            .iter()
            .filter(|r| r.capability == self.name())
            .count();
        Ok(format!(
            "[placeholder] Analysis #{}: {}",
            previous + 1,
            input.description
        ))
    }
}

pub struct ComparisonWorker;

#[async_trait]
impl Capability for ComparisonWorker {
    fn name(&self) -> &str {
        "comparison"
    }

    fn description(&self) -> &str {
        "compare periods, variants or benchmarks"
    }

    async fn run(&self, input: &StepInput) -> Result<String, EngineError> {
        Ok(format!("[placeholder] Comparison: {}", input.description))
    }
}

pub struct DocumentWorker;

#[async_trait]
impl Capability for DocumentWorker {
    fn name(&self) -> &str {
        "document"
    }

    fn description(&self) -> &str {
        "write a report, summary or other document from earlier results"
    }

    async fn run(&self, input: &StepInput) -> Result<String, EngineError> {
        Ok(format!(
            "[placeholder] Document built from {} earlier result(s): {}",
            input.prior_results.len(),
            input.description
        ))
    }
}

/// Sole step of a degraded plan; reports why compilation failed
pub struct ErrorReportWorker;

#[async_trait]
impl Capability for ErrorReportWorker {
    fn name(&self) -> &str {
        ERROR_REPORT
    }

    fn description(&self) -> &str {
        "explain that the request could not be planned"
    }

    async fn run(&self, input: &StepInput) -> Result<String, EngineError> {
        Ok(format!(
            "The request \"{}\" could not be turned into a plan. {}",
            input.request, input.description
        ))
    }
}
